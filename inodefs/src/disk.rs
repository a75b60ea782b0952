use crate::alloc::{Bitmap, State};
use crate::fs::IFSError;
use crate::header::{DiskHeader, BLOCK_SIZE};
use crate::io::BlockStorage;
use crate::node::TBA;
use std::path::Path;

use log::{debug, info, warn};
use zerocopy::AsBytes;

/// The disk driver. Maps a backing medium into a header, an allocation bitmap and
/// an array of `BLOCK_SIZE` blocks, and keeps the header's cached counters in step
/// with the bitmap on every write and free.
///
/// Every mutation is written through to the medium immediately; `flush` is the
/// durability barrier. The store assumes it is the only user of the medium for
/// its whole lifetime.
pub struct BlockStore<T: BlockStorage> {
    dev: T,
    header: DiskHeader,
    bitmap: Bitmap<Vec<u8>>,
    /// Set once a flush failed, after which nothing written can be trusted.
    poisoned: bool,
}

impl<T: BlockStorage> BlockStore<T> {
    /// Opens the store at `path`, creating and sizing a new one when the path does
    /// not hold one yet.
    ///
    /// # Errors
    ///
    /// Failing to open or size the medium leaves nothing usable behind and callers
    /// should give up on the store.
    pub fn init<P: AsRef<Path>>(path: P, num_blocks: usize) -> Result<Self, IFSError> {
        let dev = T::open_disk(path)?;
        Self::mount(dev, num_blocks)
    }

    /// Mounts a store of `num_blocks` blocks onto `dev`.
    ///
    /// An empty medium is extended to the full size of the store with every block
    /// marked free. Otherwise the existing header is validated against
    /// `num_blocks` and its cached counters are rebuilt from the bitmap.
    pub fn mount(mut dev: T, num_blocks: usize) -> Result<Self, IFSError> {
        let mut header = DiskHeader::new(num_blocks)?;

        if dev.is_empty() {
            info!("creating store of {} blocks", num_blocks);
            dev.set_len(header.store_len())?;
            let bitmap = Bitmap::new(vec![0; header.bitmap_len()]);
            let mut store = Self {
                dev,
                header,
                bitmap,
                poisoned: false,
            };
            store.dev.write_at(0, store.header.as_bytes())?;
            let offset = store.header.bitmap_offset();
            store.dev.write_at(offset, store.bitmap.as_bytes())?;
            return Ok(store);
        }

        if dev.len() < header.store_len() {
            return Err(IFSError::InvalidArgument(format!(
                "medium holds {} bytes, a store of {} blocks needs {}",
                dev.len(),
                num_blocks,
                header.store_len()
            )));
        }

        let mut buf = vec![0; header.bitmap_offset() as usize];
        dev.read_at(0, &mut buf)?;
        let stored = DiskHeader::parse(&buf)?;
        if stored.num_blocks() != num_blocks {
            return Err(IFSError::InvalidArgument(format!(
                "store holds {} blocks, {} were requested",
                stored.num_blocks(),
                num_blocks
            )));
        }

        let mut entries = vec![0; header.bitmap_len()];
        dev.read_at(header.bitmap_offset(), &mut entries)?;
        let bitmap = Bitmap::new(entries);
        // The spare bits past `num_blocks` always read as free.
        let padding = bitmap.num_bits() * 8 - num_blocks;
        header.free_blocks = bitmap.count_free().saturating_sub(padding) as i32;

        let mut store = Self {
            dev,
            header,
            bitmap,
            poisoned: false,
        };
        store.refresh_first_free();
        if store.header != stored {
            warn!(
                "cached header {:?} disagreed with the bitmap, rebuilt as {:?}",
                stored, store.header
            );
        }
        store.dev.write_at(0, store.header.as_bytes())?;
        info!(
            "mounted store of {} blocks, {} free",
            num_blocks, store.header.free_blocks
        );
        Ok(store)
    }

    pub fn header(&self) -> &DiskHeader {
        &self.header
    }

    pub fn num_blocks(&self) -> usize {
        self.header.num_blocks()
    }

    pub fn free_blocks(&self) -> usize {
        self.header.free_blocks()
    }

    pub fn first_free_block(&self) -> Option<usize> {
        self.header.first_free_block()
    }

    pub fn is_used(&self, blocknr: usize) -> bool {
        blocknr < self.num_blocks() && self.bitmap.is_set(blocknr)
    }

    /// Copies block `blocknr` into `dest`, returning whether the bitmap considers
    /// the block in use. The copy happens either way.
    pub fn read_block(&mut self, blocknr: usize, dest: &mut [u8]) -> Result<State, IFSError> {
        self.check_usable()?;
        self.check_block(blocknr)?;
        if dest.len() < BLOCK_SIZE {
            return Err(IFSError::InvalidArgument(
                "buffer does not contain enough space to read block".to_string(),
            ));
        }
        let offset = self.header.block_offset(blocknr);
        self.dev.read_at(offset, &mut dest[..BLOCK_SIZE])?;
        Ok(self.bitmap.get(blocknr))
    }

    /// Copies `src` into block `blocknr` and marks it used. Writing a block that is
    /// already in use is an overwrite and leaves the counters alone.
    pub fn write_block(&mut self, blocknr: usize, src: &[u8]) -> Result<usize, IFSError> {
        self.check_usable()?;
        self.check_block(blocknr)?;
        if src.len() != BLOCK_SIZE {
            return Err(IFSError::InvalidArgument(format!(
                "blocks are written whole, got {} bytes",
                src.len()
            )));
        }
        let offset = self.header.block_offset(blocknr);
        self.dev.write_at(offset, src)?;

        if self.bitmap.is_set(blocknr) {
            return Ok(BLOCK_SIZE);
        }
        self.bitmap.set(blocknr, State::Used);
        self.header.free_blocks -= 1;
        self.refresh_first_free();
        self.sync_allocation(blocknr)?;
        Ok(BLOCK_SIZE)
    }

    /// Marks block `blocknr` free. The block's contents are left as they are.
    pub fn free_block(&mut self, blocknr: usize) -> Result<(), IFSError> {
        self.check_usable()?;
        self.check_block(blocknr)?;
        if !self.bitmap.is_set(blocknr) {
            return Ok(());
        }
        self.bitmap.set(blocknr, State::Free);
        self.header.free_blocks += 1;
        self.refresh_first_free();
        self.sync_allocation(blocknr)
    }

    /// The lowest free block at or after `start`, or `None` when no such block
    /// exists.
    pub fn get_free_block(&self, start: usize) -> Option<usize> {
        let entry = Bitmap::<Vec<u8>>::index_of(start).entry;
        let found = match self.bitmap.find_first(entry, State::Free)? {
            blocknr if blocknr >= start => Some(blocknr),
            // The hint points past the first free bit of its own byte.
            _ => (start..(entry + 1) * 8)
                .find(|&blocknr| !self.bitmap.is_set(blocknr))
                .or_else(|| self.bitmap.find_first(entry + 1, State::Free)),
        };
        found.filter(|&blocknr| blocknr < self.num_blocks())
    }

    /// Forces everything written so far onto durable storage.
    ///
    /// # Errors
    ///
    /// There is no telling which writes landed after a failed flush, so the store
    /// refuses any further operation.
    pub fn flush(&mut self) -> Result<(), IFSError> {
        self.check_usable()?;
        if let Err(e) = self.dev.sync_disk() {
            warn!("flush failed, store is no longer usable: {}", e);
            self.poisoned = true;
            return Err(e.into());
        }
        debug!("flushed store, {} blocks free", self.header.free_blocks);
        Ok(())
    }

    /// Releases the store and hands back the medium.
    pub fn close(mut self) -> Result<T, IFSError> {
        self.check_usable()?;
        self.dev.write_at(0, self.header.as_bytes())?;
        Ok(self.dev)
    }

    fn check_usable(&self) -> Result<(), IFSError> {
        if self.poisoned {
            return Err(IFSError::Poisoned);
        }
        Ok(())
    }

    fn check_block(&self, blocknr: usize) -> Result<(), IFSError> {
        if blocknr >= self.num_blocks() {
            return Err(IFSError::InvalidArgument(format!(
                "block {} is outside of a {} block store",
                blocknr,
                self.num_blocks()
            )));
        }
        Ok(())
    }

    fn refresh_first_free(&mut self) {
        self.header.first_free_block = self
            .get_free_block(0)
            .map_or(TBA, |blocknr| blocknr as i32);
    }

    /// Persists the header and the bitmap byte holding `blocknr`.
    fn sync_allocation(&mut self, blocknr: usize) -> Result<(), IFSError> {
        let entry = Bitmap::<Vec<u8>>::index_of(blocknr).entry;
        let offset = self.header.bitmap_offset() + entry as u64;
        let byte = self.bitmap.as_bytes()[entry];
        self.dev.write_at(offset, &[byte])?;
        self.dev.write_at(0, self.header.as_bytes())?;
        Ok(())
    }
}
