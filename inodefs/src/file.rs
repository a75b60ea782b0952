use crate::chain::{Cursor, Mode};
use crate::fs::{IFSError, InodeFS};
use crate::handle::FileHandle;
use crate::io::BlockStorage;
use crate::node::{DataBlock, Inode, PAYLOAD_SIZE, TBA};
use std::cmp::min;

use log::{trace, warn};

impl<T: BlockStorage> InodeFS<T> {
    /// Writes `data` at the file's position, allocating data and index blocks
    /// as needed, and moves the position past the written bytes.
    ///
    /// When the disk or the node's chain runs out midway, the bytes written so
    /// far stay committed and their count is returned.
    ///
    /// # Errors
    ///
    /// Fails with `DiskFull` or `NodeFull` only when not a single byte could be
    /// written.
    pub fn write(&mut self, file: &mut FileHandle, data: &[u8]) -> Result<usize, IFSError> {
        self.resync(&mut file.inode, &mut file.cursor)?;
        let mut cursor = file.cursor.clone();
        let mut written = 0;
        let mut failure = None;

        while written < data.len() {
            let mut probe = cursor.clone();
            match self.write_chunk(&mut file.inode, &mut probe, &data[written..]) {
                Ok(n) => {
                    written += n;
                    cursor = probe;
                }
                Err(err @ IFSError::DiskFull) | Err(err @ IFSError::NodeFull) if written > 0 => {
                    warn!(
                        "wrote {} of {} bytes to {:?}: {}",
                        written,
                        data.len(),
                        file.name(),
                        err
                    );
                    break;
                }
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // Chunks already linked stay part of the file even when a later one failed.
        if cursor.offset > file.inode.len() {
            file.inode.fcb.size_in_bytes = cursor.offset as i32;
            self.put_inode(&file.inode)?;
        }
        file.cursor = cursor;

        match failure {
            Some(err) => {
                warn!("writing to {:?} failed after {} bytes: {}", file.name(), written, err);
                Err(err)
            }
            None => Ok(written),
        }
    }

    /// Reads from the file's position into `buf`, stopping at the end of the
    /// file. Returns the number of bytes read.
    pub fn read(&mut self, file: &mut FileHandle, buf: &mut [u8]) -> Result<usize, IFSError> {
        self.resync(&mut file.inode, &mut file.cursor)?;
        let end = file.inode.len();
        let mut cursor = file.cursor.clone();
        let mut read = 0;

        while read < buf.len() && cursor.offset < end {
            if cursor.pos_in_block == PAYLOAD_SIZE {
                cursor.pos_in_node += 1;
                cursor.pos_in_block = 0;
            }
            if !self.advance_indirection(&mut file.inode, &mut cursor, Mode::Read)? {
                break;
            }
            let block = match cursor.entry(&file.inode) {
                TBA => break,
                blocknr => self.load_data(blocknr as usize)?,
            };

            let start = cursor.pos_in_block;
            let n = min(
                min(PAYLOAD_SIZE - start, buf.len() - read),
                end - cursor.offset,
            );
            buf[read..read + n].copy_from_slice(&block.data[start..start + n]);
            trace!("read {} bytes from block {}", n, block.block());

            cursor.current_block = block.header;
            cursor.pos_in_block += n;
            cursor.offset += n;
            read += n;
        }

        file.cursor = cursor;
        Ok(read)
    }

    /// Moves the file's position to byte `pos` and returns it. Any position inside
    /// an allocated block is reachable, including bytes past the file's length;
    /// a write from there extends the file.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidArgument` for negative positions and with `NotFound`
    /// when the block holding `pos` is missing from the chain.
    pub fn seek(&mut self, file: &mut FileHandle, pos: i64) -> Result<usize, IFSError> {
        self.resync(&mut file.inode, &mut file.cursor)?;
        if pos < 0 {
            return Err(IFSError::InvalidArgument(format!(
                "cannot seek to negative position {}",
                pos
            )));
        }
        let pos = pos as usize;

        // A block boundary is held as the end of the previous block, the way a
        // write leaves the cursor.
        let (logical, in_block) = if pos > 0 && pos % PAYLOAD_SIZE == 0 {
            (pos / PAYLOAD_SIZE - 1, PAYLOAD_SIZE)
        } else {
            (pos / PAYLOAD_SIZE, pos % PAYLOAD_SIZE)
        };

        let missing = || IFSError::NotFound(format!("block {} of {:?}", logical, file.name()));
        let mut cursor = self.locate(&file.inode, logical)?.ok_or_else(missing)?;
        match cursor.entry(&file.inode) {
            TBA if pos == 0 => (),
            TBA => return Err(missing()),
            blocknr => cursor.current_block = self.load_data(blocknr as usize)?.header,
        }
        cursor.pos_in_block = in_block;
        cursor.offset = pos;

        file.cursor = cursor;
        Ok(pos)
    }

    /// Writes as much of `data` as fits in the block at the cursor.
    fn write_chunk(
        &mut self,
        node: &mut Inode,
        cursor: &mut Cursor,
        data: &[u8],
    ) -> Result<usize, IFSError> {
        if cursor.pos_in_block == PAYLOAD_SIZE {
            cursor.pos_in_node += 1;
            cursor.pos_in_block = 0;
        }
        if !self.advance_indirection(node, cursor, Mode::Write)? {
            return Err(IFSError::NodeFull);
        }

        let (mut block, fresh) = match cursor.entry(node) {
            TBA => {
                let blocknr = self.allocate()?;
                let logical = cursor.offset / PAYLOAD_SIZE;
                (DataBlock::new(blocknr, cursor.pos_in_node, logical), true)
            }
            blocknr => (self.load_data(blocknr as usize)?, false),
        };

        let start = cursor.pos_in_block;
        let n = min(PAYLOAD_SIZE - start, data.len());
        block.data[start..start + n].copy_from_slice(&data[..n]);
        self.put_data(&block)?;
        trace!("wrote {} bytes to block {}", n, block.block());

        if fresh {
            node.grow();
            self.link_slot(node, cursor, block.block())?;
        }

        cursor.current_block = block.header;
        cursor.pos_in_block += n;
        cursor.offset += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use crate::chain::Level;
    use crate::disk::BlockStore;
    use crate::fs::{IFSError, InodeFS};
    use crate::handle::FileHandle;
    use crate::header::DiskHeader;
    use crate::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::node::{DIRECT_ENTRIES, INDIRECT_ENTRIES, PAYLOAD_SIZE, TBA};
    use std::cell::Cell;
    use std::io;
    use std::path::Path;
    use std::rc::Rc;

    fn create_test_file(blocks: usize) -> (InodeFS<FileBlockEmulator>, FileHandle) {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .build()
            .expect("Could not initialize disk emulator.");
        let mut fs = InodeFS::new(BlockStore::mount(dev, blocks).unwrap());
        fs.format().unwrap();
        let mut root = fs.init().unwrap();
        let file = fs.create_file(&mut root, "data").unwrap();
        (fs, file)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_back() {
        let (mut fs, mut file) = create_test_file(32);
        assert_eq!(fs.write(&mut file, b"hello world").unwrap(), 11);
        assert_eq!(file.len(), 11);
        assert_eq!(file.position(), 11);

        fs.seek(&mut file, 6).unwrap();
        let mut buf = [0; 16];
        assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 0);
    }

    #[test]
    fn block_boundary_is_left_only_when_more_follows() {
        let (mut fs, mut file) = create_test_file(32);
        fs.write(&mut file, &pattern(PAYLOAD_SIZE)).unwrap();

        assert_eq!(file.inode().num_entries, 1);
        assert_eq!(file.cursor().pos_in_node(), 0);
        assert_eq!(file.cursor().pos_in_block(), PAYLOAD_SIZE);

        fs.write(&mut file, b"x").unwrap();
        assert_eq!(file.inode().num_entries, 2);
        assert_eq!(file.cursor().pos_in_node(), 1);
        assert_eq!(file.cursor().current_block().block_in_file, 1);
    }

    #[test]
    fn overwriting_keeps_length_and_blocks() {
        let (mut fs, mut file) = create_test_file(32);
        fs.write(&mut file, &pattern(1200)).unwrap();
        let free = fs.disk().free_blocks();

        fs.seek(&mut file, 450).unwrap();
        fs.write(&mut file, &[0xaa; 100]).unwrap();
        assert_eq!(file.len(), 1200);
        assert_eq!(fs.disk().free_blocks(), free);

        let mut buf = vec![0; 1200];
        fs.seek(&mut file, 0).unwrap();
        fs.read(&mut file, &mut buf).unwrap();
        let mut expected = pattern(1200);
        expected[450..550].copy_from_slice(&[0xaa; 100]);
        assert_eq!(buf, expected);
    }

    #[test]
    fn write_spills_into_single_and_double_indirect() {
        let blocks = DIRECT_ENTRIES + INDIRECT_ENTRIES + 8;
        let (mut fs, mut file) = create_test_file(blocks + 8);
        let data = pattern(blocks * PAYLOAD_SIZE);
        assert_eq!(fs.write(&mut file, &data).unwrap(), data.len());

        let inode = file.inode();
        assert_ne!(inode.single_indirect, TBA);
        assert_ne!(inode.double_indirect, TBA);
        assert_eq!(file.cursor().level(inode), Level::Double { outer: 0 });
        assert_eq!(inode.num_entries as usize, blocks);
        // Inode, single node, double node, one leaf and the data blocks.
        assert_eq!(inode.fcb.size_in_blocks as usize, blocks + 4);

        let start = (DIRECT_ENTRIES + INDIRECT_ENTRIES) * PAYLOAD_SIZE - 3;
        fs.seek(&mut file, start as i64).unwrap();
        let mut buf = vec![0; 10];
        assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 10);
        assert_eq!(&buf[..], &data[start..start + 10]);
    }

    #[test]
    fn full_disk_returns_partial_count() {
        // Root, the file's inode and three data blocks.
        let (mut fs, mut file) = create_test_file(5);
        let written = fs.write(&mut file, &pattern(2000)).unwrap();
        assert_eq!(written, 3 * PAYLOAD_SIZE);
        assert_eq!(file.len(), written);

        match fs.write(&mut file, b"more") {
            Err(IFSError::DiskFull) => (),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(file.len(), written);
    }

    #[test]
    fn seek_rejects_negative_positions() {
        let (mut fs, mut file) = create_test_file(16);
        assert_eq!(fs.seek(&mut file, 0).unwrap(), 0);
        fs.write(&mut file, b"abc").unwrap();

        match fs.seek(&mut file, -1) {
            Err(IFSError::InvalidArgument(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(fs.seek(&mut file, 3).unwrap(), 3);
    }

    #[test]
    fn seek_reaches_past_the_end_of_an_allocated_block() {
        let (mut fs, mut file) = create_test_file(16);
        fs.write(&mut file, b"abc").unwrap();

        assert_eq!(fs.seek(&mut file, 10).unwrap(), 10);
        assert_eq!(file.len(), 3);
        fs.write(&mut file, b"xy").unwrap();
        assert_eq!(file.len(), 12);

        fs.seek(&mut file, 0).unwrap();
        let mut buf = [0xff; 16];
        assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 12);
        assert_eq!(&buf[..12], b"abc\0\0\0\0\0\0\0xy");

        assert_eq!(fs.seek(&mut file, PAYLOAD_SIZE as i64).unwrap(), PAYLOAD_SIZE);
        match fs.seek(&mut file, PAYLOAD_SIZE as i64 + 1) {
            Err(IFSError::NotFound(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn write_moves_across_double_indirect_leaves() {
        let blocks = DIRECT_ENTRIES + 2 * INDIRECT_ENTRIES + 21;
        let (mut fs, mut file) = create_test_file(blocks + 16);
        let data = pattern(blocks * PAYLOAD_SIZE);
        assert_eq!(fs.write(&mut file, &data).unwrap(), data.len());

        let inode = file.inode();
        assert_eq!(file.cursor().level(inode), Level::Double { outer: 1 });
        // Inode, single node, double node, two leaves and the data blocks.
        assert_eq!(inode.fcb.size_in_blocks as usize, blocks + 5);
        let double = fs.load_index(inode.double_indirect as usize).unwrap();
        assert_eq!(double.num_entries, 2);
        assert_eq!(double.blocks[2], TBA);

        // Both sides of the boundary between the two leaves.
        let boundary = (DIRECT_ENTRIES + 2 * INDIRECT_ENTRIES) * PAYLOAD_SIZE;
        for &pos in &[boundary - 4, boundary, data.len() - 10] {
            fs.seek(&mut file, pos as i64).unwrap();
            let mut buf = [0; 10];
            assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 10);
            assert_eq!(&buf[..], &data[pos..pos + 10]);
        }

        fs.seek(&mut file, 0).unwrap();
        let mut buf = vec![0; data.len()];
        assert_eq!(fs.read(&mut file, &mut buf).unwrap(), data.len());
        assert_eq!(buf, data);
    }

    #[test]
    fn exhausted_chain_reports_node_full() {
        let entries = DIRECT_ENTRIES + INDIRECT_ENTRIES + INDIRECT_ENTRIES * INDIRECT_ENTRIES;
        let capacity = entries * PAYLOAD_SIZE;
        // Root, inode, single node, double node and its leaves.
        let overhead = 4 + INDIRECT_ENTRIES;
        let (mut fs, mut file) = create_test_file(entries + overhead + 72);

        let written = fs.write(&mut file, &pattern(capacity + 10)).unwrap();
        assert_eq!(written, capacity);
        assert_eq!(file.len(), capacity);
        assert_eq!(
            file.cursor().level(file.inode()),
            Level::Double {
                outer: INDIRECT_ENTRIES - 1
            }
        );
        assert_eq!(fs.disk().free_blocks(), 72);

        match fs.write(&mut file, b"x") {
            Err(IFSError::NodeFull) => (),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(fs.disk().free_blocks(), 72);
    }

    #[test]
    fn failed_write_keeps_committed_length() {
        let fail_at = Rc::new(Cell::new(None));
        let medium = FailingMedium {
            inner: FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
                .build()
                .unwrap(),
            fail_at: Rc::clone(&fail_at),
        };
        let mut fs = InodeFS::new(BlockStore::mount(medium, 16).unwrap());
        fs.format().unwrap();
        let mut root = fs.init().unwrap();
        let mut file = fs.create_file(&mut root, "data").unwrap();

        // Blocks 2 and 3 take the first two chunks, block 4 would take the third.
        fail_at.set(Some(DiskHeader::new(16).unwrap().block_offset(4)));
        let data = pattern(1200);
        match fs.write(&mut file, &data) {
            Err(IFSError::IOFault(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(file.len(), 2 * PAYLOAD_SIZE);
        assert!(!fs.disk().is_used(4));

        let mut file = fs.open_file(&mut root, "data").unwrap();
        assert_eq!(file.len(), 2 * PAYLOAD_SIZE);
        let mut buf = vec![0; 1200];
        assert_eq!(fs.read(&mut file, &mut buf).unwrap(), 2 * PAYLOAD_SIZE);
        assert_eq!(&buf[..2 * PAYLOAD_SIZE], &data[..2 * PAYLOAD_SIZE]);
    }

    /// A medium refusing writes at one offset.
    struct FailingMedium {
        inner: FileBlockEmulator,
        fail_at: Rc<Cell<Option<u64>>>,
    }

    impl BlockStorage for FailingMedium {
        fn open_disk<P: AsRef<Path>>(path: P) -> io::Result<Self> {
            Ok(Self {
                inner: FileBlockEmulator::open_disk(path)?,
                fail_at: Rc::default(),
            })
        }

        fn len(&self) -> u64 {
            self.inner.len()
        }

        fn set_len(&mut self, len: u64) -> io::Result<()> {
            self.inner.set_len(len)
        }

        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            self.inner.read_at(offset, buf)
        }

        fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
            if self.fail_at.get() == Some(offset) {
                return Err(io::Error::new(io::ErrorKind::Other, "medium write failed"));
            }
            self.inner.write_at(offset, buf)
        }

        fn sync_disk(&mut self) -> io::Result<()> {
            self.inner.sync_disk()
        }
    }

    #[test]
    fn seek_to_block_boundary_continues_writing() {
        let (mut fs, mut file) = create_test_file(16);
        fs.write(&mut file, &pattern(2 * PAYLOAD_SIZE)).unwrap();
        fs.seek(&mut file, PAYLOAD_SIZE as i64).unwrap();
        assert_eq!(file.cursor().pos_in_node(), 0);
        assert_eq!(file.cursor().pos_in_block(), PAYLOAD_SIZE);

        fs.write(&mut file, b"zz").unwrap();
        fs.seek(&mut file, PAYLOAD_SIZE as i64 - 1).unwrap();
        let mut buf = [0; 3];
        fs.read(&mut file, &mut buf).unwrap();
        assert_eq!(buf, [pattern(PAYLOAD_SIZE)[PAYLOAD_SIZE - 1], b'z', b'z']);
    }
}
