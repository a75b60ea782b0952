use crate::fs::IFSError;
use crate::node::TBA;
use std::convert::TryFrom;
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size of every addressable block, block headers included.
pub const BLOCK_SIZE: usize = 512;

/// The first region of the backing store, describing how the remaining space is
/// split between the allocation bitmap and the block array.
///
/// ```text
/// ==================================================
/// | DiskHeader | Bitmap | Block 0 | ... | Block N-1 |
/// ==================================================
/// ```
///
/// `free_blocks` and `first_free_block` are cached from the bitmap and are only
/// ever touched by the block store.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskHeader {
    /// Number of blocks available for files and directories.
    pub num_blocks: i32,
    /// Historical copy of `num_blocks`.
    pub bitmap_blocks: i32,
    /// Length of the bitmap in bytes.
    pub bitmap_entries: i32,
    /// Blocks not marked in the bitmap.
    pub free_blocks: i32,
    /// Lowest free block, TBA when the store is full.
    pub first_free_block: i32,
}

impl DiskHeader {
    /// Describes an empty store of `num_blocks` blocks. The bitmap gets one spare
    /// byte so the remainder of `num_blocks / 8` is never lost.
    pub fn new(num_blocks: usize) -> Result<Self, IFSError> {
        let blocks = i32::try_from(num_blocks)
            .ok()
            .filter(|&blocks| blocks > 0)
            .ok_or_else(|| {
                IFSError::InvalidArgument(format!("unsupported block count {}", num_blocks))
            })?;
        Ok(Self {
            num_blocks: blocks,
            bitmap_blocks: blocks,
            bitmap_entries: (num_blocks / 8 + 1) as i32,
            free_blocks: blocks,
            first_free_block: 0,
        })
    }

    /// Reads a header from the start of `buf`, checking that the geometry it
    /// describes is internally consistent.
    pub fn parse(buf: &[u8]) -> Result<Self, IFSError> {
        let header = buf
            .get(..size_of::<Self>())
            .and_then(Self::read_from)
            .ok_or_else(|| IFSError::Corrupted("disk header is truncated".to_string()))?;
        let expected = (header.num_blocks / 8 + 1) as i32;
        if header.num_blocks <= 0
            || header.bitmap_blocks != header.num_blocks
            || header.bitmap_entries != expected
        {
            return Err(IFSError::Corrupted(format!(
                "inconsistent disk header {:?}",
                header
            )));
        }
        Ok(header)
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks as usize
    }

    pub fn bitmap_len(&self) -> usize {
        self.bitmap_entries as usize
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks as usize
    }

    pub fn first_free_block(&self) -> Option<usize> {
        match self.first_free_block {
            TBA => None,
            blocknr => Some(blocknr as usize),
        }
    }

    /// Byte offset of the bitmap inside the store.
    pub fn bitmap_offset(&self) -> u64 {
        size_of::<Self>() as u64
    }

    /// Byte offset of `blocknr` inside the store.
    pub fn block_offset(&self, blocknr: usize) -> u64 {
        self.bitmap_offset() + self.bitmap_len() as u64 + (blocknr * BLOCK_SIZE) as u64
    }

    /// Total length of a store with this geometry.
    pub fn store_len(&self) -> u64 {
        self.block_offset(self.num_blocks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_layout_offsets() {
        let header = DiskHeader::new(500).unwrap();
        assert_eq!(header.bitmap_entries, 63);
        assert_eq!(header.bitmap_offset(), 20);
        assert_eq!(header.block_offset(0), 20 + 63);
        assert_eq!(header.block_offset(2), 20 + 63 + 1024);
        assert_eq!(header.store_len(), 20 + 63 + 500 * 512);
    }

    #[test]
    fn spare_bitmap_byte_is_always_reserved() {
        assert_eq!(DiskHeader::new(8).unwrap().bitmap_entries, 2);
        assert_eq!(DiskHeader::new(9).unwrap().bitmap_entries, 2);
        assert_eq!(DiskHeader::new(7).unwrap().bitmap_entries, 1);
    }

    #[test]
    fn can_encode_and_decode_headers() {
        let mut header = DiskHeader::new(64).unwrap();
        header.free_blocks = 12;
        header.first_free_block = 52;

        let parsed = DiskHeader::parse(header.as_bytes()).unwrap();

        assert_eq!(parsed, header);
        assert_eq!(parsed.first_free_block(), Some(52));
    }

    #[test]
    fn parsing_zeroed_header_fails() {
        let zero_buffer = vec![0; 64];
        match DiskHeader::parse(&zero_buffer) {
            Err(IFSError::Corrupted(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn parsing_short_buffer_fails() {
        assert!(DiskHeader::parse(&[0; 8]).is_err());
    }

    #[test]
    fn rejects_empty_store() {
        assert!(DiskHeader::new(0).is_err());
    }
}
