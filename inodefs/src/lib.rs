//! An inode filesystem stored in a single backing file.
//!
//! The backing file is split into a header, an allocation bitmap and an array of
//! 512 byte blocks. Directories and files are trees of those blocks rooted at an
//! inode, with a direct array, a single indirect node and a double indirect node.
//!
//! ```no_run
//! use inodefs::{BlockStore, IFSError, InodeFS};
//! use inodefs::io::FileBlockEmulator;
//!
//! # fn main() -> Result<(), IFSError> {
//! let disk: BlockStore<FileBlockEmulator> = BlockStore::init("disk.img", 1024)?;
//! let mut fs = InodeFS::new(disk);
//! let mut root = match fs.init() {
//!     Err(IFSError::NeedsFormat) => {
//!         fs.format()?;
//!         fs.init()?
//!     }
//!     other => other?,
//! };
//! let mut file = fs.create_file(&mut root, "hello.txt")?;
//! fs.write(&mut file, b"hello")?;
//! fs.flush()?;
//! # Ok(())
//! # }
//! ```
mod alloc;
mod chain;
mod dir;
mod disk;
mod file;
mod fs;
mod handle;
mod header;
pub mod io;
mod node;

pub use crate::alloc::{Bitmap, EntryKey, State};
pub use crate::chain::{Cursor, Level};
pub use crate::disk::BlockStore;
pub use crate::fs::{IFSError, InodeFS, ROOT_BLOCK};
pub use crate::handle::{DirectoryHandle, FileHandle};
pub use crate::header::{DiskHeader, BLOCK_SIZE};
pub use crate::node::{
    BlockHeader, DataBlock, FileControlBlock, IndirectNode, Inode, NodeControlBlock, NodeType,
    DIRECT_ENTRIES, INDIRECT_ENTRIES, NAME_SIZE, PAYLOAD_SIZE, TBA,
};
