use crate::alloc::State;
use crate::disk::BlockStore;
use crate::handle::DirectoryHandle;
use crate::header::BLOCK_SIZE;
use crate::io::BlockStorage;
use crate::node::{self, DataBlock, IndirectNode, Inode, NodeType, INDIRECT_ENTRIES, TBA};

use log::{debug, info};
use thiserror::Error;
use zerocopy::AsBytes;

/// Block holding the root directory's inode.
pub const ROOT_BLOCK: usize = 0;

#[derive(Error, Debug)]
pub enum IFSError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("found nothing named {0:?}")]
    NotFound(String),
    #[error("an entry named {0:?} already exists")]
    AlreadyExists(String),
    #[error("no free block left on disk")]
    DiskFull,
    #[error("node has no addressable slot left")]
    NodeFull,
    #[error("disk holds no filesystem, format it first")]
    NeedsFormat,
    #[error("inconsistent block layout: {0}")]
    Corrupted(String),
    #[error("store is unusable after a failed flush")]
    Poisoned,
    #[error("block device fault")]
    IOFault(#[from] std::io::Error),
}

/// An inode filesystem on top of a block store.
///
/// Directories and files are trees of blocks rooted at an inode. Handles returned
/// by the filesystem own copies of the nodes they work on and are passed back into
/// every operation; they never alias the store. The filesystem expects to be the
/// sole user of its store.
///
/// # Layout
/// ====================================================================
/// | Inode | direct slots -> data blocks or child inodes              |
/// |       | single indirect -> [slots]                               |
/// |       | double indirect -> [index nodes -> [slots]]              |
/// ====================================================================
pub struct InodeFS<T: BlockStorage> {
    pub(crate) disk: BlockStore<T>,
}

impl<T: BlockStorage> InodeFS<T> {
    pub fn new(disk: BlockStore<T>) -> Self {
        Self { disk }
    }

    pub fn disk(&self) -> &BlockStore<T> {
        &self.disk
    }

    /// Gives the block store back, dropping the filesystem.
    pub fn into_disk(self) -> BlockStore<T> {
        self.disk
    }

    /// Releases every block on disk and writes an empty root directory named "/"
    /// into the first block.
    pub fn format(&mut self) -> Result<(), IFSError> {
        info!("formatting {} blocks", self.disk.num_blocks());
        for blocknr in 0..self.disk.num_blocks() {
            self.disk.free_block(blocknr)?;
        }

        let mut root = Inode::new(ROOT_BLOCK, TBA, TBA, NodeType::Directory, "root")?;
        root.fcb.name = node::root_name();
        self.put_inode(&root)
    }

    /// Opens the root directory.
    ///
    /// # Errors
    ///
    /// Returns `NeedsFormat` when the first block was never written, leaving the
    /// decision to format to the caller.
    pub fn init(&mut self) -> Result<DirectoryHandle, IFSError> {
        let mut buf = [0; BLOCK_SIZE];
        if let State::Free = self.disk.read_block(ROOT_BLOCK, &mut buf)? {
            return Err(IFSError::NeedsFormat);
        }
        let root = self.check_inode(ROOT_BLOCK, Inode::parse(&buf)?)?;
        if !root.is_dir() {
            return Err(IFSError::Corrupted(
                "first block does not hold a directory".to_string(),
            ));
        }
        info!(
            "opened root directory, {} blocks free",
            self.disk.free_blocks()
        );
        Ok(DirectoryHandle::new(root, None))
    }

    /// Forces every change onto durable storage.
    pub fn flush(&mut self) -> Result<(), IFSError> {
        self.disk.flush()
    }

    /// Picks the lowest free block.
    pub(crate) fn allocate(&mut self) -> Result<usize, IFSError> {
        let blocknr = self.disk.get_free_block(0).ok_or(IFSError::DiskFull)?;
        debug!("allocating block {}", blocknr);
        Ok(blocknr)
    }

    pub(crate) fn put_inode(&mut self, node: &Inode) -> Result<(), IFSError> {
        self.disk.write_block(node.block(), node.as_bytes())?;
        Ok(())
    }

    pub(crate) fn put_index(&mut self, node: &IndirectNode) -> Result<(), IFSError> {
        self.disk.write_block(node.block(), node.as_bytes())?;
        Ok(())
    }

    pub(crate) fn put_data(&mut self, block: &DataBlock) -> Result<(), IFSError> {
        self.disk.write_block(block.block(), block.as_bytes())?;
        Ok(())
    }

    pub(crate) fn load_inode(&mut self, blocknr: usize) -> Result<Inode, IFSError> {
        let buf = self.load_used(blocknr)?;
        let node = Inode::parse(&buf)?;
        self.check_inode(blocknr, node)
    }

    pub(crate) fn load_index(&mut self, blocknr: usize) -> Result<IndirectNode, IFSError> {
        let buf = self.load_used(blocknr)?;
        let node = IndirectNode::parse(&buf)?;
        if node.block() != blocknr || node.ncb.block_in_disk != node.header.block_in_disk {
            return Err(IFSError::Corrupted(format!(
                "index node loaded from block {} claims block {}",
                blocknr,
                node.block()
            )));
        }
        // Leaves record their slot in the double node, which chain walks index with.
        let slot = node.header.block_in_node;
        if slot < 0 || slot as usize >= INDIRECT_ENTRIES {
            return Err(IFSError::Corrupted(format!(
                "index node at block {} sits in slot {}",
                blocknr, slot
            )));
        }
        Ok(node)
    }

    pub(crate) fn load_data(&mut self, blocknr: usize) -> Result<DataBlock, IFSError> {
        let buf = self.load_used(blocknr)?;
        let block = DataBlock::parse(&buf)?;
        if block.block() != blocknr {
            return Err(IFSError::Corrupted(format!(
                "data block loaded from block {} claims block {}",
                blocknr,
                block.block()
            )));
        }
        Ok(block)
    }

    /// Reads a block that a node links to, which must be marked used.
    fn load_used(&mut self, blocknr: usize) -> Result<[u8; BLOCK_SIZE], IFSError> {
        let mut buf = [0; BLOCK_SIZE];
        match self.disk.read_block(blocknr, &mut buf)? {
            State::Used => Ok(buf),
            State::Free => Err(IFSError::Corrupted(format!(
                "linked block {} is marked free",
                blocknr
            ))),
        }
    }

    fn check_inode(&self, blocknr: usize, node: Inode) -> Result<Inode, IFSError> {
        if node.block() != blocknr || node.fcb.ncb.block_in_disk != node.header.block_in_disk {
            return Err(IFSError::Corrupted(format!(
                "inode loaded from block {} claims block {}",
                blocknr,
                node.block()
            )));
        }
        Ok(node)
    }
}
