use crate::fs::IFSError;
use crate::header::BLOCK_SIZE;
use std::borrow::Cow;
use std::convert::TryFrom;
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Marks an index or status field as absent or not yet allocated.
pub const TBA: i32 = -1;
/// Bytes reserved for a name, including the terminating NUL.
pub const NAME_SIZE: usize = 128;

/// Slots in an inode's direct array.
pub const DIRECT_ENTRIES: usize = (BLOCK_SIZE
    - size_of::<BlockHeader>()
    - size_of::<FileControlBlock>()
    - 3 * size_of::<i32>())
    / size_of::<i32>();
/// Slots in an indirect node's array.
pub const INDIRECT_ENTRIES: usize =
    (BLOCK_SIZE - size_of::<BlockHeader>() - size_of::<NodeControlBlock>() - size_of::<i32>())
        / size_of::<i32>();
/// Bytes of file content held by one data block.
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - size_of::<BlockHeader>();

/// `block_in_node` of a single indirect node, the slot right after the direct array.
pub const SINGLE_INDIRECT_SLOT: i32 = DIRECT_ENTRIES as i32;
/// `block_in_node` of a double indirect node.
pub const DOUBLE_INDIRECT_SLOT: i32 = DIRECT_ENTRIES as i32 + 1;

const _: () = assert!(size_of::<Inode>() == BLOCK_SIZE);
const _: () = assert!(size_of::<IndirectNode>() == BLOCK_SIZE);
const _: () = assert!(size_of::<DataBlock>() == BLOCK_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// A block holding further block indices.
    Index,
    File,
    Directory,
}

impl NodeType {
    /// The tag stored on disk.
    pub fn raw(self) -> i32 {
        match self {
            NodeType::Index => -1,
            NodeType::File => 0,
            NodeType::Directory => 1,
        }
    }
}

impl TryFrom<i32> for NodeType {
    type Error = IFSError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            -1 => Ok(NodeType::Index),
            0 => Ok(NodeType::File),
            1 => Ok(NodeType::Directory),
            other => Err(IFSError::Corrupted(format!("unknown node type {}", other))),
        }
    }
}

/// Leads every block on disk.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Logical index of a data block inside its file, TBA for inodes and index nodes.
    pub block_in_file: i32,
    /// Slot holding this block in the parent's index array.
    pub block_in_node: i32,
    /// The block's own position on disk, checked whenever the block is loaded.
    pub block_in_disk: i32,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeControlBlock {
    /// Inode of the directory holding this node, TBA for the root.
    pub parent_directory_block: i32,
    /// Repeats the header's `block_in_disk`.
    pub block_in_disk: i32,
    /// Block of the enclosing node for index nodes, TBA for inodes.
    pub upper: i32,
    pub node_type: i32,
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileControlBlock {
    /// Logical length for files, footprint on disk for directories.
    pub size_in_bytes: i32,
    /// Every block owned by the node: its inode, index nodes and data blocks.
    pub size_in_blocks: i32,
    pub ncb: NodeControlBlock,
    /// NUL padded name, unique inside the parent directory.
    pub name: [u8; NAME_SIZE],
}

/// Root block of a file or directory.
///
/// The direct array fills the rest of the block. Once it runs out, entries
/// continue in the single indirect node and then in the leaves of the double
/// indirect node. For files entries point at data blocks, for directories they
/// point at the inodes of the children.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub header: BlockHeader,
    pub fcb: FileControlBlock,
    /// Live entries across the whole chain.
    pub num_entries: i32,
    pub single_indirect: i32,
    pub double_indirect: i32,
    pub blocks: [i32; DIRECT_ENTRIES],
}

impl Inode {
    /// Builds an empty node stored at `blocknr` and linked from `slot` of its
    /// parent directory.
    pub fn new(
        blocknr: usize,
        slot: i32,
        parent: i32,
        node_type: NodeType,
        name: &str,
    ) -> Result<Self, IFSError> {
        let name = encode_name(name)?;
        let size_in_bytes = match node_type {
            NodeType::Directory => BLOCK_SIZE as i32,
            NodeType::File => 0,
            NodeType::Index => {
                return Err(IFSError::InvalidArgument(
                    "an inode must be a file or a directory".to_string(),
                ))
            }
        };
        Ok(Self {
            header: BlockHeader {
                block_in_file: TBA,
                block_in_node: slot,
                block_in_disk: blocknr as i32,
            },
            fcb: FileControlBlock {
                size_in_bytes,
                size_in_blocks: 1,
                ncb: NodeControlBlock {
                    parent_directory_block: parent,
                    block_in_disk: blocknr as i32,
                    upper: TBA,
                    node_type: node_type.raw(),
                },
                name,
            },
            num_entries: 0,
            single_indirect: TBA,
            double_indirect: TBA,
            blocks: [TBA; DIRECT_ENTRIES],
        })
    }

    /// Reads an inode out of a block buffer.
    pub fn parse(buf: &[u8]) -> Result<Self, IFSError> {
        let node = Self::read_from(buf)
            .ok_or_else(|| IFSError::InvalidArgument("buffer is not one block".to_string()))?;
        match node.node_type()? {
            NodeType::File | NodeType::Directory => Ok(node),
            NodeType::Index => Err(IFSError::Corrupted(format!(
                "block {} holds an index node, not an inode",
                node.header.block_in_disk
            ))),
        }
    }

    pub fn node_type(&self) -> Result<NodeType, IFSError> {
        NodeType::try_from(self.fcb.ncb.node_type)
    }

    pub fn is_dir(&self) -> bool {
        self.fcb.ncb.node_type == NodeType::Directory.raw()
    }

    pub fn block(&self) -> usize {
        self.header.block_in_disk as usize
    }

    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .fcb
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_SIZE);
        &self.fcb.name[..end]
    }

    /// Logical length of a file.
    pub fn len(&self) -> usize {
        self.fcb.size_in_bytes as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounts for one more block owned by the node.
    pub(crate) fn grow(&mut self) {
        self.fcb.size_in_blocks += 1;
        if self.is_dir() {
            self.fcb.size_in_bytes += BLOCK_SIZE as i32;
        }
    }
}

/// A block holding only further block indices.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectNode {
    pub header: BlockHeader,
    pub ncb: NodeControlBlock,
    /// Live entries in this node's own array.
    pub num_entries: i32,
    pub blocks: [i32; INDIRECT_ENTRIES],
}

impl IndirectNode {
    /// Builds an empty index node at `blocknr`, held by `slot` of the node at `upper`.
    pub fn new(blocknr: usize, slot: i32, upper: i32, parent: i32) -> Self {
        Self {
            header: BlockHeader {
                block_in_file: TBA,
                block_in_node: slot,
                block_in_disk: blocknr as i32,
            },
            ncb: NodeControlBlock {
                parent_directory_block: parent,
                block_in_disk: blocknr as i32,
                upper,
                node_type: NodeType::Index.raw(),
            },
            num_entries: 0,
            blocks: [TBA; INDIRECT_ENTRIES],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, IFSError> {
        let node = Self::read_from(buf)
            .ok_or_else(|| IFSError::InvalidArgument("buffer is not one block".to_string()))?;
        match NodeType::try_from(node.ncb.node_type)? {
            NodeType::Index => Ok(node),
            NodeType::File | NodeType::Directory => Err(IFSError::Corrupted(format!(
                "block {} holds an inode, not an index node",
                node.header.block_in_disk
            ))),
        }
    }

    pub fn block(&self) -> usize {
        self.header.block_in_disk as usize
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlock {
    pub header: BlockHeader,
    pub data: [u8; PAYLOAD_SIZE],
}

impl DataBlock {
    pub fn new(blocknr: usize, slot: usize, block_in_file: usize) -> Self {
        Self {
            header: BlockHeader {
                block_in_file: block_in_file as i32,
                block_in_node: slot as i32,
                block_in_disk: blocknr as i32,
            },
            data: [0; PAYLOAD_SIZE],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, IFSError> {
        Self::read_from(buf)
            .ok_or_else(|| IFSError::InvalidArgument("buffer is not one block".to_string()))
    }

    pub fn block(&self) -> usize {
        self.header.block_in_disk as usize
    }
}

/// Checks a user supplied name and pads it into the on-disk representation.
pub(crate) fn encode_name(name: &str) -> Result<[u8; NAME_SIZE], IFSError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(IFSError::InvalidArgument(format!(
            "{:?} is not a valid name",
            name
        )));
    }
    if name.len() >= NAME_SIZE {
        return Err(IFSError::InvalidArgument(format!(
            "names are limited to {} bytes",
            NAME_SIZE - 1
        )));
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(IFSError::InvalidArgument(format!(
            "{:?} contains a reserved character",
            name
        )));
    }
    let mut encoded = [0; NAME_SIZE];
    encoded[..name.len()].copy_from_slice(name.as_bytes());
    Ok(encoded)
}

/// Encodes the root directory's name, which `encode_name` refuses.
pub(crate) fn root_name() -> [u8; NAME_SIZE] {
    let mut encoded = [0; NAME_SIZE];
    encoded[0] = b'/';
    encoded
}
