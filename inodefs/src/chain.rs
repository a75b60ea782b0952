//! Navigation of a node's block chain: the direct array, then the single indirect
//! node, then the leaves of the double indirect node.

use crate::fs::{IFSError, InodeFS};
use crate::io::BlockStorage;
use crate::node::{
    BlockHeader, IndirectNode, Inode, DIRECT_ENTRIES, DOUBLE_INDIRECT_SLOT, INDIRECT_ENTRIES,
    SINGLE_INDIRECT_SLOT, TBA,
};

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Missing nodes end the walk.
    Read,
    /// Missing nodes are allocated and linked.
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Direct,
    Single,
    /// A leaf of the double indirect node, held by slot `outer` of it.
    Double { outer: usize },
}

/// Position inside a node's chain. The cursor owns a copy of the index node it is
/// walking, so cloning a cursor never lets two cursors share one.
#[derive(Debug, Clone)]
pub struct Cursor {
    /// None while walking the inode's own direct array.
    pub(crate) indirect: Option<IndirectNode>,
    /// Header of the block last touched through this cursor.
    pub(crate) current_block: BlockHeader,
    /// Slot in the current level's array.
    pub(crate) pos_in_node: usize,
    /// Offset inside the data block at `pos_in_node`.
    pub(crate) pos_in_block: usize,
    /// Absolute byte position, only meaningful for files.
    pub(crate) offset: usize,
}

impl Cursor {
    pub(crate) fn new(anchor: &Inode) -> Self {
        Self {
            indirect: None,
            current_block: anchor.header,
            pos_in_node: 0,
            pos_in_block: 0,
            offset: 0,
        }
    }

    pub fn level(&self, node: &Inode) -> Level {
        match &self.indirect {
            None => Level::Direct,
            Some(index) if index.ncb.upper == node.double_indirect => Level::Double {
                outer: index.header.block_in_node as usize,
            },
            Some(_) => Level::Single,
        }
    }

    pub fn pos_in_node(&self) -> usize {
        self.pos_in_node
    }

    pub fn pos_in_block(&self) -> usize {
        self.pos_in_block
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn current_block(&self) -> &BlockHeader {
        &self.current_block
    }

    fn capacity(&self) -> usize {
        match self.indirect {
            None => DIRECT_ENTRIES,
            Some(_) => INDIRECT_ENTRIES,
        }
    }

    /// The block index stored in the slot under the cursor.
    pub(crate) fn entry(&self, node: &Inode) -> i32 {
        match &self.indirect {
            None => node.blocks[self.pos_in_node],
            Some(index) => index.blocks[self.pos_in_node],
        }
    }

    pub(crate) fn enter(&mut self, index: IndirectNode) {
        self.current_block = index.header;
        self.indirect = Some(index);
        self.pos_in_node = 0;
        self.pos_in_block = 0;
    }
}

impl<T: BlockStorage> InodeFS<T> {
    /// Moves `cursor` onto the next level of `node`'s chain once its slot index has
    /// run past the current level.
    ///
    /// Returns false when there is no next level: in `Read` mode because it does
    /// not exist yet, in either mode once the last double indirect leaf is full.
    /// In `Write` mode missing index nodes are allocated, and every link is
    /// persisted together with the node holding it before the cursor moves.
    pub(crate) fn advance_indirection(
        &mut self,
        node: &mut Inode,
        cursor: &mut Cursor,
        mode: Mode,
    ) -> Result<bool, IFSError> {
        if cursor.pos_in_node < cursor.capacity() {
            return Ok(true);
        }

        match cursor.level(node) {
            Level::Direct => {
                let single = match node.single_indirect {
                    TBA if mode == Mode::Read => return Ok(false),
                    TBA => {
                        let upper = node.header.block_in_disk;
                        let single = self.new_index(node, SINGLE_INDIRECT_SLOT, upper)?;
                        node.single_indirect = single.header.block_in_disk;
                        node.grow();
                        self.put_inode(node)?;
                        debug!(
                            "{:?} grew a single indirect node at block {}",
                            node.name(),
                            single.block()
                        );
                        single
                    }
                    blocknr => self.load_index(blocknr as usize)?,
                };
                cursor.enter(single);
                Ok(true)
            }
            Level::Single => {
                let mut double = match node.double_indirect {
                    TBA if mode == Mode::Read => return Ok(false),
                    TBA => {
                        let upper = node.header.block_in_disk;
                        let double = self.new_index(node, DOUBLE_INDIRECT_SLOT, upper)?;
                        node.double_indirect = double.header.block_in_disk;
                        node.grow();
                        self.put_inode(node)?;
                        debug!(
                            "{:?} grew a double indirect node at block {}",
                            node.name(),
                            double.block()
                        );
                        double
                    }
                    blocknr => self.load_index(blocknr as usize)?,
                };
                self.enter_leaf(node, &mut double, 0, cursor, mode)
            }
            Level::Double { outer } => {
                if outer + 1 >= INDIRECT_ENTRIES {
                    return Ok(false);
                }
                let mut double = self.load_index(node.double_indirect as usize)?;
                self.enter_leaf(node, &mut double, outer + 1, cursor, mode)
            }
        }
    }

    /// Stores `blocknr` in the slot under `cursor` and persists the node holding
    /// the slot along with `node`'s entry count.
    pub(crate) fn link_slot(
        &mut self,
        node: &mut Inode,
        cursor: &mut Cursor,
        blocknr: usize,
    ) -> Result<(), IFSError> {
        match cursor.indirect.as_mut() {
            None => node.blocks[cursor.pos_in_node] = blocknr as i32,
            Some(index) => {
                index.blocks[cursor.pos_in_node] = blocknr as i32;
                index.num_entries += 1;
                self.put_index(index)?;
            }
        }
        node.num_entries += 1;
        self.put_inode(node)
    }

    /// Re-reads `node` and the index node held by `cursor`, so that a handle
    /// picks up changes made through another handle since it last ran.
    pub(crate) fn resync(&mut self, node: &mut Inode, cursor: &mut Cursor) -> Result<(), IFSError> {
        *node = self.load_inode(node.block())?;
        if let Some(index) = cursor.indirect.as_mut() {
            *index = self.load_index(index.block())?;
        }
        Ok(())
    }

    /// Places a cursor on the slot addressing the `logical`-th entry of `node`'s
    /// chain. Returns None when an index node on the way does not exist.
    pub(crate) fn locate(
        &mut self,
        node: &Inode,
        logical: usize,
    ) -> Result<Option<Cursor>, IFSError> {
        let mut cursor = Cursor::new(node);
        if logical < DIRECT_ENTRIES {
            cursor.pos_in_node = logical;
            return Ok(Some(cursor));
        }

        let logical = logical - DIRECT_ENTRIES;
        if logical < INDIRECT_ENTRIES {
            if node.single_indirect == TBA {
                return Ok(None);
            }
            cursor.enter(self.load_index(node.single_indirect as usize)?);
            cursor.pos_in_node = logical;
            return Ok(Some(cursor));
        }

        let logical = logical - INDIRECT_ENTRIES;
        let outer = logical / INDIRECT_ENTRIES;
        if outer >= INDIRECT_ENTRIES || node.double_indirect == TBA {
            return Ok(None);
        }
        let double = self.load_index(node.double_indirect as usize)?;
        match double.blocks[outer] {
            TBA => Ok(None),
            leaf => {
                cursor.enter(self.load_index(leaf as usize)?);
                cursor.pos_in_node = logical % INDIRECT_ENTRIES;
                Ok(Some(cursor))
            }
        }
    }

    fn enter_leaf(
        &mut self,
        node: &mut Inode,
        double: &mut IndirectNode,
        outer: usize,
        cursor: &mut Cursor,
        mode: Mode,
    ) -> Result<bool, IFSError> {
        let leaf = match double.blocks[outer] {
            TBA if mode == Mode::Read => return Ok(false),
            TBA => {
                let upper = double.header.block_in_disk;
                let leaf = self.new_index(node, outer as i32, upper)?;
                double.blocks[outer] = leaf.header.block_in_disk;
                double.num_entries += 1;
                self.put_index(double)?;
                node.grow();
                self.put_inode(node)?;
                debug!(
                    "{:?} grew double indirect leaf {} at block {}",
                    node.name(),
                    outer,
                    leaf.block()
                );
                leaf
            }
            blocknr => self.load_index(blocknr as usize)?,
        };
        cursor.enter(leaf);
        Ok(true)
    }

    /// Allocates and writes an empty index node owned by `node`.
    fn new_index(&mut self, node: &Inode, slot: i32, upper: i32) -> Result<IndirectNode, IFSError> {
        let blocknr = self.allocate()?;
        let parent = node.fcb.ncb.parent_directory_block;
        let index = IndirectNode::new(blocknr, slot, upper, parent);
        self.put_index(&index)?;
        Ok(index)
    }
}
