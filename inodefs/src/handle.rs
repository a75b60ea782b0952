use crate::chain::Cursor;
use crate::node::Inode;

/// An open directory.
///
/// The handle owns a copy of the directory's inode and of its parent's, which
/// are refreshed by the filesystem operations that take the handle. Dropping it
/// leaves the disk untouched.
#[derive(Debug, Clone)]
pub struct DirectoryHandle {
    pub(crate) inode: Inode,
    pub(crate) parent: Option<Inode>,
    pub(crate) cursor: Cursor,
}

impl DirectoryHandle {
    pub(crate) fn new(inode: Inode, parent: Option<Inode>) -> Self {
        let cursor = Cursor::new(&inode);
        Self {
            inode,
            parent,
            cursor,
        }
    }

    pub fn name(&self) -> String {
        self.inode.name().into_owned()
    }

    /// Block of the directory's inode.
    pub fn block(&self) -> usize {
        self.inode.block()
    }

    /// Number of entries the directory holds.
    pub fn len(&self) -> usize {
        self.inode.num_entries as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inode of the enclosing directory, None for the root.
    pub fn parent(&self) -> Option<&Inode> {
        self.parent.as_ref()
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn close(self) {}
}

/// An open file with its own read/write position.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub(crate) inode: Inode,
    pub(crate) directory: usize,
    pub(crate) cursor: Cursor,
}

impl FileHandle {
    pub(crate) fn new(inode: Inode, directory: usize) -> Self {
        let cursor = Cursor::new(&inode);
        Self {
            inode,
            directory,
            cursor,
        }
    }

    pub fn name(&self) -> String {
        self.inode.name().into_owned()
    }

    pub fn block(&self) -> usize {
        self.inode.block()
    }

    /// Block of the directory holding the file.
    pub fn directory(&self) -> usize {
        self.directory
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode.is_empty()
    }

    /// Current byte offset of the cursor.
    pub fn position(&self) -> usize {
        self.cursor.offset
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn close(self) {}
}
