use crate::chain::{Cursor, Mode};
use crate::fs::{IFSError, InodeFS};
use crate::handle::{DirectoryHandle, FileHandle};
use crate::io::BlockStorage;
use crate::node::{self, Inode, NodeType, TBA};

use log::{debug, warn};

/// Outcome of scanning a directory's chain.
struct Walk {
    /// The entry the visitor stopped at, with the cursor on its slot.
    hit: Option<(Inode, Cursor)>,
    /// First empty slot met on the way.
    free: Option<Cursor>,
    /// Cursor past the last existing slot.
    end: Cursor,
}

impl<T: BlockStorage> InodeFS<T> {
    /// Creates an empty file in `dir`.
    ///
    /// # Errors
    ///
    /// Fails with `AlreadyExists` when any entry of `dir` is named `name`, and
    /// with `DiskFull` or `NodeFull` when the entry cannot be placed. Nothing is
    /// left allocated in the failing cases.
    pub fn create_file(
        &mut self,
        dir: &mut DirectoryHandle,
        name: &str,
    ) -> Result<FileHandle, IFSError> {
        let file = self.create_node(dir, name, NodeType::File)?;
        Ok(FileHandle::new(file, dir.block()))
    }

    /// Creates an empty subdirectory in `dir`. The handle stays on `dir`.
    pub fn mkdir(&mut self, dir: &mut DirectoryHandle, name: &str) -> Result<(), IFSError> {
        self.create_node(dir, name, NodeType::Directory)?;
        Ok(())
    }

    /// Opens the file called `name` inside `dir`.
    pub fn open_file(
        &mut self,
        dir: &mut DirectoryHandle,
        name: &str,
    ) -> Result<FileHandle, IFSError> {
        node::encode_name(name)?;
        let walk = self.walk_dir(dir, |child| child.name_bytes() == name.as_bytes())?;
        match walk.hit {
            Some((file, cursor)) if !file.is_dir() => {
                dir.cursor = cursor;
                Ok(FileHandle::new(file, dir.block()))
            }
            _ => Err(IFSError::NotFound(name.to_string())),
        }
    }

    /// Lists the names of every entry of `dir`, in chain order.
    pub fn read_dir(&mut self, dir: &mut DirectoryHandle) -> Result<Vec<String>, IFSError> {
        let mut names = Vec::with_capacity(dir.len());
        self.walk_dir(dir, |child| {
            names.push(child.name().into_owned());
            false
        })?;
        Ok(names)
    }

    /// Moves `dir` into the subdirectory `name`, or into its parent for `".."`.
    /// Going up from the root leaves the handle where it is.
    pub fn change_dir(&mut self, dir: &mut DirectoryHandle, name: &str) -> Result<(), IFSError> {
        if name == ".." {
            let parent = match dir.parent.as_ref() {
                Some(parent) => parent.block(),
                None => return Ok(()),
            };
            let inode = self.load_inode(parent)?;
            let grandparent = match inode.fcb.ncb.parent_directory_block {
                TBA => None,
                blocknr => Some(self.load_inode(blocknr as usize)?),
            };
            *dir = DirectoryHandle::new(inode, grandparent);
            return Ok(());
        }

        node::encode_name(name)?;
        let walk = self.walk_dir(dir, |child| child.name_bytes() == name.as_bytes())?;
        match walk.hit {
            Some((child, _)) if child.is_dir() => {
                let current = dir.inode;
                *dir = DirectoryHandle::new(child, Some(current));
                Ok(())
            }
            _ => Err(IFSError::NotFound(name.to_string())),
        }
    }

    fn create_node(
        &mut self,
        dir: &mut DirectoryHandle,
        name: &str,
        node_type: NodeType,
    ) -> Result<Inode, IFSError> {
        node::encode_name(name)?;
        let walk = self.walk_dir(dir, |child| child.name_bytes() == name.as_bytes())?;
        if walk.hit.is_some() {
            warn!("{:?} already exists in {:?}", name, dir.name());
            return Err(IFSError::AlreadyExists(name.to_string()));
        }

        // A fresh level always starts filling at its first slot.
        let (mut cursor, extend) = match walk.free {
            Some(cursor) => (cursor, false),
            None => (walk.end, true),
        };
        let slot = if extend { 0 } else { cursor.pos_in_node };

        let blocknr = self.allocate()?;
        let parent = dir.inode.block() as i32;
        let child = Inode::new(blocknr, slot as i32, parent, node_type, name)?;
        self.put_inode(&child)?;

        if extend {
            match self.advance_indirection(&mut dir.inode, &mut cursor, Mode::Write) {
                Ok(true) => (),
                Ok(false) => {
                    self.disk.free_block(blocknr)?;
                    return Err(IFSError::NodeFull);
                }
                Err(err) => {
                    self.disk.free_block(blocknr)?;
                    return Err(err);
                }
            }
        }
        self.link_slot(&mut dir.inode, &mut cursor, blocknr)?;
        cursor.current_block = child.header;
        dir.cursor = cursor;

        debug!(
            "created {:?} {:?} at block {} in {:?}",
            node_type,
            name,
            blocknr,
            dir.name()
        );
        Ok(child)
    }

    /// Visits the inode of every entry of `dir` until `visit` returns true,
    /// noting the first free slot. `dir`'s copy of its inode is refreshed first.
    fn walk_dir<F>(&mut self, dir: &mut DirectoryHandle, mut visit: F) -> Result<Walk, IFSError>
    where
        F: FnMut(&Inode) -> bool,
    {
        dir.inode = self.load_inode(dir.block())?;
        let mut free = None;
        let mut cursor = Cursor::new(&dir.inode);

        while self.advance_indirection(&mut dir.inode, &mut cursor, Mode::Read)? {
            match cursor.entry(&dir.inode) {
                TBA => {
                    if free.is_none() {
                        free = Some(cursor.clone());
                    }
                }
                blocknr => {
                    let child = self.load_inode(blocknr as usize)?;
                    if visit(&child) {
                        cursor.current_block = child.header;
                        return Ok(Walk {
                            hit: Some((child, cursor.clone())),
                            free,
                            end: cursor,
                        });
                    }
                }
            }
            cursor.pos_in_node += 1;
        }

        Ok(Walk {
            hit: None,
            free,
            end: cursor,
        })
    }
}
