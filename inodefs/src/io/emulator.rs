use crate::io::BlockStorage;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;

use log::trace;

pub struct FileBlockEmulator {
    /// The file is sized once by the block store and never grows on its own.
    fd: File,
    /// Cached length of the file in bytes.
    len: u64,
}

/// Emulates block disk/flash storage in userspace using a file as block storage.
/// Every read and write goes straight to the file, so changes are visible to
/// anyone reopening it even before `sync_disk` is called.
impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, offset: u64, len: usize) -> std::io::Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "access beyond the end of the medium",
            )),
        }
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dest)?;
        FileBlockEmulatorBuilder::from(file).build()
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        self.fd.set_len(len)?;
        self.len = len;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(offset, buf.len())?;
        trace!("reading {} bytes at offset {}", buf.len(), offset);
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(offset, buf.len())?;
        trace!("writing {} bytes at offset {}", buf.len(), offset);
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    clear_medium: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            clear_medium: false,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Discards whatever the file holds so the emulator starts out as an empty,
    /// uninitialized medium.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear_medium = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, when asked
    /// to clear the medium, does destructive things to it. Ownership of the file
    /// is transfered to the emulator meaning this builder can only be used to
    /// create one emulator.
    pub fn build(self) -> std::io::Result<FileBlockEmulator> {
        if self.clear_medium {
            self.fd.set_len(0)?;
        }
        let len = self.fd.metadata()?.len();
        Ok(FileBlockEmulator { fd: self.fd, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_medium(len: u64) -> FileBlockEmulator {
        let fd = tempfile::tempfile().unwrap();
        let mut emu = FileBlockEmulatorBuilder::from(fd)
            .build()
            .expect("failed to build emulator");
        emu.set_len(len).unwrap();
        emu
    }

    #[test]
    fn set_len_sizes_the_file() {
        let mut emu = create_test_medium(4 * 512);
        emu.sync_disk().unwrap();
        assert_eq!(emu.len(), 4 * 512);
        assert_eq!(emu.into_file().metadata().unwrap().len(), 4 * 512);
    }

    #[test]
    fn can_read_and_write_at_offsets() {
        let mut emu = create_test_medium(2048);

        emu.write_at(700, &[0x55; 100]).unwrap();

        let mut untouched = vec![0xff; 100];
        emu.read_at(0, &mut untouched).unwrap();
        assert_eq!(untouched, vec![0x00; 100]);

        let mut written = vec![0x00; 100];
        emu.read_at(700, &mut written).unwrap();
        assert_eq!(written, vec![0x55; 100]);
    }

    #[test]
    fn can_read_and_write_start_and_end_of_medium() {
        let mut emu = create_test_medium(1024);

        emu.write_at(0, &[0x11; 512]).unwrap();
        emu.write_at(512, &[0x22; 512]).unwrap();

        let mut buf = vec![0; 512];
        emu.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, vec![0x11; 512]);
        emu.read_at(512, &mut buf).unwrap();
        assert_eq!(buf, vec![0x22; 512]);
    }

    #[test]
    fn access_beyond_range_returns_error() {
        let mut emu = create_test_medium(512);

        let wresult = emu.write_at(256, &[0x55; 512]);
        assert!(wresult.is_err(), "expected an error, got result instead");

        let mut buf = vec![0; 1];
        assert!(emu.read_at(512, &mut buf).is_err());
    }

    #[test]
    fn clear_medium_discards_contents() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut emu = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .build()
            .unwrap();
        emu.set_len(512).unwrap();
        emu.write_at(0, &[0x55; 512]).unwrap();

        let kept = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .build()
            .unwrap();
        assert_eq!(kept.len(), 512);

        let cleared = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .clear_medium(true)
            .build()
            .unwrap();
        assert!(cleared.is_empty());
    }

    #[test]
    fn open_disk_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let emu = FileBlockEmulator::open_disk(dir.path().join("disk.img")).unwrap();
        assert!(emu.is_empty());
    }
}
