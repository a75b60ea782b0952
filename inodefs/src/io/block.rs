use std::path::Path;

/// A byte addressable medium backing a block store. The store lays its header,
/// bitmap and blocks out over one contiguous region of the medium and addresses
/// them by byte offset.
///
/// Implementations are not expected to buffer: a completed `write_at` must be
/// visible to any later `read_at`, even through a freshly opened medium.
pub trait BlockStorage {
    /// Opens the medium at the specified path, creating an empty one if nothing
    /// exists there yet. This method does not validate the contents, it is up to
    /// clients to decide whether the medium needs initializing.
    fn open_disk<P: AsRef<Path>>(path: P) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// The current length of the medium in bytes.
    fn len(&self) -> u64;
    /// A medium of zero length has never been initialized.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Grows or shrinks the medium to exactly `len` bytes. Grown space reads as
    /// zeroes.
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;
    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Attempting to read past the end of the medium will return an error.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes `buf` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Attempting to write past the end of the medium will return an error.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}
