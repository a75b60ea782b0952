mod block;
mod emulator;

pub use block::BlockStorage;
pub use emulator::{FileBlockEmulator, FileBlockEmulatorBuilder};
