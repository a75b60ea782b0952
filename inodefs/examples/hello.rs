//! Builds a small tree on a throwaway disk image and prints it back.
//!
//! Run with `RUST_LOG=debug` to follow block allocation.
use inodefs::io::FileBlockEmulator;
use inodefs::{BlockStore, DirectoryHandle, IFSError, InodeFS};

fn list(
    fs: &mut InodeFS<FileBlockEmulator>,
    dir: &mut DirectoryHandle,
    depth: usize,
) -> Result<(), IFSError> {
    for name in fs.read_dir(dir)? {
        println!("{}{}", "  ".repeat(depth), name);
        let mut child = dir.clone();
        if fs.change_dir(&mut child, &name).is_ok() {
            list(fs, &mut child, depth + 1)?;
        }
    }
    Ok(())
}

fn main() -> Result<(), IFSError> {
    env_logger::init();

    let image = tempfile::NamedTempFile::new()?;
    let mut fs = InodeFS::new(BlockStore::<FileBlockEmulator>::init(image.path(), 1024)?);
    let mut root = match fs.init() {
        Err(IFSError::NeedsFormat) => {
            fs.format()?;
            fs.init()?
        }
        other => other?,
    };

    fs.mkdir(&mut root, "docs")?;
    let mut docs = root.clone();
    fs.change_dir(&mut docs, "docs")?;
    let mut file = fs.create_file(&mut docs, "hello.txt")?;
    let text = "hello from inodefs\n".repeat(100);
    fs.write(&mut file, text.as_bytes())?;

    fs.seek(&mut file, 0)?;
    let mut line = [0; 19];
    fs.read(&mut file, &mut line)?;
    print!("{}", String::from_utf8_lossy(&line));
    println!("{} is {} bytes", file.name(), file.len());
    file.close();

    list(&mut fs, &mut root, 0)?;
    fs.flush()?;
    println!("{} blocks free", fs.disk().free_blocks());
    Ok(())
}
