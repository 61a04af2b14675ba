use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Held for the lifetime of `serve`; the OS releases the lock on exit.
pub struct InstanceLock {
    _file: File,
}

/// Take the daemon lock. `Ok(None)` means another daemon already holds it.
pub fn acquire_lock(path: &Path) -> io::Result<Option<InstanceLock>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;

    match file.try_lock_exclusive() {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => return Ok(None),
        Err(err) => return Err(err),
    }

    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(Some(InstanceLock { _file: file }))
}
