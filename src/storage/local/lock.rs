//! Collection ownership.
//!
//! A started collection holds an exclusive advisory lock on
//! `<collection>.lock` and writes its process id into the file. A second
//! opener fails fast with `WouldBlock` and is told which process owns the
//! collection. Dropping the lock closes the handle, which releases it.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct CollectionLock {
    _file: File,
    path: PathBuf,
}

impl CollectionLock {
    /// Claims the collection guarded by `path` for this process.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another handle owns the collection
    /// - any error opening or writing the lock file
    pub fn acquire(path: &Path) -> IoResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if let Err(e) = sys::lock_exclusive(&file) {
            if e.kind() != ErrorKind::WouldBlock {
                return Err(e);
            }
            let owner = match read_owner(&mut file) {
                Some(pid) => format!("process {pid}"),
                None => "another process".to_string(),
            };
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("{} is held by {owner}", path.display()),
            ));
        }

        file.set_len(0)?;
        file.write_all(std::process::id().to_string().as_bytes())?;
        file.sync_data()?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process id recorded in the lock file at `path`, if any.
    #[must_use]
    pub fn owner(path: &Path) -> Option<u32> {
        let mut file = File::open(path).ok()?;
        read_owner(&mut file)
    }
}

fn read_owner(file: &mut File) -> Option<u32> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io::{Error as IoError, Result as IoResult};
    use std::os::unix::io::AsRawFd;

    pub fn lock_exclusive(file: &File) -> IoResult<()> {
        // SAFETY: the descriptor stays open for the duration of the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            Ok(())
        } else {
            // EWOULDBLOCK already maps to ErrorKind::WouldBlock.
            Err(IoError::last_os_error())
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io::{Error as IoError, ErrorKind, Result as IoResult};
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // Locks a byte past any pid text so the owner stays readable.
    const LOCK_OFFSET: u32 = 1 << 20;

    pub fn lock_exclusive(file: &File) -> IoResult<()> {
        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: the handle is owned by `file`; an all-zero OVERLAPPED is valid.
        let ok = unsafe {
            let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
            overlapped.Anonymous.Anonymous.Offset = LOCK_OFFSET;
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };
        if ok != 0 {
            return Ok(());
        }
        let err = IoError::last_os_error();
        if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
            return Err(IoError::new(ErrorKind::WouldBlock, err));
        }
        Err(err)
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io::{Error as IoError, ErrorKind, Result as IoResult};

    pub fn lock_exclusive(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "collection locking is not available on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_owner_is_recorded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.lock");
        let lock = CollectionLock::acquire(&path).unwrap();
        assert_eq!(lock.path(), path);
        assert_eq!(CollectionLock::owner(&path), Some(std::process::id()));
    }

    #[test]
    fn test_stale_owner_is_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.lock");
        std::fs::write(&path, "4294967295 left by a crashed run").unwrap();

        let _lock = CollectionLock::acquire(&path).unwrap();
        assert_eq!(CollectionLock::owner(&path), Some(std::process::id()));
    }

    #[test]
    fn test_second_claim_names_the_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.lock");
        let held = CollectionLock::acquire(&path).unwrap();

        let err = CollectionLock::acquire(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        #[cfg(unix)]
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(held);
        assert!(CollectionLock::acquire(&path).is_ok());
    }
}
