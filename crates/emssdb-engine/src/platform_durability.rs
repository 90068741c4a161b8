//! Platform-specific durable sync
//!
//! Maps to the strongest durability primitive each platform offers. The WAL
//! calls these after appending a record and after a checkpoint rename.

use std::fs::File;
use std::io;
use std::path::Path;

/// Block until the file's data has reached persistent storage.
///
/// - Linux: `fdatasync()`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`, plain fsync only reaches the drive cache
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
///
/// May block for a long time under heavy I/O; callers must not hold locks
/// that readers need.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd comes from a live `File` borrow, so it is open.
        let result = unsafe { libc::fdatasync(file.as_raw_fd()) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the fd comes from a live `File` borrow, so it is open.
        let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(target_os = "windows")]
    {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::FlushFileBuffers;
        // SAFETY: the handle comes from a live `File` borrow.
        let result = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
        if result != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
    {
        file.sync_data()
    }
}

/// Persist directory metadata so a rename or unlink inside it survives power loss.
///
/// Windows has no directory handle sync; renames there are journaled by NTFS.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}
