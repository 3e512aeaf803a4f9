//! Linux inotify stream driven by the tokio reactor.
//!
//! Descriptor setup and watch bookkeeping go through the `inotify` crate.
//! Reads hand back the kernel's packed batch untouched so that
//! [`EventDecoder`](crate::decoder::EventDecoder) does the splitting.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use inotify::{Inotify, WatchDescriptor, WatchMask};
use tokio::io::unix::AsyncFd;
use tracing::debug;

use crate::installer::WatchRegistrar;
use crate::watch_table::WatchHandle;

/// Mask requested for every mirrored directory.
pub fn directory_watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::MODIFY
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
        | WatchMask::ONLYDIR
        | WatchMask::DONT_FOLLOW
}

/// One notification stream. Reads are non-blocking underneath and awaited
/// through the runtime, so a pending read can be abandoned at any time.
#[derive(Debug)]
pub struct NotifyStream {
    fd: AsyncFd<Inotify>,

    /// Descriptors of live watches, needed to remove them again.
    descriptors: RefCell<HashMap<WatchHandle, WatchDescriptor>>,
}

impl NotifyStream {
    /// Open a new stream. Must be called inside a tokio runtime with IO
    /// enabled.
    pub fn open() -> io::Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(Inotify::init()?)?,
            descriptors: RefCell::new(HashMap::new()),
        })
    }

    /// Watch `path` with `mask`. Watching a directory that is already
    /// watched returns its existing handle.
    pub fn add_watch(&self, path: &Path, mask: WatchMask) -> io::Result<WatchHandle> {
        let descriptor = self.fd.get_ref().watches().add(path, mask)?;
        let handle = WatchHandle::from_raw(descriptor.get_watch_descriptor_id());
        self.descriptors.borrow_mut().insert(handle, descriptor);
        Ok(handle)
    }

    /// Stop watching. The kernel answers with an `IGNORED` event.
    pub fn rm_watch(&self, handle: WatchHandle) -> io::Result<()> {
        let Some(descriptor) = self.descriptors.borrow_mut().remove(&handle) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown watch {handle}"),
            ));
        };
        self.fd.get_ref().watches().remove(descriptor)
    }

    /// Drop bookkeeping for a watch the kernel already released.
    pub fn forget(&self, handle: WatchHandle) {
        if self.descriptors.borrow_mut().remove(&handle).is_some() {
            debug!("Forgot released watch {handle}");
        }
    }

    /// Number of watches currently held.
    pub fn watch_count(&self) -> usize {
        self.descriptors.borrow().len()
    }

    /// Wait for the next batch of packed events and copy it into `buf`.
    pub async fn read_batch(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            let result = guard.try_io(|inner| {
                // SAFETY: `buf` is valid for writes of `buf.len()` bytes and the
                // descriptor stays open for the lifetime of `inner`.
                let n = unsafe {
                    libc::read(inner.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match result {
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(read) => return read,
                Err(_would_block) => continue,
            }
        }
    }
}

impl WatchRegistrar for NotifyStream {
    fn watch_directory(&self, path: &Path) -> io::Result<WatchHandle> {
        self.add_watch(path, directory_watch_mask())
    }

    fn unwatch(&self, handle: WatchHandle) -> io::Result<()> {
        self.rm_watch(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{ChangeKind, EventDecoder};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_watch_and_decode_create_event() {
        let temp_dir = TempDir::new().unwrap();
        let stream = NotifyStream::open().unwrap();
        let handle = stream
            .add_watch(temp_dir.path(), directory_watch_mask())
            .unwrap();

        std::fs::write(temp_dir.path().join("a.txt"), b"x").unwrap();

        let mut buf = vec![0u8; 4096];
        let n = stream.read_batch(&mut buf).await.unwrap();
        let first = EventDecoder::new(&buf[..n]).next().unwrap();

        assert_eq!(first.handle, handle);
        assert_eq!(first.kind, ChangeKind::Created);
        assert_eq!(first.name.as_deref(), Some(std::ffi::OsStr::new("a.txt")));
    }

    #[tokio::test]
    async fn test_rewatch_returns_same_handle() {
        let temp_dir = TempDir::new().unwrap();
        let stream = NotifyStream::open().unwrap();

        let first = stream.watch_directory(temp_dir.path()).unwrap();
        let second = stream.watch_directory(temp_dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(stream.watch_count(), 1);

        stream.unwatch(first).unwrap();
        assert_eq!(stream.watch_count(), 0);
        assert!(stream.unwatch(first).is_err());
    }

    #[tokio::test]
    async fn test_watch_rejects_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        let stream = NotifyStream::open().unwrap();
        let err = stream.watch_directory(&file).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTDIR));
    }
}
