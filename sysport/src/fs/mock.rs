//! In-memory filesystem double.
//!
//! Holds a path → content table mirroring exactly the path set the real
//! implementation touches, so the same fixtures drive both unit and
//! lifecycle tests. Created fresh per test; carries no state across tests.
//!
//! Failure simulation comes in two grains: global read/write toggles for
//! "any I/O fails" scenarios, and per-path errno injection for cases like
//! an export file reporting `EBUSY` while everything else works. For
//! device files, reads can be pinned to substituted bytes independent of
//! what was last written.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Access, Filesystem, SysFile};

#[derive(Debug, Default)]
struct Entry {
    contents: Vec<u8>,
    read_data: Option<Vec<u8>>,
    read_errno: Option<i32>,
    write_errno: Option<i32>,
}

#[derive(Debug, Default)]
struct State {
    files: HashMap<String, Entry>,
    read_error: bool,
    write_error: bool,
    next_fd: RawFd,
}

impl State {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        if self.read_error {
            return Err(io::Error::other("read error"));
        }
        let entry = self.entry(path)?;
        if let Some(errno) = entry.read_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(entry
            .read_data
            .clone()
            .unwrap_or_else(|| entry.contents.clone()))
    }

    fn write(&mut self, path: &str, data: &[u8]) -> io::Result<usize> {
        if self.write_error {
            return Err(io::Error::other("write error"));
        }
        let entry = self.entry_mut(path)?;
        if let Some(errno) = entry.write_errno {
            return Err(io::Error::from_raw_os_error(errno));
        }
        entry.contents = data.to_vec();
        Ok(data.len())
    }

    fn entry(&self, path: &str) -> io::Result<&Entry> {
        self.files
            .get(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn entry_mut(&mut self, path: &str) -> io::Result<&mut Entry> {
        self.files
            .get_mut(path)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }
}

/// Deterministic in-memory stand-in for [`NativeFilesystem`].
///
/// [`NativeFilesystem`]: super::NativeFilesystem
#[derive(Debug)]
pub struct MockFilesystem {
    state: Arc<Mutex<State>>,
}

impl MockFilesystem {
    /// A mock filesystem knowing exactly the given paths, all empty.
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Self {
        let files = paths
            .iter()
            .map(|p| (p.as_ref().to_string(), Entry::default()))
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                files,
                next_fd: 3,
                ..State::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current content of a path as text, or `None` if it was never
    /// defined.
    pub fn contents(&self, path: &str) -> Option<String> {
        self.state()
            .files
            .get(path)
            .map(|e| String::from_utf8_lossy(&e.contents).into_owned())
    }

    /// Seed or overwrite the content of a path, defining it if needed.
    pub fn set_contents(&self, path: &str, contents: &str) {
        self.state()
            .files
            .entry(path.to_string())
            .or_default()
            .contents = contents.as_bytes().to_vec();
    }

    /// Pin the bytes reads of this path return, independent of writes.
    /// Used for device files whose read traffic is not an echo of the
    /// last write.
    pub fn set_read_data(&self, path: &str, data: &[u8]) {
        self.state()
            .files
            .entry(path.to_string())
            .or_default()
            .read_data = Some(data.to_vec());
    }

    pub fn add(&self, path: &str) {
        self.state().files.entry(path.to_string()).or_default();
    }

    /// Forget a path, so later access fails `ENOENT`.
    pub fn remove(&self, path: &str) {
        self.state().files.remove(path);
    }

    /// Make every read fail with a generic I/O error.
    pub fn set_read_error(&self, on: bool) {
        self.state().read_error = on;
    }

    /// Make every write fail with a generic I/O error.
    pub fn set_write_error(&self, on: bool) {
        self.state().write_error = on;
    }

    /// Make reads of one path fail with the given errno.
    pub fn inject_read_error(&self, path: &str, errno: i32) {
        self.state()
            .files
            .entry(path.to_string())
            .or_default()
            .read_errno = Some(errno);
    }

    /// Make writes to one path fail with the given errno.
    pub fn inject_write_error(&self, path: &str, errno: i32) {
        self.state()
            .files
            .entry(path.to_string())
            .or_default()
            .write_errno = Some(errno);
    }

    /// Clear any injected errno for a path.
    pub fn clear_injected_errors(&self, path: &str) {
        if let Some(entry) = self.state().files.get_mut(path) {
            entry.read_errno = None;
            entry.write_errno = None;
        }
    }
}

impl Filesystem for MockFilesystem {
    fn open(&self, path: &str, _access: Access) -> io::Result<Box<dyn SysFile>> {
        let mut state = self.state();
        state.entry(path)?;
        let fd = state.next_fd;
        state.next_fd += 1;
        Ok(Box::new(MockFile {
            state: Arc::clone(&self.state),
            path: path.to_string(),
            fd,
        }))
    }

    fn read_file(&self, path: &str) -> io::Result<String> {
        let bytes = self.state().read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn write_file(&self, path: &str, data: &[u8]) -> io::Result<usize> {
        self.state().write(path, data)
    }

    fn exists(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }
}

/// An open handle into the mock table.
///
/// Reads return the current content (or pinned read data) from the start
/// on every call (device-read semantics, not a cursor); writes replace the
/// content, as a sysfs attribute write would.
struct MockFile {
    state: Arc<Mutex<State>>,
    path: String,
    fd: RawFd,
}

impl MockFile {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Read for MockFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.state().read(&self.path)?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }
}

impl Write for MockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let path = self.path.clone();
        self.state().write(&path, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SysFile for MockFile {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn path(&self) -> &str {
        &self.path
    }
}
