//! Random-access byte stream over a single tree file.
//!
//! Every page access the engine performs is a seek to a computed offset
//! followed by a full-length read or write, so this is the only I/O
//! primitive the rest of the crate needs.

use bramble_common::{BrambleError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Seekable read/write stream backing one tree.
///
/// The handle lives behind a mutex so reads can take `&self`; the engine
/// itself is single-threaded and owns the stream exclusively. After
/// `close()` every operation fails with `StreamClosed`; close is
/// idempotent.
pub struct PageStream {
    file: Mutex<Option<File>>,
}

impl PageStream {
    /// Creates (or truncates) the file at `path` for a new tree.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(Some(file)),
        })
    }

    /// Opens an existing tree file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(Some(file)),
        })
    }

    /// Returns true while the stream has not been closed.
    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Closes the stream. Subsequent operations fail with `StreamClosed`.
    pub fn close(&self) {
        *self.file.lock() = None;
    }

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(BrambleError::StreamClosed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes all of `bytes` starting at `offset`, extending the file if
    /// the range lies past the current end.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(BrambleError::StreamClosed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Returns the current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        let guard = self.file.lock();
        let file = guard.as_ref().ok_or(BrambleError::StreamClosed)?;
        Ok(file.metadata()?.len())
    }

    /// Returns true if the file is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let stream = PageStream::create(dir.path().join("t.xibt")).unwrap();

        stream.write_at(0, &[1, 2, 3, 4]).unwrap();
        stream.write_at(16, &[0xAA; 8]).unwrap();

        let mut buf = [0u8; 4];
        stream.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        let mut buf = [0u8; 8];
        stream.read_at(16, &mut buf).unwrap();
        assert_eq!(buf, [0xAA; 8]);
    }

    #[test]
    fn test_write_past_end_extends() {
        let dir = tempdir().unwrap();
        let stream = PageStream::create(dir.path().join("t.xibt")).unwrap();

        assert!(stream.is_empty().unwrap());
        stream.write_at(100, &[7u8; 10]).unwrap();
        assert_eq!(stream.len().unwrap(), 110);
    }

    #[test]
    fn test_short_read_is_io_error() {
        let dir = tempdir().unwrap();
        let stream = PageStream::create(dir.path().join("t.xibt")).unwrap();
        stream.write_at(0, &[1, 2]).unwrap();

        let mut buf = [0u8; 16];
        let err = stream.read_at(0, &mut buf).unwrap_err();
        assert!(matches!(err, BrambleError::Io(_)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let stream = PageStream::create(dir.path().join("t.xibt")).unwrap();
        assert!(stream.is_open());

        stream.close();
        assert!(!stream.is_open());
        stream.close();
        assert!(!stream.is_open());
    }

    #[test]
    fn test_use_after_close_fails() {
        let dir = tempdir().unwrap();
        let stream = PageStream::create(dir.path().join("t.xibt")).unwrap();
        stream.close();

        let mut buf = [0u8; 1];
        assert!(matches!(
            stream.read_at(0, &mut buf).unwrap_err(),
            BrambleError::StreamClosed
        ));
        assert!(matches!(
            stream.write_at(0, &[0]).unwrap_err(),
            BrambleError::StreamClosed
        ));
        assert!(matches!(stream.len().unwrap_err(), BrambleError::StreamClosed));
    }

    #[test]
    fn test_open_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xibt");
        {
            let stream = PageStream::create(&path).unwrap();
            stream.write_at(0, &[9, 9, 9]).unwrap();
        }

        let stream = PageStream::open(&path).unwrap();
        let mut buf = [0u8; 3];
        stream.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9]);
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempdir().unwrap();
        assert!(PageStream::open(dir.path().join("absent.xibt")).is_err());
    }
}
