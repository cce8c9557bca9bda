//! Remote file and filesystem operations, built on [`Connection::call`].

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tether_proto::{Value, hex, wire};
use tracing::{debug, info};

use crate::bootstrap::StubSource;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Default transfer chunk size; small enough for the device's heap.
pub const DEFAULT_CHUNK: usize = 256;

/// Device path [`Connection::upload_stub`] installs the companion to.
pub const STUB_PATH: &str = wire::STUB_PATH;

/// Size and SHA-256 of a file, comparable between host and device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    /// File size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 digest.
    pub sha256: String,
}

/// An open file on the device.
///
/// The handle is an explicit value; several may be open at once. It must be
/// closed with [`RemoteFile::close`]; dropping it leaks the device-side file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFile {
    handle: i64,
}

impl RemoteFile {
    /// Opens `path` on the device with a mode such as `"rb"` or `"wb"`.
    pub fn open<T: Transport>(conn: &mut Connection<T>, path: &str, mode: &str) -> Result<Self> {
        let v = conn.call("file.open", vec![path.into(), mode.into()])?;
        let handle = v
            .as_int()
            .ok_or_else(|| unexpected("file.open", &v))?;
        debug!(path, mode, handle, "opened remote file");
        Ok(Self { handle })
    }

    /// Reads up to `count` bytes; empty at end of file.
    pub fn read<T: Transport>(&self, conn: &mut Connection<T>, count: usize) -> Result<Vec<u8>> {
        let v = conn.call("file.read", vec![self.arg(), int(count)])?;
        match v {
            Value::Bytes(b) => Ok(b),
            other => Err(unexpected("file.read", &other)),
        }
    }

    /// Writes `data`, returning the number of bytes the device wrote.
    pub fn write<T: Transport>(&self, conn: &mut Connection<T>, data: &[u8]) -> Result<usize> {
        let v = conn.call("file.write", vec![self.arg(), data.into()])?;
        v.as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| unexpected("file.write", &v))
    }

    /// Closes the handle.
    pub fn close<T: Transport>(self, conn: &mut Connection<T>) -> Result<()> {
        conn.call("file.close", vec![self.arg()]).map(drop)
    }

    fn arg(&self) -> Value {
        Value::Int(self.handle)
    }
}

impl<T: Transport> Connection<T> {
    /// Downloads a whole file, streamed in `chunk`-sized pieces.
    pub fn get_file(&mut self, path: &str, chunk: usize) -> Result<Vec<u8>> {
        let mut contents = Vec::new();
        for piece in self.call_stream("file.read_all", vec![path.into(), int(chunk)])? {
            match piece? {
                Value::Bytes(b) => contents.extend_from_slice(&b),
                other => return Err(unexpected("file.read_all", &other)),
            }
        }
        info!(path, bytes = contents.len(), "downloaded");
        Ok(contents)
    }

    /// Replaces the file at `path` with `content`, written in `chunk`-sized
    /// pieces. The remote handle is closed even if a write fails.
    pub fn put_file(&mut self, path: &str, content: &[u8], chunk: usize) -> Result<()> {
        let file = RemoteFile::open(self, path, "wb")?;
        let written = content
            .chunks(chunk.max(1))
            .try_for_each(|piece| file.write(self, piece).map(drop));
        let closed = file.close(self);
        written?;
        closed?;
        info!(path, bytes = content.len(), "uploaded");
        Ok(())
    }

    /// Size and SHA-256 of a device file, or `None` if it does not exist.
    pub fn checksum(&mut self, path: &str) -> Result<Option<Checksum>> {
        let v = self.call("file.checksum", vec![path.into(), int(DEFAULT_CHUNK)])?;
        match &v {
            Value::Nil => Ok(None),
            Value::List(items) => match items.as_slice() {
                [Value::Int(size), Value::Str(sha256)] => Ok(Some(Checksum {
                    size: u64::try_from(*size).map_err(|_| unexpected("file.checksum", &v))?,
                    sha256: sha256.clone(),
                })),
                _ => Err(unexpected("file.checksum", &v)),
            },
            _ => Err(unexpected("file.checksum", &v)),
        }
    }

    /// Names of the entries in a device directory.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let v = self.call("os.listdir", vec![path.into()])?;
        strings("os.listdir", v)
    }

    /// One descriptive line per directory entry, with sizes.
    pub fn list_long(&mut self, path: &str) -> Result<Vec<String>> {
        let v = self.call("os.listdir_long", vec![path.into()])?;
        strings("os.listdir_long", v)
    }

    /// Removes a device file.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.call("os.unlink", vec![path.into()]).map(drop)
    }

    /// Creates a device directory.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.call("os.mkdir", vec![path.into()]).map(drop)
    }

    /// Removes an empty device directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        self.call("os.rmdir", vec![path.into()]).map(drop)
    }

    /// System identification fields reported by the device.
    pub fn uname(&mut self) -> Result<Vec<(String, String)>> {
        match self.call("os.uname", vec![])? {
            Value::Map(pairs) => Ok(pairs
                .into_iter()
                .map(|(k, v)| (k, v.to_string()))
                .collect()),
            other => Err(unexpected("os.uname", &other)),
        }
    }

    /// Stores the companion source on the device so later bootstraps find it
    /// resident instead of pasting it.
    pub fn upload_stub(&mut self, stub: &StubSource) -> Result<()> {
        self.put_file(STUB_PATH, stub.as_bytes(), DEFAULT_CHUNK)
    }
}

/// Size and SHA-256 of a host file, or `None` if it does not exist.
pub fn local_checksum(path: impl AsRef<Path>) -> Result<Option<Checksum>> {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok(Some(Checksum {
        size,
        sha256: hex::encode(&hasher.finalize()),
    }))
}

/// Size and SHA-256 of an in-memory buffer.
pub fn checksum_of(data: &[u8]) -> Checksum {
    Checksum {
        size: data.len() as u64,
        sha256: hex::encode(&Sha256::digest(data)),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn int(n: usize) -> Value {
    Value::Int(n as i64)
}

fn strings(op: &str, v: Value) -> Result<Vec<String>> {
    match v {
        Value::List(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s),
                other => Err(unexpected(op, &other)),
            })
            .collect(),
        other => Err(unexpected(op, &other)),
    }
}

fn unexpected(op: &str, v: &Value) -> Error {
    Error::Protocol(format!("{op}: unexpected {} result", v.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_input() {
        let c = checksum_of(b"");
        assert_eq!(c.size, 0);
        assert_eq!(
            c.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn local_checksum_matches_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();
        fs::write(&path, &data).unwrap();
        assert_eq!(local_checksum(&path).unwrap(), Some(checksum_of(&data)));
    }

    #[test]
    fn local_checksum_of_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(local_checksum(dir.path().join("nope")).unwrap(), None);
    }
}
