//! Built-in operations.
//!
//! Every device path is resolved under the session root, so `/rstub.py`
//! names `<root>/rstub.py`. Paths that climb out with `..` are refused.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use tether_proto::{Value, hex};

use crate::registry::{OpResult, Output};

/// Largest byte count a single read, chunk, or buffer may ask for.
pub const MAX_CHUNK: usize = 64 * 1024;

/// Per-connection state: the filesystem root and open file handles.
#[derive(Debug)]
pub struct Session {
    root: PathBuf,
    files: HashMap<i64, File>,
    next_handle: i64,
}

impl Session {
    /// Creates a session serving files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: HashMap::new(),
            next_handle: 1,
        }
    }

    /// The filesystem root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.files.len()
    }

    /// Maps a device path onto the host filesystem.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let mut out = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(format!("path escapes root: {path}"));
                }
            }
        }
        Ok(out)
    }

    fn insert(&mut self, file: File) -> i64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(handle, file);
        handle
    }

    fn file(&mut self, handle: i64) -> Result<&mut File, String> {
        self.files
            .get_mut(&handle)
            .ok_or_else(|| format!("bad file handle: {handle}"))
    }
}

/// Returns its argument, or the argument list when there is not exactly one.
pub fn echo(_: &mut Session, mut args: Vec<Value>) -> OpResult {
    let v = if args.len() == 1 {
        args.remove(0)
    } else {
        Value::List(args)
    };
    Ok(Output::Scalar(v))
}

/// Sorted entry names of a directory.
pub fn listdir(s: &mut Session, args: Vec<Value>) -> OpResult {
    let dir = s.resolve(str_arg(&args, 0)?)?;
    let names = sorted_entries(&dir)?
        .into_iter()
        .map(|(name, _)| Value::Str(name))
        .collect();
    Ok(Output::Scalar(Value::List(names)))
}

/// One descriptive line per directory entry, produced lazily.
pub fn listdir_long(s: &mut Session, args: Vec<Value>) -> OpResult {
    let dir = s.resolve(str_arg(&args, 0)?)?;
    let entries = sorted_entries(&dir)?;
    let items = entries.into_iter().map(move |(name, path)| {
        let meta = fs::metadata(&path).map_err(|e| format!("{name}: {e}"))?;
        let line = if meta.is_dir() {
            format!("{name}/ - directory")
        } else {
            format!("{name} - {} bytes", meta.len())
        };
        Ok(Value::Str(line))
    });
    Ok(Output::Stream(Box::new(items)))
}

/// Removes a file.
pub fn unlink(s: &mut Session, args: Vec<Value>) -> OpResult {
    let path = s.resolve(str_arg(&args, 0)?)?;
    fs::remove_file(&path).map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::Nil))
}

/// Creates a directory.
pub fn mkdir(s: &mut Session, args: Vec<Value>) -> OpResult {
    let path = s.resolve(str_arg(&args, 0)?)?;
    fs::create_dir(&path).map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::Nil))
}

/// Removes an empty directory.
pub fn rmdir(s: &mut Session, args: Vec<Value>) -> OpResult {
    let path = s.resolve(str_arg(&args, 0)?)?;
    fs::remove_dir(&path).map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::Nil))
}

/// System identification.
pub fn uname(_: &mut Session, _: Vec<Value>) -> OpResult {
    let kernel = |name: &str| {
        fs::read_to_string(Path::new("/proc/sys/kernel").join(name))
            .map(|s| s.trim().to_owned())
            .unwrap_or_default()
    };
    let pairs = vec![
        ("sysname".to_owned(), Value::from(std::env::consts::OS)),
        ("nodename".to_owned(), Value::from(kernel("hostname"))),
        ("release".to_owned(), Value::from(kernel("osrelease"))),
        ("version".to_owned(), Value::from(kernel("version"))),
        ("machine".to_owned(), Value::from(std::env::consts::ARCH)),
    ];
    Ok(Output::Scalar(Value::Map(pairs)))
}

/// Opens a file and returns its handle.
///
/// Modes follow the usual `r`, `w`, `a` letters with optional `+` and `b`.
pub fn file_open(s: &mut Session, args: Vec<Value>) -> OpResult {
    let path = s.resolve(str_arg(&args, 0)?)?;
    let mode = args.get(1).and_then(Value::as_str).unwrap_or("r");
    let file = open_options(mode)?
        .open(&path)
        .map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(Output::Scalar(Value::Int(s.insert(file))))
}

/// Reads up to `count` bytes; empty at end of file.
pub fn file_read(s: &mut Session, args: Vec<Value>) -> OpResult {
    let count = chunk_arg(&args, 1)?;
    let file = s.file(int_arg(&args, 0)?)?;
    let mut buf = Vec::new();
    file.take(count)
        .read_to_end(&mut buf)
        .map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::Bytes(buf)))
}

/// Writes bytes and returns how many were written.
pub fn file_write(s: &mut Session, args: Vec<Value>) -> OpResult {
    let data = args
        .get(1)
        .and_then(Value::as_bytes)
        .ok_or_else(|| arg_error(&args, 1, "bytes"))?;
    let file = s.file(int_arg(&args, 0)?)?;
    file.write_all(data).map_err(|e| e.to_string())?;
    let n = i64::try_from(data.len()).map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::Int(n)))
}

/// Closes and forgets a handle.
pub fn file_close(s: &mut Session, args: Vec<Value>) -> OpResult {
    let handle = int_arg(&args, 0)?;
    let mut file = s
        .files
        .remove(&handle)
        .ok_or_else(|| format!("bad file handle: {handle}"))?;
    file.flush().map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::Nil))
}

/// Streams a whole file in `chunksize` pieces.
pub fn file_read_all(s: &mut Session, args: Vec<Value>) -> OpResult {
    let path = s.resolve(str_arg(&args, 0)?)?;
    let chunk = chunk_arg(&args, 1)?.max(1);
    let mut file = File::open(&path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut done = false;
    let items = std::iter::from_fn(move || {
        if done {
            return None;
        }
        let mut buf = Vec::new();
        match (&mut file).take(chunk).read_to_end(&mut buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(Value::Bytes(buf))),
            Err(e) => {
                done = true;
                Some(Err(e.to_string()))
            }
        }
    });
    Ok(Output::Stream(Box::new(items)))
}

/// `Nil` if the file is absent, else `[size, hex sha256]`.
pub fn file_checksum(s: &mut Session, args: Vec<Value>) -> OpResult {
    let path = s.resolve(str_arg(&args, 0)?)?;
    let chunk = chunk_arg(&args, 1)?.max(1);
    let mut file = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Output::Scalar(Value::Nil));
        }
        Err(e) => return Err(format!("{}: {e}", path.display())),
    };
    let mut hasher = Sha256::new();
    let mut size = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = (&mut file)
            .take(chunk)
            .read_to_end(&mut buf)
            .map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        hasher.update(&buf);
        size += n;
    }
    let size = i64::try_from(size).map_err(|e| e.to_string())?;
    Ok(Output::Scalar(Value::List(vec![
        Value::Int(size),
        Value::Str(hex::encode(&hasher.finalize())),
    ])))
}

fn open_options(mode: &str) -> Result<OpenOptions, String> {
    let plus = mode.contains('+');
    let mut opts = OpenOptions::new();
    match mode.chars().find(|c| matches!(c, 'r' | 'w' | 'a')) {
        Some('r') => opts.read(true).write(plus),
        Some('w') => opts.write(true).create(true).truncate(true).read(plus),
        Some('a') => opts.append(true).create(true).read(plus),
        _ => return Err(format!("invalid mode: {mode:?}")),
    };
    Ok(opts)
}

fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>, String> {
    let read = fs::read_dir(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
    let mut entries = read
        .map(|e| {
            let e = e.map_err(|e| e.to_string())?;
            Ok((e.file_name().to_string_lossy().into_owned(), e.path()))
        })
        .collect::<Result<Vec<_>, String>>()?;
    entries.sort();
    Ok(entries)
}

fn str_arg(args: &[Value], i: usize) -> Result<&str, String> {
    args.get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| arg_error(args, i, "str"))
}

fn int_arg(args: &[Value], i: usize) -> Result<i64, String> {
    args.get(i)
        .and_then(Value::as_int)
        .ok_or_else(|| arg_error(args, i, "int"))
}

/// A byte count, bounded by [`MAX_CHUNK`].
fn chunk_arg(args: &[Value], i: usize) -> Result<u64, String> {
    let raw = int_arg(args, i)?;
    let n = u64::try_from(raw)
        .map_err(|_| format!("argument {i}: expected non-negative int, got {raw}"))?;
    if n > MAX_CHUNK as u64 {
        return Err(format!("argument {i}: {n} exceeds the {MAX_CHUNK}-byte limit"));
    }
    Ok(n)
}

fn arg_error(args: &[Value], i: usize, want: &str) -> String {
    match args.get(i) {
        Some(v) => format!("argument {i}: expected {want}, got {}", v.kind()),
        None => format!("missing argument {i} ({want})"),
    }
}
