//! File transfer and listing commands: get, put, cat, rcat, checksum, ls.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tether::files::{self, DEFAULT_CHUNK};

use crate::Device;

/// Arguments for `tether get`.
///
/// Usage: `tether get [--skip-checksum] REMOTE [LOCAL]`
#[derive(clap::Args)]
pub struct GetArgs {
    /// Always transfer, even if the local copy already matches.
    #[arg(long)]
    pub skip_checksum: bool,

    /// Device path.
    pub remote: String,

    /// Host path (default: the remote file name in the current directory).
    pub local: Option<PathBuf>,
}

/// Arguments for `tether put`.
///
/// Usage: `tether put [--skip-checksum] LOCAL [REMOTE]`
#[derive(clap::Args)]
pub struct PutArgs {
    /// Always transfer, even if the device copy already matches.
    #[arg(long)]
    pub skip_checksum: bool,

    /// Host path.
    pub local: PathBuf,

    /// Device path (default: the local file name under `/`).
    pub remote: Option<String>,
}

/// Arguments for `tether ls`.
#[derive(clap::Args)]
pub struct LsArgs {
    /// Show entry kinds and sizes.
    #[arg(short = 'l', long)]
    pub long: bool,

    /// Device directory.
    #[arg(default_value = "/")]
    pub dir: String,
}

pub fn get(conn: &mut Device, args: GetArgs) -> Result<()> {
    let local = match args.local {
        Some(path) => path,
        None => PathBuf::from(file_name(&args.remote)?),
    };
    if !args.skip_checksum {
        let remote_sum = conn.checksum(&args.remote)?;
        if remote_sum.is_none() {
            bail!("{}: no such file on device", args.remote);
        }
        if remote_sum == files::local_checksum(&local)? {
            eprintln!("{}: unchanged", local.display());
            return Ok(());
        }
    }
    let data = conn
        .get_file(&args.remote, DEFAULT_CHUNK)
        .with_context(|| format!("reading {}", args.remote))?;
    std::fs::write(&local, &data).with_context(|| format!("writing {}", local.display()))?;
    eprintln!("{} -> {} ({} bytes)", args.remote, local.display(), data.len());
    Ok(())
}

pub fn put(conn: &mut Device, args: PutArgs) -> Result<()> {
    let remote = match args.remote {
        Some(path) => path,
        None => format!("/{}", file_name_of(&args.local)?),
    };
    let data = std::fs::read(&args.local)
        .with_context(|| format!("reading {}", args.local.display()))?;
    if !args.skip_checksum && conn.checksum(&remote)? == Some(files::checksum_of(&data)) {
        eprintln!("{remote}: unchanged");
        return Ok(());
    }
    conn.put_file(&remote, &data, DEFAULT_CHUNK)
        .with_context(|| format!("writing {remote}"))?;
    eprintln!("{} -> {remote} ({} bytes)", args.local.display(), data.len());
    Ok(())
}

pub fn cat(conn: &mut Device, remote: &str) -> Result<()> {
    let data = conn
        .get_file(remote, DEFAULT_CHUNK)
        .with_context(|| format!("reading {remote}"))?;
    let mut out = std::io::stdout().lock();
    out.write_all(&data)?;
    out.flush()?;
    Ok(())
}

pub fn rcat(conn: &mut Device, remote: &str) -> Result<()> {
    let mut data = Vec::new();
    std::io::stdin()
        .lock()
        .read_to_end(&mut data)
        .context("reading stdin")?;
    conn.put_file(remote, &data, DEFAULT_CHUNK)
        .with_context(|| format!("writing {remote}"))?;
    Ok(())
}

pub fn checksum(conn: &mut Device, remote: &str) -> Result<()> {
    match conn.checksum(remote)? {
        Some(sum) => println!("{}  {:>10}  {remote}", sum.sha256, sum.size),
        None => bail!("{remote}: no such file on device"),
    }
    Ok(())
}

pub fn ls(conn: &mut Device, args: LsArgs) -> Result<()> {
    let entries = if args.long {
        conn.list_long(&args.dir)?
    } else {
        conn.list_dir(&args.dir)?
    };
    for entry in entries {
        println!("{entry}");
    }
    Ok(())
}

/// Last component of a device path.
fn file_name(remote: &str) -> Result<&str> {
    match remote.rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => bail!("{remote}: not a file path"),
    }
}

fn file_name_of(local: &Path) -> Result<String> {
    local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{}: not a file path", local.display()))
}
