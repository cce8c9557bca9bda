//! CLI for moving files to and from an embedded interpreter over its serial
//! console.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod transfer;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tether::{Connection, LinkConfig, StubSource, Transport};
use tracing_subscriber::EnvFilter;

/// Connection to the device, as opened from the command line.
pub(crate) type Device = Connection<Box<dyn Transport + Send>>;

#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Move files to and from an embedded interpreter over its serial console"
)]
struct Cli {
    /// Serial device path, or `socket://host:port` for a network bridge.
    #[arg(short = 'p', long, env = "TETHER_PORT", global = true)]
    port: Option<String>,

    /// Serial line speed.
    #[arg(short = 'b', long, default_value_t = 115_200, global = true)]
    baud: u32,

    /// Seconds allowed for bringing up the companion.
    #[arg(long, default_value_t = 16, global = true)]
    timeout: u64,

    /// Companion source, pasted when it is not installed on the device.
    /// Defaults to the companion bundled with tether.
    #[arg(long, env = "TETHER_STUB", global = true)]
    stub: Option<PathBuf>,

    /// Soft-reset the device before starting the companion.
    #[arg(long, global = true)]
    soft_reset: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy a file from the device.
    Get(transfer::GetArgs),

    /// Copy a file to the device.
    Put(transfer::PutArgs),

    /// Print a device file to stdout.
    Cat {
        /// Device path.
        remote: String,
    },

    /// Write stdin to a device file.
    Rcat {
        /// Device path.
        remote: String,
    },

    /// Print size and SHA-256 of a device file.
    Checksum {
        /// Device path.
        remote: String,
    },

    /// Install the companion on the device so it starts without pasting.
    UploadStub,

    /// List a device directory.
    Ls(transfer::LsArgs),

    /// Remove a device file.
    Rm {
        /// Device path.
        path: String,
    },

    /// Remove an empty device directory.
    Rmdir {
        /// Device path.
        path: String,
    },

    /// Create a device directory.
    Mkdir {
        /// Device path.
        path: String,
    },

    /// Print the device's system identification.
    Uname,

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TETHER_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = Cli::parse().dispatch() {
        eprintln!("tether: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        if let Command::Completion { shell } = self.command {
            clap_complete::generate(shell, &mut Self::command(), "tether", &mut std::io::stdout());
            return Ok(());
        }

        let stub = self.companion()?;
        let mut conn = self.connect(stub.clone())?;

        let result = match self.command {
            Command::Get(args) => transfer::get(&mut conn, args),
            Command::Put(args) => transfer::put(&mut conn, args),
            Command::Cat { remote } => transfer::cat(&mut conn, &remote),
            Command::Rcat { remote } => transfer::rcat(&mut conn, &remote),
            Command::Checksum { remote } => transfer::checksum(&mut conn, &remote),
            Command::UploadStub => upload_stub(&mut conn, &stub),
            Command::Ls(args) => transfer::ls(&mut conn, args),
            Command::Rm { path } => conn.remove(&path).with_context(|| format!("rm {path}")),
            Command::Rmdir { path } => conn.rmdir(&path).with_context(|| format!("rmdir {path}")),
            Command::Mkdir { path } => conn.mkdir(&path).with_context(|| format!("mkdir {path}")),
            Command::Uname => uname(&mut conn),
            Command::Completion { .. } => Ok(()),
        };

        // Hand the console back to the interactive prompt.
        if let Err(e) = conn.exit() {
            tracing::warn!(error = %e, "companion did not acknowledge exit");
        }
        result
    }

    /// The `--stub` file, or the bundled companion.
    fn companion(&self) -> Result<StubSource> {
        match self.stub.as_deref() {
            Some(path) => StubSource::from_file(path)
                .with_context(|| format!("reading companion source {}", path.display())),
            None => Ok(StubSource::builtin()),
        }
    }

    fn connect(&self, stub: StubSource) -> Result<Device> {
        let port = self
            .port
            .as_deref()
            .context("no device given; pass --port or set TETHER_PORT")?;
        let transport =
            tether::transport::open(port, self.baud).with_context(|| format!("opening {port}"))?;
        let config = LinkConfig::default()
            .negotiate_timeout(Duration::from_secs(self.timeout))
            .soft_reset(self.soft_reset);
        Ok(Connection::with_config(transport, config).with_stub(stub))
    }
}

fn upload_stub(conn: &mut Device, stub: &StubSource) -> Result<()> {
    conn.upload_stub(stub).context("uploading companion")?;
    println!("{}", tether::files::STUB_PATH);
    Ok(())
}

fn uname(conn: &mut Device) -> Result<()> {
    for (key, value) in conn.uname()? {
        println!("{key:<9} {value}");
    }
    Ok(())
}
