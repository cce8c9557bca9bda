//! Unix serial device transport (termios raw mode, `poll(2)`-bounded reads).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
};
use tracing::debug;

use super::Transport;
use crate::error::{Error, Result};

/// A serial port opened in raw mode.
#[derive(Debug)]
pub struct SerialPort {
    file: File,
    path: PathBuf,
}

impl SerialPort {
    /// Opens `path` and configures it for raw 8N1 I/O at `baud`.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref();
        let speed = baud_rate(baud)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)?;

        let mut tio = termios::tcgetattr(&file).map_err(io::Error::from)?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, speed).map_err(io::Error::from)?;
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        // Non-blocking reads; waiting is done with poll(2).
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&file, SetArg::TCSANOW, &tio).map_err(io::Error::from)?;
        termios::tcflush(&file, FlushArg::TCIOFLUSH).map_err(io::Error::from)?;

        debug!(path = %path.display(), baud, "opened serial port");
        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }

    /// Device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits up to `deadline` for input; `false` on timeout.
    fn wait_readable(&self, deadline: Instant) -> io::Result<bool> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let ms = u16::try_from(remaining.as_millis()).unwrap_or(u16::MAX);
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(ms)) {
                Ok(0) if ms == u16::MAX => continue,
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Transport for SerialPort {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn read_deadline(&mut self, max_bytes: usize, deadline: Instant) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(max_bytes);
        let mut buf = [0u8; 256];
        while data.len() < max_bytes {
            if !self.wait_readable(deadline)? {
                break;
            }
            let want = (max_bytes - data.len()).min(buf.len());
            match self.file.read(&mut buf[..want]) {
                // Readable but empty: the device hung up.
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(data)
    }
}

/// Maps a numeric baud rate onto a termios constant.
fn baud_rate(baud: u32) -> Result<BaudRate> {
    Ok(match baud {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        other => return Err(Error::Config(format!("unsupported baud rate {other}"))),
    })
}
