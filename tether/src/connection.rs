//! The [`Connection`]: one device link, its negotiated mode, and the
//! deadline-bounded I/O primitives every higher layer is built on.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::bootstrap::StubSource;
use crate::cancel::CancelToken;
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Longest single transport read, so cancellation is noticed promptly.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Last confirmed state of the device shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Mode {
    /// Nothing confirmed yet, or the line lost sync.
    #[default]
    Unknown,
    /// Interactive prompt (`>>> `).
    Interactive,
    /// Raw mode (no echo).
    Raw,
    /// Soft reset issued; the device is running its main program.
    Running,
    /// The companion's request loop is running.
    AgentActive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Interactive => "interactive",
            Self::Raw => "raw",
            Self::Running => "running",
            Self::AgentActive => "agent",
        })
    }
}

/// A link to one device.
///
/// The connection owns its transport exclusively and performs at most one
/// exchange at a time. Share it between threads behind a `Mutex`; interleaved
/// writes would corrupt the line protocol.
#[derive(Debug)]
pub struct Connection<T> {
    pub(crate) transport: T,
    pub(crate) mode: Mode,
    pub(crate) config: LinkConfig,
    pub(crate) stub: Option<StubSource>,
    pub(crate) cancel: CancelToken,
}

impl<T: Transport> Connection<T> {
    /// Wraps `transport` with default settings. The mode starts as
    /// [`Mode::Unknown`].
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, LinkConfig::default())
    }

    /// Wraps `transport` with explicit settings.
    pub fn with_config(transport: T, config: LinkConfig) -> Self {
        Self {
            transport,
            mode: Mode::Unknown,
            config,
            stub: None,
            cancel: CancelToken::new(),
        }
    }

    /// Sets the companion source pasted when it is not resident on the device.
    #[must_use]
    pub fn with_stub(mut self, stub: StubSource) -> Self {
        self.stub = Some(stub);
        self
    }

    /// Uses `token` instead of the connection's own cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current negotiated mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Link settings.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// A clone of the token that cancels this connection's blocking calls.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Borrows the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Forgets the negotiated mode so the next operation re-negotiates.
    pub fn invalidate(&mut self) {
        self.mode = Mode::Unknown;
    }

    /// Releases the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Absolute deadline `timeout` from now.
    pub(crate) fn deadline_in(timeout: Duration) -> Instant {
        Instant::now() + timeout
    }

    /// A sub-deadline for one shell reply, never past `deadline`.
    pub(crate) fn reply_window(&self, deadline: Instant) -> Instant {
        deadline.min(Instant::now() + self.config.read_timeout)
    }

    /// Reads until `min_bytes` have arrived or `deadline` passes.
    ///
    /// A deadline already in the past performs one non-blocking poll.
    pub fn read_deadline(&mut self, min_bytes: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(min_bytes);
        loop {
            self.cancel.check()?;
            let slice = deadline.min(Instant::now() + READ_SLICE);
            let chunk = self
                .transport
                .read_deadline(min_bytes - data.len(), slice)?;
            data.extend_from_slice(&chunk);
            if data.len() >= min_bytes || Instant::now() >= deadline {
                return Ok(data);
            }
        }
    }

    /// Writes `data` in paced chunks.
    ///
    /// The device has no write-side flow control, so chunks of
    /// [`LinkConfig::write_chunk`] bytes are separated by
    /// [`LinkConfig::write_pause`].
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        trace!(data = %String::from_utf8_lossy(data), "write");
        let chunk = self.config.write_chunk.max(1);
        for (i, piece) in data.chunks(chunk).enumerate() {
            if i > 0 {
                self.cancel.check()?;
                thread::sleep(self.config.write_pause);
            }
            self.transport.write(piece)?;
        }
        Ok(())
    }

    /// Discards input until the line stays quiet for one drain window, or
    /// `deadline` passes.
    pub fn drain(&mut self, deadline: Instant) -> Result<()> {
        let mut dropped = 0usize;
        loop {
            let window = deadline.min(Instant::now() + self.config.drain_poll);
            let stale = self.read_deadline(1, window)?;
            dropped += stale.len();
            if stale.is_empty() || Instant::now() >= deadline {
                break;
            }
        }
        if dropped > 0 {
            trace!(dropped, "drained stale input");
        }
        Ok(())
    }

    /// Accumulates input until it ends with `terminator` or `deadline`
    /// passes, returning whatever arrived. Callers check the suffix.
    pub fn read_until(&mut self, terminator: &[u8], deadline: Instant) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let byte = self.read_deadline(1, deadline)?;
            if byte.is_empty() {
                break;
            }
            data.extend_from_slice(&byte);
            if data.ends_with(terminator) {
                break;
            }
        }
        if !data.is_empty() {
            debug!(
                terminator = %String::from_utf8_lossy(terminator).escape_debug(),
                matched = data.ends_with(terminator),
                data = %String::from_utf8_lossy(&data).escape_debug(),
                "read_until"
            );
        }
        Ok(data)
    }

    /// Like [`read_until`](Self::read_until), but a missing terminator is
    /// [`Error::Timeout`].
    pub fn expect(
        &mut self,
        terminator: &[u8],
        deadline: Instant,
        op: &'static str,
    ) -> Result<Vec<u8>> {
        let data = self.read_until(terminator, deadline)?;
        if data.ends_with(terminator) {
            Ok(data)
        } else {
            Err(Error::Timeout { op })
        }
    }

    /// Reads one line, including its `\n` if it arrived before `deadline`.
    pub fn read_line(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        self.read_until(b"\n", deadline)
    }
}
