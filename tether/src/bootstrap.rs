//! Companion bootstrap: find a resident companion or paste its source, then
//! launch its request loop.

use std::path::Path;
use std::time::Instant;
use std::{fs, io};

use tether_proto::wire;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Mode};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Companion bundled with the crate.
const BUILTIN_STUB: &str = include_str!("../stub/rstub.py");

/// Companion program text, pasted line by line into the device shell when
/// the companion is not already resident.
#[derive(Debug, Clone)]
pub struct StubSource {
    text: Vec<u8>,
}

impl StubSource {
    /// Wraps source text.
    pub fn new(text: impl Into<Vec<u8>>) -> Self {
        Self { text: text.into() }
    }

    /// The companion bundled with the crate. It speaks the same record
    /// protocol as this host.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_STUB)
    }

    /// Reads source text from a file.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        fs::read(path).map(Self::new)
    }

    /// Raw source bytes, as uploaded to the device filesystem.
    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    /// Lines as sent in paste mode: blank and comment lines dropped, each
    /// four-space indent collapsed to one space to stay under the shell's
    /// line length limit.
    pub fn paste_lines(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.text
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line).trim_ascii_end())
            .filter(|line| {
                let code = line.trim_ascii_start();
                !code.is_empty() && !code.starts_with(b"#")
            })
            .map(collapse_indent)
    }
}

/// Replaces every run of four spaces with a single space.
fn collapse_indent(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        if line[i..].starts_with(b"    ") {
            out.push(b' ');
            i += 4;
        } else {
            out.push(line[i]);
            i += 1;
        }
    }
    out
}

impl<T: Transport> Connection<T> {
    /// Starts the companion and leaves the connection in
    /// [`Mode::AgentActive`].
    ///
    /// A no-op without I/O if the companion is already active and `force` is
    /// false. With `soft_reset`, the device is reset first so the companion
    /// starts from a clean interpreter.
    pub fn enter_agent(&mut self, force: bool, deadline: Instant, soft_reset: bool) -> Result<()> {
        debug!(force, soft_reset, mode = %self.mode, "enter_agent");
        if self.mode == Mode::AgentActive && !force {
            return Ok(());
        }
        let result = self.launch_agent(force, deadline, soft_reset);
        if result.is_err() {
            self.mode = Mode::Unknown;
        }
        result
    }

    fn launch_agent(&mut self, force: bool, deadline: Instant, soft_reset: bool) -> Result<()> {
        let t0 = Instant::now();
        self.enter_interactive(force, deadline)?;
        if soft_reset {
            self.enter_run(true, deadline)?;
            self.enter_interactive(true, deadline)?;
        }
        info!(elapsed = ?t0.elapsed(), "mode switching done");

        self.drain(deadline)?;
        self.write(wire::PROBE)?;
        let window = self.reply_window(deadline);
        let mut reply = self.expect(wire::PROMPT, window, "probe companion")?;
        debug!(reply = %String::from_utf8_lossy(&reply).escape_debug(), "probe");

        if contains(&reply, wire::ERROR_MARK) {
            self.write(wire::IMPORT_FALLBACK)?;
            let window = self.reply_window(deadline);
            reply = self.expect(wire::PROMPT, window, "import companion")?;
            debug!(reply = %String::from_utf8_lossy(&reply).escape_debug(), "import");
        }

        if contains(&reply, wire::ERROR_MARK) {
            self.paste_stub(deadline)?;
        } else {
            info!("using resident companion");
        }

        self.write(wire::LAUNCH)?;
        let handshake = self.recv_frame_bytes(deadline)?;
        debug!(len = handshake.len(), "companion handshake");
        self.mode = Mode::AgentActive;
        info!(elapsed = ?t0.elapsed(), "companion active");
        Ok(())
    }

    /// Pastes the configured companion source, one echo-gated line at a time.
    fn paste_stub(&mut self, deadline: Instant) -> Result<()> {
        let lines: Vec<Vec<u8>> = self
            .stub
            .as_ref()
            .ok_or(Error::StubMissing)?
            .paste_lines()
            .collect();
        warn!(
            lines = lines.len(),
            "companion not installed, pasting source; upload it to {} for faster start",
            wire::STUB_PATH
        );

        let t0 = Instant::now();
        self.write(wire::PASTE_ENTER)?;
        let window = self.reply_window(deadline);
        self.expect(wire::PASTE_ECHO, window, "enter paste mode")?;
        for mut line in lines {
            line.extend_from_slice(b"\r\n");
            self.write(&line)?;
            let window = self.reply_window(deadline);
            self.expect(wire::PASTE_ECHO, window, "paste line")?;
        }
        self.write(wire::PASTE_END)?;
        let window = self.reply_window(deadline);
        self.expect(wire::PASTE_DONE, window, "finish paste")?;
        info!(elapsed = ?t0.elapsed(), "companion source sent");
        Ok(())
    }

    /// Brings the companion up with the configured budget unless it is
    /// already active.
    pub(crate) fn ensure_agent(&mut self) -> Result<()> {
        if self.mode == Mode::AgentActive {
            return Ok(());
        }
        let deadline = Self::deadline_in(self.config.negotiate_timeout);
        let soft_reset = self.config.soft_reset;
        self.enter_agent(false, deadline, soft_reset)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
