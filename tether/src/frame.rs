//! Host side of the framed line codec.
//!
//! Sending is stop-and-wait: the start marker and every chunk line must be
//! acknowledged with `.` before the next line goes out, and the end marker
//! with `\n`. Receiving skips console noise until a start marker, then yields
//! decoded chunks lazily until the end marker.

use std::time::Instant;

use tether_proto::{chunk_lines, decode_line, wire};
use tracing::info;

use crate::connection::{Connection, Mode};
use crate::error::{Error, Result};
use crate::transport::Transport;

impl<T: Transport> Connection<T> {
    /// Sends `payload` as one frame.
    pub fn send_frame(&mut self, payload: &[u8], deadline: Instant) -> Result<()> {
        let start = format!("\n{}\n", wire::FRAME_START);
        self.write(start.as_bytes())?;
        self.expect(&[wire::ACK], deadline, "frame start ack")?;
        for line in chunk_lines(payload) {
            self.write(line.as_bytes())?;
            self.expect(&[wire::ACK], deadline, "frame chunk ack")?;
        }
        let end = format!("{}\n", wire::FRAME_END);
        self.write(end.as_bytes())?;
        self.expect(&[wire::ACK_END], deadline, "frame end ack")?;
        Ok(())
    }

    /// Waits for the next frame and returns its chunks as a lazy iterator.
    ///
    /// Lines before the start marker are logged and discarded. Each call
    /// yields a fresh sequence; dropping it before the end marker leaves the
    /// connection in [`Mode::Unknown`].
    pub fn recv_frame(&mut self, deadline: Instant) -> Result<Frame<'_, T>> {
        loop {
            let line = self.read_line(deadline)?;
            if line.is_empty() {
                return Err(Error::Timeout { op: "frame start" });
            }
            let text = line.trim_ascii_end();
            if text.ends_with(wire::FRAME_START.as_bytes()) {
                break;
            }
            if !text.is_empty() {
                info!("Remote: {}", String::from_utf8_lossy(text));
            }
        }
        Ok(Frame {
            conn: self,
            deadline,
            done: false,
        })
    }

    /// Receives one whole frame.
    pub fn recv_frame_bytes(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        for chunk in self.recv_frame(deadline)? {
            payload.extend_from_slice(&chunk?);
        }
        Ok(payload)
    }
}

/// Decoded chunks of one incoming frame.
#[derive(Debug)]
pub struct Frame<'a, T: Transport> {
    conn: &'a mut Connection<T>,
    deadline: Instant,
    done: bool,
}

impl<T: Transport> Frame<'_, T> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let line = self.conn.read_line(self.deadline)?;
        if !line.ends_with(b"\n") {
            return Err(Error::Timeout { op: "frame body" });
        }
        let text = line.trim_ascii();
        if text == wire::FRAME_END.as_bytes() {
            return Ok(None);
        }
        decode_line(text).map(Some).map_err(Error::protocol)
    }
}

impl<T: Transport> Iterator for Frame<'_, T> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                self.conn.mode = Mode::Unknown;
                Some(Err(e))
            }
        }
    }
}

impl<T: Transport> Drop for Frame<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.conn.mode = Mode::Unknown;
        }
    }
}
