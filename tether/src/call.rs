//! Remote calls: one request record out, one reply record (or a stream of
//! them) back.

use std::time::Instant;

use tether_proto::{Reply, Request, Value};
use tracing::debug;

use crate::connection::{Connection, Mode};
use crate::error::{Error, Result};
use crate::transport::Transport;

impl<T: Transport> Connection<T> {
    /// Calls `function` with `args` and returns its result.
    ///
    /// A streamed result is collected into [`Value::List`]. If the stream
    /// fails part-way, [`Error::Stream`] carries the values received before
    /// the failure.
    pub fn call(&mut self, function: &str, args: Vec<Value>) -> Result<Value> {
        let mut stream = self.call_stream(function, args)?;
        if !stream.is_stream() {
            return stream.next().unwrap_or(Ok(Value::Nil));
        }
        let mut items = Vec::new();
        for item in stream {
            match item {
                Ok(v) => items.push(v),
                Err(Error::Remote(message)) => {
                    return Err(Error::Stream {
                        message,
                        partial: items,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Value::List(items))
    }

    /// Calls `function` and yields its result values as they arrive.
    ///
    /// A scalar result yields exactly one value. A stream yields each item in
    /// order and ends after [`Reply::StreamEnd`], or after a single
    /// [`Error::Remote`] item if the companion fails mid-stream. The stream
    /// must be drained to keep the line in sync; dropping it early leaves the
    /// connection in [`Mode::Unknown`].
    pub fn call_stream(&mut self, function: &str, args: Vec<Value>) -> Result<CallStream<'_, T>> {
        self.ensure_agent()?;
        debug!(function, args = args.len(), "call");
        let request = Request::Call {
            function: function.to_owned(),
            args,
        };
        let first = self.exchange(&request)?;
        let (pending, streaming) = match first {
            Reply::Scalar(v) => (Some(v), false),
            Reply::Error(message) => return Err(Error::Remote(message)),
            Reply::StreamStart => (None, true),
            other => {
                self.mode = Mode::Unknown;
                return Err(Error::Protocol(format!("unexpected reply {other}")));
            }
        };
        Ok(CallStream {
            conn: self,
            pending,
            streaming,
            finished: false,
        })
    }

    /// Stops the companion's request loop.
    ///
    /// The device returns to its prompt; the mode becomes
    /// [`Mode::Unknown`] until the next negotiation confirms it.
    pub fn exit(&mut self) -> Result<()> {
        if self.mode != Mode::AgentActive {
            return Ok(());
        }
        let record = tether_proto::encode(&Request::Exit).map_err(Error::protocol)?;
        let deadline = Self::deadline_in(self.config.frame_timeout);
        let result = self.send_frame(&record, deadline);
        self.mode = Mode::Unknown;
        result
    }

    /// Sends one request and receives the first reply.
    fn exchange(&mut self, request: &Request) -> Result<Reply> {
        let record = tether_proto::encode(request).map_err(Error::protocol)?;
        let deadline = Self::deadline_in(self.config.frame_timeout);
        let result = self
            .send_frame(&record, deadline)
            .and_then(|()| self.recv_reply(deadline));
        if let Err(e) = &result
            && e.desyncs()
        {
            self.mode = Mode::Unknown;
        }
        result
    }

    /// Receives and decodes one reply record.
    fn recv_reply(&mut self, deadline: Instant) -> Result<Reply> {
        let record = self.recv_frame_bytes(deadline)?;
        tether_proto::decode(&record).map_err(Error::protocol)
    }
}

/// Result values of one call, received on demand.
#[derive(Debug)]
pub struct CallStream<'a, T: Transport> {
    conn: &'a mut Connection<T>,
    pending: Option<Value>,
    streaming: bool,
    finished: bool,
}

impl<T: Transport> CallStream<'_, T> {
    /// Whether the companion answered with a stream rather than a scalar.
    pub fn is_stream(&self) -> bool {
        self.streaming
    }

    fn next_item(&mut self) -> Option<Result<Value>> {
        if !self.streaming {
            self.finished = true;
            return self.pending.take().map(Ok);
        }
        let deadline = Connection::<T>::deadline_in(self.conn.config.frame_timeout);
        match self.conn.recv_reply(deadline) {
            Ok(Reply::StreamItem(v)) => Some(Ok(v)),
            Ok(Reply::StreamEnd) => {
                self.finished = true;
                None
            }
            Ok(Reply::Error(message)) => {
                self.finished = true;
                Some(Err(Error::Remote(message)))
            }
            Ok(other) => {
                self.finished = true;
                self.conn.mode = Mode::Unknown;
                Some(Err(Error::Protocol(format!(
                    "unexpected reply {other} in stream"
                ))))
            }
            Err(e) => {
                self.finished = true;
                self.conn.mode = Mode::Unknown;
                Some(Err(e))
            }
        }
    }
}

impl<T: Transport> Iterator for CallStream<'_, T> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        self.next_item()
    }
}

impl<T: Transport> Drop for CallStream<'_, T> {
    fn drop(&mut self) {
        if self.streaming && !self.finished {
            self.conn.mode = Mode::Unknown;
        }
    }
}
