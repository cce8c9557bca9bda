//! Request loop: one framed request in, one or more framed replies out.

use std::io::{self, BufRead, Write};

use tether_proto::{Reply, Request};

use crate::link::{recv_frame, send_frame};
use crate::ops::Session;
use crate::registry::{Output, Registry};

/// The companion: a registry of operations and the session they act on.
#[derive(Debug)]
pub struct Agent {
    registry: Registry,
    session: Session,
}

impl Agent {
    /// Creates an agent serving `registry` against `session`.
    pub fn new(registry: Registry, session: Session) -> Self {
        Self { registry, session }
    }

    /// The session operations act on.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Sends the handshake, then answers requests until [`Request::Exit`].
    ///
    /// Returns `Ok(())` on exit. A closed console surfaces as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn serve(&mut self, r: &mut impl BufRead, w: &mut impl Write) -> io::Result<()> {
        send_frame(w, &[])?;
        loop {
            let payload = match recv_frame(r, w) {
                Ok(payload) => payload,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    reply(w, &Reply::Error(format!("bad frame: {e}")))?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let req: Request = match tether_proto::decode(&payload) {
                Ok(req) => req,
                Err(e) => {
                    reply(w, &Reply::Error(format!("bad request: {e}")))?;
                    continue;
                }
            };
            match req {
                Request::Exit => return Ok(()),
                Request::Call { function, args } => self.dispatch(w, &function, args)?,
                other => reply(w, &Reply::Error(format!("unsupported request: {other}")))?,
            }
        }
    }

    fn dispatch(
        &mut self,
        w: &mut impl Write,
        function: &str,
        args: Vec<tether_proto::Value>,
    ) -> io::Result<()> {
        match self.registry.invoke(&mut self.session, function, args) {
            Ok(Output::Scalar(v)) => reply(w, &Reply::Scalar(v)),
            Err(message) => reply(w, &Reply::Error(message)),
            Ok(Output::Stream(items)) => {
                reply(w, &Reply::StreamStart)?;
                for item in items {
                    match item {
                        Ok(v) => reply(w, &Reply::StreamItem(v))?,
                        Err(message) => return reply(w, &Reply::Error(message)),
                    }
                }
                reply(w, &Reply::StreamEnd)
            }
        }
    }
}

/// Sends one reply, substituting an error if it cannot be encoded.
fn reply(w: &mut impl Write, msg: &Reply) -> io::Result<()> {
    let payload = match tether_proto::encode(msg) {
        Ok(p) => p,
        Err(e) => tether_proto::encode(&Reply::Error(format!("unencodable reply: {e}")))?,
    };
    send_frame(w, &payload)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tether_proto::Value;

    use super::*;

    fn request(buf: &mut Vec<u8>, req: &Request) {
        send_frame(buf, &tether_proto::encode(req).unwrap()).unwrap();
    }

    fn call(buf: &mut Vec<u8>, function: &str, args: Vec<Value>) {
        request(
            buf,
            &Request::Call {
                function: function.to_owned(),
                args,
            },
        );
    }

    /// Runs the agent over `input` and returns every reply it sent.
    fn run(registry: Registry, input: Vec<u8>) -> (io::Result<()>, Vec<Reply>) {
        let mut agent = Agent::new(registry, Session::new(std::env::temp_dir()));
        let mut out = Vec::new();
        let result = agent.serve(&mut Cursor::new(input), &mut out);

        let mut r = Cursor::new(out);
        let handshake = recv_frame(&mut r, &mut io::sink()).unwrap();
        assert!(handshake.is_empty());
        let mut replies = Vec::new();
        while let Ok(frame) = recv_frame(&mut r, &mut io::sink()) {
            replies.push(tether_proto::decode(&frame).unwrap());
        }
        (result, replies)
    }

    #[test]
    fn scalar_and_error_replies() {
        let mut input = Vec::new();
        call(&mut input, "echo", vec![Value::from("hi")]);
        call(&mut input, "nope", vec![]);
        request(&mut input, &Request::Exit);

        let (result, replies) = run(Registry::builtin(), input);
        result.unwrap();
        assert_eq!(
            replies,
            vec![
                Reply::Scalar(Value::from("hi")),
                Reply::Error("no such function: nope".into()),
            ]
        );
    }

    #[test]
    fn stream_error_ends_stream_but_not_loop() {
        let registry = Registry::new().with("gen", |_, _| {
            let items = vec![Ok(Value::Int(1)), Ok(Value::Int(2)), Err("boom".to_owned())];
            Ok(Output::Stream(Box::new(items.into_iter())))
        });
        let mut input = Vec::new();
        call(&mut input, "gen", vec![]);
        call(&mut input, "gen", vec![]);
        request(&mut input, &Request::Exit);

        let (result, replies) = run(registry, input);
        result.unwrap();
        let one = vec![
            Reply::StreamStart,
            Reply::StreamItem(Value::Int(1)),
            Reply::StreamItem(Value::Int(2)),
            Reply::Error("boom".into()),
        ];
        assert_eq!(replies, [one.clone(), one].concat());
    }

    #[test]
    fn empty_stream() {
        let registry = Registry::new().with("none", |_, _| {
            let items = std::iter::empty::<Result<Value, String>>();
            Ok(Output::Stream(Box::new(items)))
        });
        let mut input = Vec::new();
        call(&mut input, "none", vec![]);
        request(&mut input, &Request::Exit);

        let (_, replies) = run(registry, input);
        assert_eq!(replies, vec![Reply::StreamStart, Reply::StreamEnd]);
    }

    #[test]
    fn undecodable_request_is_answered() {
        let mut input = Vec::new();
        send_frame(&mut input, b"\x07garbage").unwrap();
        request(&mut input, &Request::Exit);

        let (result, replies) = run(Registry::builtin(), input);
        result.unwrap();
        assert!(matches!(&replies[..], [Reply::Error(m)] if m.starts_with("bad request")));
    }

    #[test]
    fn corrupt_frame_is_answered_and_loop_continues() {
        let mut input = b"__STUB__\n!!!!\n~~STUB~~\n".to_vec();
        call(&mut input, "echo", vec![Value::Int(3)]);
        request(&mut input, &Request::Exit);

        let (result, replies) = run(Registry::builtin(), input);
        result.unwrap();
        assert!(matches!(&replies[0], Reply::Error(m) if m.starts_with("bad frame")));
        assert_eq!(replies[1], Reply::Scalar(Value::Int(3)));
    }

    #[test]
    fn closed_console_is_eof() {
        let (result, replies) = run(Registry::builtin(), Vec::new());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
        assert!(replies.is_empty());
    }
}
