//! Wire protocol for tether host↔device communication.
//!
//! The device console is a line-oriented text channel shared with the
//! interpreter's own output, so payloads travel as *frames*: a start marker
//! line, base64 chunk lines of at most [`CHUNK_SIZE`] raw bytes, and an end
//! marker line. Each frame carries one [`record`]: a version byte followed by
//! a [`postcard`]-encoded [`Request`] or [`Reply`].

pub mod hex;
pub mod lines;
mod message;
pub mod record;
pub mod wire;

pub use lines::{CHUNK_SIZE, chunk_lines, decode_line};
pub use message::{Reply, Request, Value};
pub use record::{PROTOCOL_VERSION, decode, encode};
