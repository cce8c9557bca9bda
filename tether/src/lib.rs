//! Drive an embedded interpreter over a serial console.
//!
//! `tether` negotiates the device shell into known modes, bootstraps a small
//! companion program onto the device, and calls into it to move files and
//! query the filesystem. All traffic shares one half-duplex text console,
//! so binary payloads travel as base64 frames (see [`tether_proto`]).
//!
//! # Quick start
//!
//! ```no_run
//! use tether::{Connection, LinkConfig, StubSource};
//!
//! let port = tether::transport::open("/dev/ttyACM0", 115_200)?;
//! let stub = StubSource::from_file("rstub.py")?;
//! let mut conn = Connection::with_config(port, LinkConfig::default()).with_stub(stub);
//!
//! // Negotiates the companion on first use.
//! for name in conn.list_dir("/")? {
//!     println!("{name}");
//! }
//! # Ok::<(), tether::Error>(())
//! ```
//!
//! Every blocking step is bounded by an absolute deadline computed once by
//! the outermost operation, and can be aborted from another thread through
//! the connection's [`CancelToken`].

mod bootstrap;
mod call;
mod cancel;
mod config;
mod connection;
mod error;
pub mod files;
mod frame;
mod mode;
pub mod transport;

pub use bootstrap::StubSource;
pub use call::CallStream;
pub use cancel::CancelToken;
pub use config::LinkConfig;
pub use connection::{Connection, Mode};
pub use error::{Error, Result};
pub use files::{Checksum, RemoteFile};
pub use frame::Frame;
pub use tether_proto::Value;
pub use transport::Transport;
