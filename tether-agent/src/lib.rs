//! Companion program for tether.
//!
//! Runs on the device side of the console, answers framed [`Request`]s with
//! framed [`Reply`]s, and dispatches calls to a closed [`Registry`] of
//! operations fixed at build time. New capabilities mean a new build; no
//! code is ever received over the wire.
//!
//! [`Request`]: tether_proto::Request
//! [`Reply`]: tether_proto::Reply

mod link;
pub mod ops;
mod registry;
mod server;

pub use link::{recv_frame, send_frame};
pub use ops::Session;
pub use registry::{OpResult, Operation, Output, Registry};
pub use server::Agent;
