//! Master-worker control plane for a distributed backup archiver.
//!
//! A [`server_io::ServerIo`] wraps one TCP connection speaking the
//! line-based command/result protocol described in `protocol`. The
//! master drives it through a [`connector::Connector`]; the worker
//! drives it through [`worker::dispatch_worker_command`].

pub mod backends;
pub mod codec;
pub mod connector;
pub mod error;
pub mod index;
pub mod job;
pub mod protocol;
pub mod server_io;
pub mod session;
pub mod storage;
pub mod worker;

pub use error::{Error, ErrorKind, Result};
