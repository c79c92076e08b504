//! Local client and job tracker (§4.9): the `saltcore` binary's library
//! half. Two independent surfaces share this crate: `run` submits a job
//! and collects returns over the network; `keys` inspects and transitions
//! the on-disk key store directly, with no round-trip to the master.

pub mod config;
pub mod error;
pub mod events_client;
pub mod job;
pub mod keys;
pub mod request_client;

pub use config::{Cli, Command};
pub use error::ClientError;
