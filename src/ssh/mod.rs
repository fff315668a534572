//! SSH module - authenticated connections to collection hosts
//!
//! This module provides the connection layer using the russh library.
//! SFTP operations on top of a connection live in [`crate::sftp`].

mod client;
mod config;
mod error;

pub use client::{ClientHandler, SshClient, SshHandle};
pub use config::{AuthMethod, HostDescriptor};
pub(crate) use config::{default_port, default_timeout};
pub use error::SshError;
