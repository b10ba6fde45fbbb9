//! # gridlink-client
//!
//! Client library for gridlink.
//!
//! This crate provides:
//! - The endpoint descriptor table consulted once per call
//! - Async TCP connection management with a strict two-phase message read
//! - The call lifecycle: encode, send, receive, decode, error-stack merge
//! - A one-shot reconnect-and-retry policy behind a pluggable reconnector

pub mod api;
pub mod connection;
pub mod error;
pub mod session;

pub use api::{ApiEntry, ApiTable};
pub use connection::{Connection, ConnectionConfig, Reconnector};
pub use error::ClientError;
pub use session::{CallResult, Session};
