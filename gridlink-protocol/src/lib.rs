//! # gridlink-protocol
//!
//! Wire protocol implementation for gridlink (GXP - the gridlink exchange
//! protocol).
//!
//! This crate provides:
//! - The pack-instruction schema language and three-tier type registry
//! - A dynamic record model for schema-driven marshalling
//! - Dual wire encodings (compact binary and tagged XML) behind one engine
//! - Message framing with payload, error-stack and byte-stream segments

pub mod codec;
pub mod error;
pub mod frame;
pub mod instruction;
pub mod pack;
pub mod registry;
pub mod value;

pub use error::{status, ProtocolError};
pub use frame::{ErrorEntry, ErrorStack, MsgHeader, WireMessage, MAX_HEADER_LEN};
pub use instruction::{parse_instruction, Item, PointerKind, TypeTag};
pub use pack::{Packed, Packer, Unpacker};
pub use registry::Registry;
pub use value::Value;

/// Wire encodings negotiated per session. The message header is always XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    /// Compact network-byte-order binary encoding.
    #[default]
    Binary,
    /// Tagged XML encoding.
    Xml,
}

/// Default port for gridlink servers.
pub const DEFAULT_PORT: u16 = 7427;

/// Maximum size of one packed payload (32 MiB).
pub const MAX_PACKED_LEN: usize = 32 * 1024 * 1024;
