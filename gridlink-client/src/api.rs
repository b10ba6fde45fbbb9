//! Endpoint descriptor table.
//!
//! Each RPC endpoint is described by its numeric id, its optional input and
//! output schema names, and whether it carries a byte-stream in either
//! direction. The table is resolved once per call and is read-only to the
//! call lifecycle; the embedding application populates it.

use crate::error::ClientError;
use std::collections::HashMap;

/// Metadata for one RPC endpoint.
#[derive(Debug, Clone)]
pub struct ApiEntry {
    pub number: u32,
    /// Input record schema name, if the endpoint takes a record.
    pub in_type: Option<String>,
    /// Output record schema name, if the endpoint returns a record.
    pub out_type: Option<String>,
    /// Whether a request byte-stream is forwarded.
    pub in_bs: bool,
    /// Whether the reply carries a byte-stream.
    pub out_bs: bool,
}

impl ApiEntry {
    pub fn new(number: u32) -> ApiEntry {
        ApiEntry {
            number,
            in_type: None,
            out_type: None,
            in_bs: false,
            out_bs: false,
        }
    }

    pub fn with_input(mut self, schema: impl Into<String>) -> Self {
        self.in_type = Some(schema.into());
        self
    }

    pub fn with_output(mut self, schema: impl Into<String>) -> Self {
        self.out_type = Some(schema.into());
        self
    }

    pub fn with_input_bs(mut self) -> Self {
        self.in_bs = true;
        self
    }

    pub fn with_output_bs(mut self) -> Self {
        self.out_bs = true;
        self
    }
}

/// Static map from endpoint ids to descriptors. Absence of an id is a hard
/// failure at call time.
#[derive(Debug, Clone, Default)]
pub struct ApiTable {
    entries: HashMap<u32, ApiEntry>,
}

impl ApiTable {
    pub fn new() -> ApiTable {
        ApiTable::default()
    }

    pub fn insert(&mut self, entry: ApiEntry) {
        self.entries.insert(entry.number, entry);
    }

    pub fn with_entry(mut self, entry: ApiEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn lookup(&self, number: u32) -> Result<&ApiEntry, ClientError> {
        self.entries
            .get(&number)
            .ok_or(ClientError::UnknownEndpoint(number))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The endpoints every gridlink server understands.
    pub fn core() -> ApiTable {
        ApiTable::new()
            .with_entry(ApiEntry::new(100)) // ping
            .with_entry(ApiEntry::new(110).with_output("Version_PI"))
            .with_entry(
                ApiEntry::new(210)
                    .with_input("KeyValPair_PI")
                    .with_output("KeyValPair_PI"),
            )
            .with_entry(
                ApiEntry::new(301)
                    .with_input("INT_PI")
                    .with_output("INT_PI")
                    .with_input_bs(),
            )
            .with_entry(
                ApiEntry::new(302)
                    .with_input("INT_PI")
                    .with_output("INT_PI")
                    .with_output_bs(),
            )
    }
}
