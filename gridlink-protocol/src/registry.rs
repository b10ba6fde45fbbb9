//! Three-tier type registry and the global constant table.
//!
//! Instruction text for a type name is resolved per-call table first, then
//! the built-in table, then plugin registrations; first match wins. The
//! built-in tables are process-wide, read-only statics.

use crate::error::ProtocolError;

/// Built-in pack instructions shipped with the protocol.
pub const BUILTIN_TYPES: &[(&str, &str)] = &[
    (
        "MsgHeader_PI",
        "str type[HEADER_TYPE_LEN]; int msgLen; int errorLen; int bsLen; int intInfo;",
    ),
    ("RErrMsg_PI", "int status; str msg[ERR_MSG_LEN];"),
    ("RError_PI", "int count; struct *RErrMsg_PI[count];"),
    (
        "Version_PI",
        "int status; str relVersion[NAME_LEN]; str apiVersion[NAME_LEN]; \
         int reconnPort; str reconnAddr[LONG_NAME_LEN]; int cookie;",
    ),
    (
        "StartupPack_PI",
        "int protocol; int reconnFlag; int connectCnt; str clientUser[NAME_LEN]; \
         str clientRealm[NAME_LEN]; str proxyUser[NAME_LEN]; str proxyRealm[NAME_LEN]; \
         str relVersion[NAME_LEN]; str apiVersion[NAME_LEN]; str option[LONG_NAME_LEN];",
    ),
    ("STR_PI", "str myStr[MAX_NAME_LEN];"),
    ("STR_PTR_PI", "str *myStr;"),
    ("INT_PI", "int myInt;"),
    ("INT16_PI", "int16 myInt;"),
    ("DOUBLE_PI", "double myDouble;"),
    ("CharArray_PI", "char myChar[MAX_NAME_LEN];"),
    ("BinBytesBuf_PI", "int buflen; char *buf(buflen);"),
    (
        "KeyValPair_PI",
        "int ssLen; str *keyWord[ssLen]; str *svalue[ssLen];",
    ),
    ("InxIvalPair_PI", "int iiLen; int *inx(iiLen); int *value(iiLen);"),
    ("InxValPair_PI", "int isLen; int *inx(isLen); str *svalue[isLen];"),
];

/// Named constants usable as dimension expressions.
pub const CONSTANTS: &[(&str, i32)] = &[
    ("HEADER_TYPE_LEN", 128),
    ("NAME_LEN", 64),
    ("CHKSUM_LEN", 64),
    ("LONG_NAME_LEN", 256),
    ("MAX_NAME_LEN", 1024),
    ("SHORT_STR_LEN", 32),
    ("TIME_LEN", 32),
    ("ERR_MSG_LEN", 1024),
];

/// Looks up a named constant.
pub fn constant(name: &str) -> Option<i32> {
    CONSTANTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| *v)
}

/// A per-call view over the three registry tiers.
#[derive(Debug, Default)]
pub struct Registry {
    local: Vec<(String, String)>,
    plugins: Vec<(String, String)>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Adds a per-call override definition. Overrides shadow both the
    /// built-in table and plugins.
    pub fn add_local(&mut self, name: impl Into<String>, instruction: impl Into<String>) {
        self.local.push((name.into(), instruction.into()));
    }

    /// Registers a plugin-supplied definition, consulted after the built-in
    /// table.
    pub fn register_plugin(&mut self, name: impl Into<String>, instruction: impl Into<String>) {
        self.plugins.push((name.into(), instruction.into()));
    }

    /// Builder-style variant of [`Registry::add_local`].
    pub fn with_local(mut self, name: impl Into<String>, instruction: impl Into<String>) -> Self {
        self.add_local(name, instruction);
        self
    }

    /// Resolves a type name to its instruction text: per-call table, then
    /// built-ins, then plugins.
    pub fn lookup(&self, name: &str) -> Result<&str, ProtocolError> {
        if let Some((_, text)) = self.local.iter().find(|(n, _)| n == name) {
            return Ok(text);
        }
        if let Some((_, text)) = BUILTIN_TYPES.iter().find(|(n, _)| *n == name) {
            return Ok(text);
        }
        if let Some((_, text)) = self.plugins.iter().find(|(n, _)| n == name) {
            return Ok(text);
        }
        Err(ProtocolError::UnresolvedSchema(name.to_string()))
    }
}
