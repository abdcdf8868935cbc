//! Shared runtime utilities for Greymarch keep servers.
//!
//! Re-exports the data contracts from `keep_schema` and carries the pieces
//! that operate on those types without depending on the Bevy runtime in
//! `core_keeps`: the pluggable frontier ruleset, the keep persistence trait
//! with its in-memory implementation, and the ops-port command surface.

pub use keep_schema::*;

mod command_text;
mod commands;
mod rules;
mod store;

pub use command_text::{parse_command_line, CommandParseError};
pub use commands::{
    decode_command, decode_command_json, encode_command, encode_command_json, CommandDecodeError,
    CommandEncodeError, CommandEnvelope, CommandPayload,
};
pub use rules::{BaselineRules, FrontierRuleset, KeepValuation};
pub use store::{KeepStore, KeepStoreError, MemoryKeepStore};
