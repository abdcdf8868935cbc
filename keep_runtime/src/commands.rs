use keep_schema::Realm;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// High-level representation of a command envelope on the ops port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub payload: CommandPayload,
    pub correlation_id: Option<u64>,
}

/// Supported command payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    /// Advance the region scheduler by a number of ticks.
    Turn { steps: u32 },
    /// Report an enemy strike against a keep.
    Attack { keep_id: u16, attacker: Realm },
    /// Force a keep door open or closed.
    Door { keep_id: u16, open: bool },
    /// Claim a keep on behalf of a guild.
    Claim { keep_id: u16, guild: String },
    /// Release a keep from its claiming guild.
    Release { keep_id: u16 },
    /// Hand a keep to a realm, running the full capture reset.
    Capture { keep_id: u16, realm: Realm },
    /// Set a keep's level immediately, leaving any armed drift running.
    Level { keep_id: u16, target: u8 },
    /// Request a state snapshot for one keep, or all keeps when `None`.
    Status { keep_id: Option<u16> },
}

/// Error returned when encoding a command envelope fails.
#[derive(Debug, Error)]
pub enum CommandEncodeError {
    #[error("encode failed: {0}")]
    Encode(#[from] bincode::Error),
}

/// Error returned when decoding a command envelope fails.
#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("decode failed: {0}")]
    Decode(#[from] bincode::Error),
}

/// Encode the envelope into a binary frame.
pub fn encode_command(envelope: &CommandEnvelope) -> Result<Vec<u8>, CommandEncodeError> {
    Ok(bincode::serialize(envelope)?)
}

/// Decode an envelope from a binary frame.
pub fn decode_command(bytes: &[u8]) -> Result<CommandEnvelope, CommandDecodeError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode the envelope as JSON for ops tooling and log capture.
pub fn encode_command_json(envelope: &CommandEnvelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

/// Decode an envelope from its JSON form.
pub fn decode_command_json(data: &str) -> serde_json::Result<CommandEnvelope> {
    serde_json::from_str(data)
}
