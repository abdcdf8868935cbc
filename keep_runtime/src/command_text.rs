use std::num::ParseIntError;

use keep_schema::Realm;
use thiserror::Error;

use crate::CommandPayload;

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("invalid realm '{0}'")]
    InvalidRealm(String),
    #[error("invalid door state '{0}'")]
    InvalidDoorState(String),
}

pub fn parse_command_line(input: &str) -> Result<CommandPayload, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let mut parts = trimmed.split_whitespace();
    let verb = parts
        .next()
        .map(|v| v.to_ascii_lowercase())
        .ok_or(CommandParseError::Empty)?;

    match verb.as_str() {
        "turn" => {
            let steps_str = parts.next().unwrap_or("1");
            let steps = parse_u32(steps_str, "turn steps")?;
            Ok(CommandPayload::Turn { steps })
        }
        "attack" => {
            let keep_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("keep"))?;
            let realm_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("attacker realm"))?;
            let keep_id = parse_u16(keep_str, "attack keep")?;
            let attacker = parse_realm(realm_str)?;
            Ok(CommandPayload::Attack { keep_id, attacker })
        }
        "door" => {
            let keep_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("keep"))?;
            let state_str = parts.next().unwrap_or("open").to_ascii_lowercase();
            let keep_id = parse_u16(keep_str, "door keep")?;
            let open = match state_str.as_str() {
                "open" | "breach" | "breached" => true,
                "close" | "closed" | "shut" => false,
                other => {
                    return Err(CommandParseError::InvalidDoorState(other.to_string()));
                }
            };
            Ok(CommandPayload::Door { keep_id, open })
        }
        "claim" => {
            let keep_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("keep"))?;
            let keep_id = parse_u16(keep_str, "claim keep")?;
            // Guild names carry spaces; the rest of the line is the name.
            let guild = parts.collect::<Vec<_>>().join(" ");
            if guild.is_empty() {
                return Err(CommandParseError::MissingArgument("guild"));
            }
            Ok(CommandPayload::Claim { keep_id, guild })
        }
        "release" => {
            let keep_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("keep"))?;
            let keep_id = parse_u16(keep_str, "release keep")?;
            Ok(CommandPayload::Release { keep_id })
        }
        "capture" => {
            let keep_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("keep"))?;
            let realm_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("realm"))?;
            let keep_id = parse_u16(keep_str, "capture keep")?;
            let realm = parse_realm(realm_str)?;
            Ok(CommandPayload::Capture { keep_id, realm })
        }
        "level" => {
            let keep_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("keep"))?;
            let target_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("target level"))?;
            let keep_id = parse_u16(keep_str, "level keep")?;
            let target = parse_u8(target_str, "level target")?;
            Ok(CommandPayload::Level { keep_id, target })
        }
        "status" => {
            let keep_id = match parts.next() {
                Some(token) => Some(parse_u16(token, "status keep")?),
                None => None,
            };
            Ok(CommandPayload::Status { keep_id })
        }
        other => Err(CommandParseError::UnknownCommand(other.to_string())),
    }
}

fn parse_u8(value: &str, context: &'static str) -> Result<u8, CommandParseError> {
    value
        .parse::<u8>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_u16(value: &str, context: &'static str) -> Result<u16, CommandParseError> {
    value
        .parse::<u16>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}

fn parse_realm(token: &str) -> Result<Realm, CommandParseError> {
    match token.to_ascii_lowercase().as_str() {
        "neutral" | "none" => Ok(Realm::Neutral),
        "ardan" | "ard" => Ok(Realm::Ardan),
        "veska" | "ves" => Ok(Realm::Veska),
        "morwen" | "mor" => Ok(Realm::Morwen),
        other => Err(CommandParseError::InvalidRealm(other.to_string())),
    }
}
