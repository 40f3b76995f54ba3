//! Wire protocol for the swipe-command dispatcher
//!
//! One command per line over a persistent TCP connection. A line is either
//! plain JSON (legacy swipe submission) or pipe-delimited fields whose
//! first field selects the operation. A 2-field line whose tag parses as an
//! email address is the verification command. Responses are single-line
//! JSON, except FCOUNT which answers the decimal count as plain text.

pub mod dispatcher;

use serde_json::Value;
use thiserror::Error;
use validator::ValidateEmail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Password reset precheck: the email must already be registered
    Exists,
    /// Registration precheck: the email must not be registered yet
    Dne,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Verify { email: String, mode: VerifyMode },
    StoreCredential { email: String, password_hash: String, device_id: String },
    CheckCredential { email: String, password_hash: String, device_id: String },
    UpdatePassword { email: String, password_hash: String, device_id: String },
    FeatureCount { user_id: i64 },
    StoreFeatures { payload: Value },
    LegacyStoreFeatures { payload: Value },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,

    #[error("invalid JSON payload: {0}")]
    BadJson(String),

    #[error("unknown command tag '{0}'")]
    UnknownTag(String),

    #[error("{tag} expects {expected} fields, got {got}")]
    FieldCount { tag: &'static str, expected: usize, got: usize },

    #[error("invalid userID '{0}'")]
    BadUserId(String),

    #[error("invalid verification mode '{0}'")]
    BadMode(String),
}

/// Classify one input line into a command
pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    if line.starts_with('{') {
        let payload =
            serde_json::from_str(line).map_err(|e| ProtocolError::BadJson(e.to_string()))?;
        return Ok(Command::LegacyStoreFeatures { payload });
    }

    let (tag, rest) = match line.split_once('|') {
        Some((tag, rest)) => (tag, rest),
        None => return Err(ProtocolError::UnknownTag(line.to_string())),
    };

    match tag {
        "STORE" | "CHECK" | "UPDATE" => {
            let fields: Vec<&str> = rest.split('|').collect();
            if fields.len() != 3 {
                return Err(ProtocolError::FieldCount {
                    tag: match tag {
                        "STORE" => "STORE",
                        "CHECK" => "CHECK",
                        _ => "UPDATE",
                    },
                    expected: 3,
                    got: fields.len(),
                });
            }
            let email = fields[0].to_string();
            let password_hash = fields[1].to_string();
            let device_id = fields[2].to_string();
            Ok(match tag {
                "STORE" => Command::StoreCredential { email, password_hash, device_id },
                "CHECK" => Command::CheckCredential { email, password_hash, device_id },
                _ => Command::UpdatePassword { email, password_hash, device_id },
            })
        }

        "FCOUNT" => {
            if rest.contains('|') {
                return Err(ProtocolError::FieldCount {
                    tag: "FCOUNT",
                    expected: 1,
                    got: rest.split('|').count(),
                });
            }
            let user_id = rest
                .trim()
                .parse()
                .map_err(|_| ProtocolError::BadUserId(rest.trim().to_string()))?;
            Ok(Command::FeatureCount { user_id })
        }

        // Payload is JSON; it may legally contain pipes, so no re-split
        "FSTORE" => {
            let payload =
                serde_json::from_str(rest).map_err(|e| ProtocolError::BadJson(e.to_string()))?;
            Ok(Command::StoreFeatures { payload })
        }

        _ if tag.validate_email() => {
            if rest.contains('|') {
                return Err(ProtocolError::FieldCount {
                    tag: "verification",
                    expected: 1,
                    got: rest.split('|').count(),
                });
            }
            let mode = match rest.trim() {
                "exists" => VerifyMode::Exists,
                "dne" => VerifyMode::Dne,
                other => return Err(ProtocolError::BadMode(other.to_string())),
            };
            Ok(Command::Verify { email: tag.to_string(), mode })
        }

        _ => Err(ProtocolError::UnknownTag(tag.to_string())),
    }
}

/// One response line; JSON for every command except FCOUNT
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(Value),
    Plain(String),
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Reply::Json(value)
    }

    pub fn to_wire(&self) -> String {
        match self {
            Reply::Json(value) => value.to_string(),
            Reply::Plain(text) => text.clone(),
        }
    }
}
