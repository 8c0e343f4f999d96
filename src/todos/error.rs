//! Failures of the remote data source

use crate::effect::ErrorTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::model::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} answered with status {code}")]
    Status { url: String, code: u16 },

    #[error("could not decode body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("user {user_id} does not exist")]
    UserNotFound { user_id: UserId },
}

/// Discriminator of [`FetchError`], used by `catch_tag` and retry filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Transport,
    Status,
    Decode,
    UserNotFound,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchErrorKind::Transport => "transport",
            FetchErrorKind::Status => "status",
            FetchErrorKind::Decode => "decode",
            FetchErrorKind::UserNotFound => "user_not_found",
        };
        f.write_str(name)
    }
}

impl ErrorTag for FetchError {
    type Tag = FetchErrorKind;

    fn tag(&self) -> FetchErrorKind {
        match self {
            FetchError::Transport { .. } => FetchErrorKind::Transport,
            FetchError::Status { .. } => FetchErrorKind::Status,
            FetchError::Decode { .. } => FetchErrorKind::Decode,
            FetchError::UserNotFound { .. } => FetchErrorKind::UserNotFound,
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        self.tag()
    }

    /// Whether retrying could plausibly help. Undecodable bodies and absent
    /// users never change between attempts.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Transport | FetchErrorKind::Status
        )
    }
}
