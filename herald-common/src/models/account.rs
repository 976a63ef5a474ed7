// File: herald-common/src/models/account.rs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operational health of one automation account within a run.
///
/// `Invalid` is permanent for the run (credential rejected); `Disabled`
/// means the worker gave up on the account (exhausted connect retries or
/// no proxy available); `RateLimited` is transient and the account stays
/// eligible for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountHealth {
    Active,
    Invalid,
    RateLimited,
    Disabled,
}

impl fmt::Display for AccountHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountHealth::Active => write!(f, "active"),
            AccountHealth::Invalid => write!(f, "invalid"),
            AccountHealth::RateLimited => write!(f, "rate-limited"),
            AccountHealth::Disabled => write!(f, "disabled"),
        }
    }
}

/// Short preview of a credential that is safe to put in logs.
/// Raw credential values never leave the worker that owns them.
pub fn mask_credential(raw: &str) -> String {
    let trimmed = raw.trim();
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= 10 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
