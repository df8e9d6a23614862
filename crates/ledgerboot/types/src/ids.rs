//! Ledger keys for owners and assets
//!
//! A key is a one-letter prefix followed by exactly 19 digits: the epoch
//! milliseconds at generation time with five random digits appended, left
//! padded with zeros. The chaincode indexes on this layout, so the width and
//! prefixes must not change.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of digits after the key prefix
pub const KEY_DIGITS: usize = 19;

/// Random digits appended after the timestamp
const RANDOM_DIGITS: usize = 5;

const OWNER_PREFIX: char = 'o';
const ASSET_PREFIX: char = 'm';

fn ledger_key(prefix: char, epoch_millis: i64, rng: &mut impl Rng) -> String {
    let mut body = epoch_millis.max(0).to_string();
    for _ in 0..RANDOM_DIGITS {
        body.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    format!("{prefix}{body:0>width$}", width = KEY_DIGITS)
}

fn numeric_suffix(key: &str) -> Option<u64> {
    key.get(1..).and_then(|digits| digits.parse().ok())
}

/// Ledger key of an owner principal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Generate a key from the current wall clock
    pub fn generate() -> Self {
        Self::generate_at(chrono::Utc::now().timestamp_millis(), &mut rand::thread_rng())
    }

    pub fn generate_at(epoch_millis: i64, rng: &mut impl Rng) -> Self {
        Self(ledger_key(OWNER_PREFIX, epoch_millis, rng))
    }

    /// Wrap a key read back from the ledger
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 19-digit body as a number, if the key is well formed
    pub fn numeric_suffix(&self) -> Option<u64> {
        numeric_suffix(&self.0)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger key of a dependent asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn generate() -> Self {
        Self::generate_at(chrono::Utc::now().timestamp_millis(), &mut rand::thread_rng())
    }

    pub fn generate_at(epoch_millis: i64, rng: &mut impl Rng) -> Self {
        Self(ledger_key(ASSET_PREFIX, epoch_millis, rng))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn numeric_suffix(&self) -> Option<u64> {
        numeric_suffix(&self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
