//! Owner and asset records, the ledger snapshot, and expected principals

use crate::ids::OwnerId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Colors an asset may be created with
pub const ASSET_COLORS: [&str; 9] = [
    "white", "green", "blue", "purple", "red", "pink", "orange", "black", "yellow",
];

/// Sizes an asset may be created with
pub const ASSET_SIZES: [&str; 2] = ["35", "16"];

/// Owner created during a provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    /// Key generated at creation time and sent with the create call
    pub id: OwnerId,
    pub username: String,
}

/// One dependent asset to create for an owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerAssignment {
    pub owner_id: OwnerId,
    pub username: String,
}

impl CustomerAssignment {
    /// Replicate every owner `per_owner` times, owners kept in order
    pub fn replicate(owners: &[OwnerRecord], per_owner: usize) -> Vec<Self> {
        owners
            .iter()
            .flat_map(|owner| {
                std::iter::repeat_with(move || CustomerAssignment {
                    owner_id: owner.id.clone(),
                    username: owner.username.clone(),
                })
                .take(per_owner)
            })
            .collect()
    }
}

/// Randomized attributes of a new asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAttributes {
    pub color: String,
    pub size: String,
}

/// Owner entry as stored on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOwner {
    pub id: String,
    pub username: String,
    pub company: String,
}

/// Result of a full ledger read. Never cached: each reconciliation re-reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub owners: Vec<LedgerOwner>,
}

impl LedgerSnapshot {
    /// Whether any owner on the ledger belongs to `company`
    pub fn has_company(&self, company: &str) -> bool {
        self.owners.iter().any(|o| o.company == company)
    }

    /// Owner with exactly this username registered under `company`
    pub fn owner(&self, username: &str, company: &str) -> Option<&LedgerOwner> {
        self.owners
            .iter()
            .find(|o| o.username == username && o.company == company)
    }
}

/// Usernames the application expects on the ledger, in configured order.
///
/// Names are sanitized on construction: surrounding whitespace is trimmed,
/// characters outside `[A-Za-z0-9_.-]` are dropped, and empty or repeated
/// names are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ExpectedPrincipals(Vec<String>);

impl ExpectedPrincipals {
    pub fn new<I, S>(usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let names = usernames
            .into_iter()
            .map(|name| {
                name.as_ref()
                    .trim()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
                    .collect::<String>()
            })
            .filter(|name| !name.is_empty())
            .filter(|name| seen.insert(name.clone()))
            .collect();
        Self(names)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names with no owner for `company` in the snapshot, in configured order
    pub fn missing_from(&self, snapshot: &LedgerSnapshot, company: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|name| snapshot.owner(name, company).is_none())
            .cloned()
            .collect()
    }
}

impl From<Vec<String>> for ExpectedPrincipals {
    fn from(names: Vec<String>) -> Self {
        Self::new(names)
    }
}

impl From<ExpectedPrincipals> for Vec<String> {
    fn from(principals: ExpectedPrincipals) -> Self {
        principals.0
    }
}

/// Ledger key under which an owner's full name is indexed
pub fn owner_key_name(username: &str, company: &str) -> String {
    format!("{}.{}", username.to_lowercase(), company)
}
