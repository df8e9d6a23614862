//! Chaincode call option bundles
//!
//! A [`ChaincodeCall`] is everything a ledger client needs to send one query
//! or invoke: where to send it, which chaincode, the function and its
//! positional string arguments. Argument order and encoding match what the
//! chaincode parses.

use crate::ids::{AssetId, OwnerId};
use crate::records::AssetAttributes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// TLS settings for talking to a peer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsOptions {
    /// PEM encoded CA certificate of the peer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pem: Option<String>,

    /// Host name to verify against instead of the URL host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_target_name_override: Option<String>,
}

/// Where a call goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeTarget {
    pub peer_urls: Vec<String>,
    #[serde(default)]
    pub peer_tls_opts: TlsOptions,
    pub channel_id: String,
    pub chaincode_id: String,
    pub chaincode_version: String,
}

/// Chaincode functions used during bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaincodeFunction {
    Read,
    ReadEverything,
    InitOwner,
    InitCustomer,
}

impl ChaincodeFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChaincodeFunction::Read => "read",
            ChaincodeFunction::ReadEverything => "read_everything",
            ChaincodeFunction::InitOwner => "init_owner",
            ChaincodeFunction::InitCustomer => "init_customer",
        }
    }

    /// Whether the function writes to the ledger
    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            ChaincodeFunction::InitOwner | ChaincodeFunction::InitCustomer
        )
    }
}

impl fmt::Display for ChaincodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chaincode query or invoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeCall {
    #[serde(flatten)]
    pub target: ChaincodeTarget,
    #[serde(rename = "cc_function")]
    pub function: ChaincodeFunction,
    #[serde(rename = "cc_args")]
    pub args: Vec<String>,
}

impl ChaincodeCall {
    /// Key read by the lightweight readiness probe
    pub const SELFTEST_KEY: &'static str = "selftest";

    /// Key holding the chaincode's self-reported compatibility version
    pub const COMPATIBILITY_KEY: &'static str = "customers_ui";

    fn new(target: &ChaincodeTarget, function: ChaincodeFunction, args: Vec<String>) -> Self {
        Self {
            target: target.clone(),
            function,
            args,
        }
    }

    pub fn selftest(target: &ChaincodeTarget) -> Self {
        Self::new(target, ChaincodeFunction::Read, vec![Self::SELFTEST_KEY.into()])
    }

    pub fn compatibility(target: &ChaincodeTarget) -> Self {
        Self::new(
            target,
            ChaincodeFunction::Read,
            vec![Self::COMPATIBILITY_KEY.into()],
        )
    }

    pub fn read_everything(target: &ChaincodeTarget) -> Self {
        Self::new(target, ChaincodeFunction::ReadEverything, vec![String::new()])
    }

    /// `init_owner(id, username, company)`
    pub fn init_owner(
        target: &ChaincodeTarget,
        id: &OwnerId,
        username: &str,
        company: &str,
    ) -> Self {
        Self::new(
            target,
            ChaincodeFunction::InitOwner,
            vec![id.to_string(), username.into(), company.into()],
        )
    }

    /// `init_customer(id, color, size, owner_id, company)`
    pub fn init_customer(
        target: &ChaincodeTarget,
        id: &AssetId,
        attributes: &AssetAttributes,
        owner_id: &OwnerId,
        company: &str,
    ) -> Self {
        Self::new(
            target,
            ChaincodeFunction::InitCustomer,
            vec![
                id.to_string(),
                attributes.color.clone(),
                attributes.size.clone(),
                owner_id.to_string(),
                company.into(),
            ],
        )
    }
}
