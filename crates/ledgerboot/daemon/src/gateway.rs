//! REST gateway adapters for the certificate authority and the peers.
//!
//! The gateway accepts chaincode call bundles as JSON and answers with the
//! peer's payload or its error text. When it does not classify an error
//! itself, the text is classified here.

use std::time::Duration;

use async_trait::async_trait;
use ledgerboot_orchestrator::{
    CertificateAuthority, EnrollError, EnrollmentRequest, Identity, InvokeReceipt, LedgerClient,
    LedgerError, LedgerErrorKind, LedgerResult, QueryResponse,
};
use ledgerboot_types::ChaincodeCall;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Who is calling, as sent to the gateway
#[derive(Debug, Serialize)]
struct Caller<'a> {
    subject: &'a str,
    msp_id: &'a str,
    certificate_pem: &'a str,
}

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    caller: Caller<'a>,
    #[serde(flatten)]
    call: &'a ChaincodeCall,
}

/// Gateway reply to a query or invoke
#[derive(Debug, Default, Deserialize)]
pub struct GatewayReply {
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub tx_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Error class when the gateway knows it
    #[serde(default)]
    pub error_kind: Option<String>,
}

impl GatewayReply {
    fn error(&self) -> Option<LedgerError> {
        let message = self.error.as_deref()?;
        let kind = match self.error_kind.as_deref() {
            Some("chaincode_starting") => LedgerErrorKind::ChaincodeStarting,
            Some("not_found") => LedgerErrorKind::NotFound,
            Some("rejected") => LedgerErrorKind::Rejected,
            Some("transport") => LedgerErrorKind::Transport,
            _ => LedgerErrorKind::classify(message),
        };
        Some(LedgerError::new(kind, message))
    }

    /// Interpret as a query response
    pub fn into_query(self) -> LedgerResult<QueryResponse> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        match self.payload {
            Some(raw) if !raw.is_empty() => Ok(QueryResponse::from_raw(raw)),
            _ => Err(LedgerError::not_found("empty query payload")),
        }
    }

    /// Interpret as an invoke receipt
    pub fn into_receipt(self) -> LedgerResult<InvokeReceipt> {
        if let Some(err) = self.error() {
            return Err(err);
        }
        self.tx_id
            .map(|tx_id| InvokeReceipt { tx_id })
            .ok_or_else(|| LedgerError::new(LedgerErrorKind::Other, "invoke returned no tx id"))
    }
}

#[derive(Debug, Deserialize)]
struct EnrollReply {
    certificate: String,
    private_key: String,
}

/// HTTP client for the ledger gateway
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, path: &str, identity: &Identity, call: &ChaincodeCall) -> LedgerResult<GatewayReply> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, function = %call.function, "gateway call");

        let request = CallRequest {
            caller: Caller {
                subject: &identity.subject,
                msp_id: &identity.msp_id,
                certificate_pem: &identity.certificate_pem,
            },
            call,
        };
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::new(LedgerErrorKind::Transport, e.to_string()))?;

        response
            .json::<GatewayReply>()
            .await
            .map_err(|e| LedgerError::new(LedgerErrorKind::Transport, format!("bad gateway reply: {e}")))
    }
}

#[async_trait]
impl LedgerClient for GatewayClient {
    async fn query(&self, identity: &Identity, call: &ChaincodeCall) -> LedgerResult<QueryResponse> {
        self.call("query", identity, call).await?.into_query()
    }

    async fn invoke(&self, identity: &Identity, call: &ChaincodeCall) -> LedgerResult<InvokeReceipt> {
        self.call("invoke", identity, call).await?.into_receipt()
    }
}

#[async_trait]
impl CertificateAuthority for GatewayClient {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<Identity, EnrollError> {
        let url = format!("{}/enroll", request.ca_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .basic_auth(&request.enroll_id, Some(&request.enroll_secret))
            .json(&serde_json::json!({ "caname": request.ca_name }))
            .send()
            .await
            .map_err(|e| EnrollError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EnrollError::Rejected(format!("{status}: {body}")));
        }

        let reply: EnrollReply = response
            .json()
            .await
            .map_err(|e| EnrollError::Rejected(format!("bad enrollment reply: {e}")))?;
        Ok(Identity {
            subject: request.enroll_id.clone(),
            msp_id: request.msp_id.clone(),
            certificate_pem: reply.certificate,
            private_key_pem: reply.private_key,
            enrolled_at: chrono::Utc::now(),
        })
    }
}
