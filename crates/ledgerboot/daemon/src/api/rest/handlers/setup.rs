//! Setup handler: re-trigger a bootstrap run

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use ledgerboot_orchestrator::{BootstrapOutcome, ConfigureEvent};
use serde::Serialize;
use tracing::{info, warn};

/// Setup accepted response
#[derive(Debug, Serialize)]
pub struct SetupAccepted {
    pub accepted: bool,
    pub configure: String,
}

/// Accept a configure event and run it in the background.
///
/// The run is claimed before responding, so 202 means this event is the one
/// running and a concurrent request gets 409. Progress is visible through
/// `/status` and the event stream.
pub async fn submit_setup(
    State(state): State<AppState>,
    payload: Result<Json<ConfigureEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SetupAccepted>)> {
    let Json(event) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if let ConfigureEvent::Enrollment {
        settings: Some(settings),
    }
    | ConfigureEvent::FindChaincode {
        settings: Some(settings),
    } = &event
    {
        settings.validate()?;
    }

    let name = event.name();
    let run = state.orchestrator.spawn_configure(event)?;
    tokio::spawn(async move {
        match run.await {
            Ok(Ok(BootstrapOutcome::UpToDate)) => {
                info!(configure = name, "bootstrap finished; ledger up to date")
            }
            Ok(Ok(BootstrapOutcome::Provisioned(report))) => info!(
                configure = name,
                owners = report.owners.len(),
                assets = report.assets.len(),
                "bootstrap finished"
            ),
            Ok(Err(e)) => warn!(configure = name, error = %e, "bootstrap run stopped"),
            Err(e) => warn!(configure = name, error = %e, "bootstrap task ended abnormally"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SetupAccepted {
            accepted: true,
            configure: name.to_string(),
        }),
    ))
}
