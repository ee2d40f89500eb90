//! Short-lived HTTP triggers against a running server.

use std::time::Duration;

use reqwest::StatusCode;

use agent_avatar_protocol::{SetStateRejection, SetStateRequest, SetStateResponse, StateRecord};

/// Hooks run on every agent event; never make them wait long.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum SetOutcome {
    Accepted(SetStateResponse),
    Rejected(SetStateRejection),
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// `POST /api/state`
pub async fn set_state(base_url: &str, state: &str) -> anyhow::Result<SetOutcome> {
    let response = http_client()?
        .post(format!("{base_url}/api/state"))
        .json(&SetStateRequest {
            state: state.to_string(),
        })
        .send()
        .await?;

    match response.status() {
        status if status.is_success() => Ok(SetOutcome::Accepted(response.json().await?)),
        StatusCode::BAD_REQUEST => Ok(SetOutcome::Rejected(response.json().await?)),
        status => anyhow::bail!("server returned {status}"),
    }
}

/// `GET /api/state`
pub async fn get_state(base_url: &str) -> anyhow::Result<StateRecord> {
    let response = http_client()?
        .get(format!("{base_url}/api/state"))
        .send()
        .await?
        .error_for_status()?;
    Ok(response.json().await?)
}

/// True when `GET /health` answers with a success status.
pub async fn check_health(base_url: &str) -> bool {
    let Ok(client) = http_client() else {
        return false;
    };
    client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}
