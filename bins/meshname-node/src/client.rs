//! CLI-side client for the local control channel

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::StatusCode;
use serde_json::Value;

use meshname_dht::{PeerStatus, Record};
use meshname_pairing::Contact;

use crate::api::API_PORT;

fn base_url() -> String {
    format!("http://127.0.0.1:{API_PORT}")
}

fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}

/// Quick probe: is a node already running on this machine?
pub async fn is_node_running() -> bool {
    let Ok(client) = client(Duration::from_millis(500)) else {
        return false;
    };
    client
        .get(format!("{}/status", base_url()))
        .send()
        .await
        .is_ok()
}

/// Fetch the running node's status document
pub async fn status() -> Result<Value> {
    let response = client(Duration::from_secs(3))?
        .get(format!("{}/status", base_url()))
        .send()
        .await
        .context("failed to reach node")?;
    Ok(response.json().await?)
}

/// Look a name up through the running node; `None` means not registered
pub async fn lookup(name: &str, group: &str) -> Result<Option<Record>> {
    let response = client(Duration::from_secs(15))?
        .get(format!("{}/lookup", base_url()))
        .query(&[("name", name), ("group", group)])
        .send()
        .await
        .context("lookup failed")?;

    match response.status() {
        StatusCode::OK => Ok(Some(response.json().await?)),
        StatusCode::NOT_FOUND => Ok(None),
        status => bail!("lookup error: status {status}"),
    }
}

/// List known peers with liveness and latency
pub async fn peers() -> Result<Vec<PeerStatus>> {
    let response = client(Duration::from_secs(15))?
        .get(format!("{}/peers", base_url()))
        .send()
        .await
        .context("failed to reach node")?;
    Ok(response.json().await?)
}

/// Ask the running node to dial and remember a peer
pub async fn peer_add(addr: &str) -> Result<()> {
    let response = client(Duration::from_secs(15))?
        .post(format!("{}/peer", base_url()))
        .query(&[("addr", addr)])
        .send()
        .await
        .context("failed to reach node")?;

    if !response.status().is_success() {
        bail!("failed to add peer: status {}", response.status());
    }
    Ok(())
}

/// Start a pairing session; returns the code to share
pub async fn pair_initiate(name: Option<&str>) -> Result<String> {
    let mut request = client(Duration::from_secs(15))?.post(format!("{}/pair/initiate", base_url()));
    if let Some(name) = name {
        request = request.query(&[("name", name)]);
    }

    let response = request.send().await.context("failed to reach node")?;
    if !response.status().is_success() {
        bail!("pairing failed: status {}", response.status());
    }

    let body: Value = response.json().await?;
    body["code"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("node returned no pairing code"))
}

/// One poll of the pairing session; `None` while still pending
pub async fn pair_poll(code: &str) -> Result<Option<Contact>> {
    let response = client(Duration::from_secs(15))?
        .get(format!("{}/pair/poll", base_url()))
        .query(&[("code", code)])
        .send()
        .await
        .context("failed to reach node")?;

    match response.status() {
        StatusCode::OK => Ok(Some(response.json().await?)),
        StatusCode::ACCEPTED => Ok(None),
        status => bail!("pairing poll failed: status {status}"),
    }
}

/// Join a pairing session with a code from the other device
pub async fn pair_join(code: &str, name: Option<&str>) -> Result<Contact> {
    let mut request = client(Duration::from_secs(30))?
        .post(format!("{}/pair/join", base_url()))
        .query(&[("code", code)]);
    if let Some(name) = name {
        request = request.query(&[("name", name)]);
    }

    let response = request.send().await.context("failed to reach node")?;
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        StatusCode::NOT_FOUND => {
            bail!("pairing code {code:?} not found; check the code and try again")
        }
        status => bail!("pairing failed: status {status}"),
    }
}
