//! Local HTTP control channel
//!
//! A small API bound to 127.0.0.1 only, never exposed to the mesh. CLI
//! commands talk to the running node through it: status, lookups, peer
//! management and the pairing flow.

use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::Filter;

use meshname_crypto::Identity;
use meshname_dht::Dht;
use meshname_pairing::{Contact, ContactBook, PairingError};

/// Port the control channel listens on
pub const API_PORT: u16 = 9099;

/// Everything the handlers need from the running node
pub struct ApiState {
    pub dht: Arc<Dht>,
    pub identity: Arc<Identity>,
    pub node_name: String,
    pub contacts_path: PathBuf,
}

/// A running control server
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop the server and wait for it to exit; safe to call twice
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Bind the control channel on localhost and serve until stopped
pub fn spawn(state: Arc<ApiState>, port: u16) -> anyhow::Result<ApiHandle> {
    let (shutdown, mut rx) = watch::channel(false);

    let (addr, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(
        (Ipv4Addr::LOCALHOST, port),
        async move {
            let _ = rx.changed().await;
        },
    )?;

    info!("local API listening on http://{addr}");
    let task = tokio::spawn(server);
    Ok(ApiHandle {
        addr,
        shutdown,
        task: Some(task),
    })
}

type Reply = warp::reply::WithStatus<warp::reply::Json>;

fn reply(status: StatusCode, body: impl serde::Serialize) -> Reply {
    warp::reply::with_status(warp::reply::json(&body), status)
}

fn with_state(
    state: Arc<ApiState>,
) -> impl Filter<Extract = (Arc<ApiState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// All control-channel routes
pub fn routes(
    state: Arc<ApiState>,
) -> impl Filter<Extract = (Reply,), Error = warp::Rejection> + Clone {
    let status = warp::path!("status")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_status);

    let lookup = warp::path!("lookup")
        .and(warp::get())
        .and(warp::query::<LookupQuery>())
        .and(with_state(state.clone()))
        .and_then(handle_lookup);

    let peers = warp::path!("peers")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_peers);

    let peer_add = warp::path!("peer")
        .and(warp::post())
        .and(warp::query::<PeerQuery>())
        .and(with_state(state.clone()))
        .and_then(handle_peer_add);

    let pair_initiate = warp::path!("pair" / "initiate")
        .and(warp::post())
        .and(warp::query::<NameQuery>())
        .and(with_state(state.clone()))
        .and_then(handle_pair_initiate);

    let pair_poll = warp::path!("pair" / "poll")
        .and(warp::get())
        .and(warp::query::<CodeQuery>())
        .and(with_state(state.clone()))
        .and_then(handle_pair_poll);

    let pair_join = warp::path!("pair" / "join")
        .and(warp::post())
        .and(warp::query::<JoinQuery>())
        .and(with_state(state))
        .and_then(handle_pair_join);

    status
        .or(lookup)
        .unify()
        .or(peers)
        .unify()
        .or(peer_add)
        .unify()
        .or(pair_initiate)
        .unify()
        .or(pair_poll)
        .unify()
        .or(pair_join)
        .unify()
}

#[derive(Deserialize)]
struct LookupQuery {
    name: Option<String>,
    #[serde(default)]
    group: String,
}

#[derive(Deserialize)]
struct PeerQuery {
    addr: Option<String>,
}

#[derive(Deserialize)]
struct NameQuery {
    name: Option<String>,
}

#[derive(Deserialize)]
struct CodeQuery {
    code: Option<String>,
}

#[derive(Deserialize)]
struct JoinQuery {
    code: Option<String>,
    name: Option<String>,
}

async fn handle_status(state: Arc<ApiState>) -> Result<Reply, warp::Rejection> {
    let body = json!({
        "name": state.node_name,
        "address": state.dht.address(),
        "public_key": state.identity.public_key_hex(),
        "peers": state.dht.peer_count().await,
        "records": state.dht.record_count().await,
    });
    Ok(reply(StatusCode::OK, body))
}

async fn handle_lookup(query: LookupQuery, state: Arc<ApiState>) -> Result<Reply, warp::Rejection> {
    let Some(name) = query.name.filter(|n| !n.is_empty()) else {
        return Ok(reply(StatusCode::BAD_REQUEST, json!({"error": "name required"})));
    };

    match state.dht.lookup_value(&name, &query.group).await {
        Ok(Some(record)) => Ok(reply(StatusCode::OK, record)),
        Ok(None) => Ok(reply(StatusCode::NOT_FOUND, json!({"error": "not found"}))),
        Err(err) => Ok(reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": err.to_string()}),
        )),
    }
}

async fn handle_peers(state: Arc<ApiState>) -> Result<Reply, warp::Rejection> {
    let statuses = state.dht.ping_all_peers().await;
    Ok(reply(StatusCode::OK, statuses))
}

async fn handle_peer_add(query: PeerQuery, state: Arc<ApiState>) -> Result<Reply, warp::Rejection> {
    let Some(addr) = query.addr.filter(|a| !a.is_empty()) else {
        return Ok(reply(StatusCode::BAD_REQUEST, json!({"error": "addr required"})));
    };

    if let Err(err) = state.dht.ping_peer(&addr).await {
        return Ok(reply(
            StatusCode::BAD_GATEWAY,
            json!({"error": err.to_string()}),
        ));
    }
    if let Err(err) = state.dht.save_peers().await {
        warn!(%err, "could not save peers");
    }
    Ok(reply(StatusCode::OK, json!({"status": "ok"})))
}

async fn handle_pair_initiate(
    query: NameQuery,
    state: Arc<ApiState>,
) -> Result<Reply, warp::Rejection> {
    let display_name = query.name.unwrap_or_else(|| state.node_name.clone());

    match meshname_pairing::start_initiation(
        &state.dht,
        &display_name,
        state.dht.address(),
        &state.identity,
    )
    .await
    {
        Ok(code) => Ok(reply(StatusCode::OK, json!({"code": code}))),
        Err(err) => Ok(reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": err.to_string()}),
        )),
    }
}

async fn handle_pair_poll(query: CodeQuery, state: Arc<ApiState>) -> Result<Reply, warp::Rejection> {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Ok(reply(StatusCode::BAD_REQUEST, json!({"error": "code required"})));
    };

    match meshname_pairing::poll_response(&state.dht, &code).await {
        Ok(Some(contact)) => {
            remember_contact(&state, &contact);
            Ok(reply(StatusCode::OK, contact))
        }
        Ok(None) => Ok(reply(StatusCode::ACCEPTED, json!({"status": "pending"}))),
        Err(err) => Ok(reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": err.to_string()}),
        )),
    }
}

async fn handle_pair_join(query: JoinQuery, state: Arc<ApiState>) -> Result<Reply, warp::Rejection> {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Ok(reply(StatusCode::BAD_REQUEST, json!({"error": "code required"})));
    };
    let display_name = query.name.unwrap_or_else(|| state.node_name.clone());

    match meshname_pairing::join(
        &state.dht,
        &display_name,
        state.dht.address(),
        &state.identity,
        &code,
    )
    .await
    {
        Ok(contact) => {
            remember_contact(&state, &contact);
            Ok(reply(StatusCode::OK, contact))
        }
        Err(PairingError::CodeNotFound(code)) => Ok(reply(
            StatusCode::NOT_FOUND,
            json!({"error": format!("pairing code {code:?} not found")}),
        )),
        Err(err) => Ok(reply(
            StatusCode::BAD_GATEWAY,
            json!({"error": err.to_string()}),
        )),
    }
}

/// Persist a freshly paired contact into the address book
fn remember_contact(state: &ApiState, contact: &Contact) {
    let result = ContactBook::load(&state.contacts_path).and_then(|mut book| {
        book.add(contact.clone());
        book.save()
    });
    if let Err(err) = result {
        warn!(%err, "could not save contact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshname_dht::DhtConfig;

    fn test_state() -> (Arc<ApiState>, tempfile::TempDir) {
        let identity = Identity::generate();
        let dir = tempfile::tempdir().unwrap();

        let mut config = DhtConfig::new(identity.node_id(), "127.0.0.1");
        config.peers_path = dir.path().join("peers.json");

        let state = Arc::new(ApiState {
            dht: Arc::new(Dht::new(config)),
            identity: Arc::new(identity),
            node_name: "testnode".into(),
            contacts_path: dir.path().join("contacts.json"),
        });
        (state, dir)
    }

    #[tokio::test]
    async fn status_reports_identity() {
        let (state, _dir) = test_state();
        let routes = routes(state.clone());

        let res = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["name"], "testnode");
        assert_eq!(body["public_key"], state.identity.public_key_hex());
        assert_eq!(body["peers"], 0);
    }

    #[tokio::test]
    async fn lookup_requires_a_name() {
        let (state, _dir) = test_state();
        let routes = routes(state);

        let res = warp::test::request()
            .method("GET")
            .path("/lookup")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn peer_add_rejects_unreachable_peers() {
        let (state, _dir) = test_state();
        let routes = routes(state);

        let res = warp::test::request()
            .method("POST")
            .path("/peer?addr=not-an-endpoint")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn pair_initiate_returns_a_code() {
        let (state, _dir) = test_state();
        let routes = routes(state);

        let res = warp::test::request()
            .method("POST")
            .path("/pair/initiate")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert!(body["code"].as_str().unwrap().starts_with("MESH-"));
    }

    #[tokio::test]
    async fn pair_poll_is_pending_before_any_response() {
        let (state, _dir) = test_state();
        let routes = routes(state);

        let res = warp::test::request()
            .method("GET")
            .path("/pair/poll?code=MESH-AB12")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }
}
