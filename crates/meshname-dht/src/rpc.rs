//! Outgoing RPC primitives
//!
//! Each call dials a fresh connection over the overlay, writes one framed
//! request, reads at most one framed response and closes. STORE is fire and
//! forget: the write completing is the only acknowledgement.

use meshname_crypto::NodeId;
use tokio::net::TcpStream;

use crate::error::{DhtError, DhtResult};
use crate::record::Record;
use crate::wire::{
    read_message, write_message, ContactInfo, FindNodeBody, FindValueBody, FoundNodesBody,
    FoundValueBody, MessageType, PingBody, PongBody, StoreBody,
};
use crate::READ_TIMEOUT;

/// Outcome of a FIND_VALUE request
#[derive(Debug)]
pub enum FindValueReply {
    /// The queried node had the record
    Found(Record),
    /// Miss; these are the closest contacts the node knows
    Closer(Vec<ContactInfo>),
    /// Miss and the node knows nothing closer
    NotFound,
}

async fn dial(endpoint: &str) -> DhtResult<TcpStream> {
    tokio::time::timeout(READ_TIMEOUT, TcpStream::connect(endpoint))
        .await
        .map_err(|_| DhtError::Timeout)?
        .map_err(DhtError::from)
}

/// PING a node, returning its self-reported identity and endpoint.
pub async fn send_ping(
    endpoint: &str,
    sender_id: NodeId,
    sender_addr: &str,
    sender_port: u16,
) -> DhtResult<PongBody> {
    let mut conn = dial(endpoint).await?;

    let body = PingBody {
        sender_id: sender_id.to_hex(),
        sender_addr: sender_addr.to_string(),
        sender_port,
    };
    write_message(&mut conn, MessageType::Ping, &body).await?;

    let response = read_message(&mut conn).await?;
    if response.msg_type != MessageType::Pong {
        return Err(DhtError::UnexpectedMessage(response.msg_type as u8));
    }
    response.decode::<PongBody>()
}

/// Ask a node for its closest contacts to `target`.
pub async fn send_find_node(
    endpoint: &str,
    sender_id: NodeId,
    target: NodeId,
) -> DhtResult<Vec<ContactInfo>> {
    let mut conn = dial(endpoint).await?;

    let body = FindNodeBody {
        sender_id: sender_id.to_hex(),
        target_id: target.to_hex(),
    };
    write_message(&mut conn, MessageType::FindNode, &body).await?;

    let response = read_message(&mut conn).await?;
    if response.msg_type != MessageType::FoundNodes {
        return Err(DhtError::UnexpectedMessage(response.msg_type as u8));
    }
    Ok(response.decode::<FoundNodesBody>()?.nodes)
}

/// Hand a record to a node for storage. No application-level ack.
pub async fn send_store(endpoint: &str, record: &Record) -> DhtResult<()> {
    let mut conn = dial(endpoint).await?;

    let body = StoreBody {
        record: record.clone(),
    };
    write_message(&mut conn, MessageType::Store, &body).await
}

/// Ask a node for a record by name.
pub async fn send_find_value(
    endpoint: &str,
    sender_id: NodeId,
    name: &str,
    group_key: &str,
) -> DhtResult<FindValueReply> {
    let mut conn = dial(endpoint).await?;

    let body = FindValueBody {
        sender_id: sender_id.to_hex(),
        name: name.to_string(),
        group_key: group_key.to_string(),
    };
    write_message(&mut conn, MessageType::FindValue, &body).await?;

    let response = read_message(&mut conn).await?;
    match response.msg_type {
        MessageType::FoundValue => {
            let found: FoundValueBody = response.decode()?;
            Ok(FindValueReply::Found(found.record))
        }
        MessageType::FoundNodes => {
            let nodes: FoundNodesBody = response.decode()?;
            Ok(FindValueReply::Closer(nodes.nodes))
        }
        MessageType::NotFound => Ok(FindValueReply::NotFound),
        other => Err(DhtError::UnexpectedMessage(other as u8)),
    }
}
