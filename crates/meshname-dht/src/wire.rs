//! Framed wire messages
//!
//! Each connection carries exactly one request and one response:
//!
//! ```text
//! [1 byte type][4 bytes big-endian body length][N bytes JSON body]
//! ```
//!
//! Bodies are capped at 1 MiB and each read must complete within the
//! 10-second deadline. A frame that violates either rule aborts the
//! connection without a reply.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use meshname_crypto::NodeId;

use crate::error::{DhtError, DhtResult};
use crate::record::Record;
use crate::routing::Contact;
use crate::READ_TIMEOUT;

/// Hard cap on a message body
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Wire message type codes. The numeric values are part of the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Ping = 0,
    Pong = 1,
    FindNode = 2,
    FoundNodes = 3,
    Store = 4,
    FindValue = 5,
    FoundValue = 6,
    NotFound = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = DhtError;

    fn try_from(value: u8) -> DhtResult<Self> {
        match value {
            0 => Ok(Self::Ping),
            1 => Ok(Self::Pong),
            2 => Ok(Self::FindNode),
            3 => Ok(Self::FoundNodes),
            4 => Ok(Self::Store),
            5 => Ok(Self::FindValue),
            6 => Ok(Self::FoundValue),
            7 => Ok(Self::NotFound),
            other => Err(DhtError::ProtocolViolation(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// A decoded frame: type tag plus raw JSON body
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MessageType,
    pub body: Vec<u8>,
}

impl Message {
    /// Decode the body as the given type
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> DhtResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Read one framed message, enforcing the body cap and read deadline.
pub async fn read_message<R>(reader: &mut R) -> DhtResult<Message>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(READ_TIMEOUT, async {
        let mut type_buf = [0u8; 1];
        reader.read_exact(&mut type_buf).await?;
        let msg_type = MessageType::try_from(type_buf[0])?;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let body_len = u32::from_be_bytes(len_buf) as usize;
        if body_len > MAX_BODY_LEN {
            return Err(DhtError::ProtocolViolation(format!(
                "message too large: {body_len} bytes"
            )));
        }

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).await?;
        Ok(Message { msg_type, body })
    })
    .await
    .map_err(|_| DhtError::Timeout)?
}

/// Write one framed message with the given JSON body.
pub async fn write_message<W, T>(writer: &mut W, msg_type: MessageType, body: &T) -> DhtResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = serde_json::to_vec(body)?;
    if encoded.len() > MAX_BODY_LEN {
        return Err(DhtError::ProtocolViolation(format!(
            "message too large: {} bytes",
            encoded.len()
        )));
    }

    writer.write_all(&[msg_type as u8]).await?;
    writer.write_all(&(encoded.len() as u32).to_be_bytes()).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

// ── message bodies ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct PingBody {
    pub sender_id: String,
    pub sender_addr: String,
    pub sender_port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PongBody {
    pub sender_id: String,
    pub sender_addr: String,
    pub sender_port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindNodeBody {
    pub sender_id: String,
    pub target_id: String,
}

/// Wire form of a routing-table contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub id: String,
    pub addr: String,
    pub port: u16,
}

impl ContactInfo {
    pub fn from_contact(contact: &Contact) -> Self {
        Self {
            id: contact.id.to_hex(),
            addr: contact.address.to_string(),
            port: contact.port,
        }
    }

    /// Parse back into a contact; `None` on bad hex or address, so a
    /// malformed entry skips that contact instead of failing the message.
    pub fn to_contact(&self) -> Option<Contact> {
        let id = NodeId::from_hex(&self.id).ok()?;
        let address = self.addr.parse().ok()?;
        Some(Contact {
            id,
            address,
            port: self.port,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FoundNodesBody {
    pub nodes: Vec<ContactInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreBody {
    pub record: Record,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FindValueBody {
    pub sender_id: String,
    pub name: String,
    pub group_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FoundValueBody {
    pub record: Record,
}

/// Body of NOT_FOUND: an empty JSON object
#[derive(Debug, Serialize, Deserialize)]
pub struct EmptyBody {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let body = FindNodeBody {
            sender_id: "aa".repeat(32),
            target_id: "bb".repeat(32),
        };
        write_message(&mut client, MessageType::FindNode, &body)
            .await
            .unwrap();

        let msg = read_message(&mut server).await.unwrap();
        assert_eq!(msg.msg_type, MessageType::FindNode);

        let decoded: FindNodeBody = msg.decode().unwrap();
        assert_eq!(decoded.target_id, body.target_id);
    }

    #[tokio::test]
    async fn rejects_unknown_type() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[42u8, 0, 0, 0, 0]).await.unwrap();

        let err = read_message(&mut server).await;
        assert!(matches!(err, Err(DhtError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn rejects_oversize_frame() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let huge = (MAX_BODY_LEN as u32 + 1).to_be_bytes();
        client.write_all(&[0u8]).await.unwrap();
        client.write_all(&huge).await.unwrap();

        let err = read_message(&mut server).await;
        assert!(matches!(err, Err(DhtError::ProtocolViolation(_))));
    }

    #[test]
    fn contact_info_skips_malformed_entries() {
        let bad_hex = ContactInfo {
            id: "not-hex".into(),
            addr: "::1".into(),
            port: 9001,
        };
        assert!(bad_hex.to_contact().is_none());

        let bad_addr = ContactInfo {
            id: "cc".repeat(32),
            addr: "not an address".into(),
            port: 9001,
        };
        assert!(bad_addr.to_contact().is_none());

        let good = ContactInfo {
            id: "cc".repeat(32),
            addr: "200:1234::1".into(),
            port: 9001,
        };
        assert!(good.to_contact().is_some());
    }
}
