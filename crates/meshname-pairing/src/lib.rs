//! Device pairing over the DHT
//!
//! Two devices that share nothing but a short human-typable code use the
//! name registry itself as a rendezvous: the initiator publishes a signed
//! record under the code, the joiner publishes a response record under
//! `code:response`, and each side parses the other's contact details out
//! of the record it fetched.

pub mod code;
pub mod contacts;
pub mod error;
pub mod pairing;

pub use code::{generate_code, CODE_ALPHABET, CODE_PREFIX};
pub use contacts::{Contact, ContactBook};
pub use error::{PairingError, PairingResult};
pub use pairing::{
    join, poll_response, response_name, start_initiation, wait_for_response, PairingPayload,
};

use std::time::Duration;

/// How long pairing records live in the DHT: long enough for both parties
/// to exchange, short enough not to linger
pub const PAIRING_TTL: Duration = Duration::from_secs(600);

/// How long the initiator waits for the other party
pub const PAIRING_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the initiator polls for the response record
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
