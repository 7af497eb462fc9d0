//! Identifiers for projects, documents, clients and actors
//!
//! All identifiers are 12 random bytes rendered as 24 lowercase hex
//! characters. [`ActorId`] and [`ClientId`] share the same value space: a
//! client session is identified by the actor that authors its changes.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Length of an identifier in bytes
pub const ID_LEN: usize = 12;

/// Length of an identifier in hex characters
pub const ID_HEX_LEN: usize = ID_LEN * 2;

fn decode_hex_id(value: &str) -> Option<[u8; ID_LEN]> {
    if value.len() != ID_HEX_LEN {
        return None;
    }
    let mut bytes = [0u8; ID_LEN];
    hex::decode_to_slice(value, &mut bytes).ok()?;
    Some(bytes)
}

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; ID_LEN]);

        impl $name {
            /// Create an identifier from raw bytes
            pub fn new(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Generate a random identifier
            pub fn generate() -> Self {
                Self(rand::random())
            }

            /// Parse an identifier from its hex representation
            pub fn from_hex(value: &str) -> Result<Self, IdentityError> {
                decode_hex_id(value).map(Self).ok_or_else(|| IdentityError::InvalidObjectId {
                    kind: $kind,
                    value: value.to_string(),
                })
            }

            /// Get the underlying bytes
            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Hex representation
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = IdentityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }
    };
}

object_id!(
    /// Identifier of a project, the tenant boundary for documents and clients
    ProjectId,
    "project"
);

object_id!(
    /// Identifier of a document record
    DocId,
    "document"
);

object_id!(
    /// Identifier of a client record
    ClientId,
    "client"
);

/// Identifier of a client session
///
/// Minted once per session and never reused. Every change carries the
/// `ActorId` of its author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub [u8; ID_LEN]);

impl ActorId {
    /// Actor of a document that has not been bound to a session yet
    pub const INITIAL: ActorId = ActorId([0u8; ID_LEN]);

    /// Create an actor id from raw bytes
    pub fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Mint a new random actor id
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Parse an actor id from its hex representation
    ///
    /// Fails with [`IdentityError::InvalidActorId`] unless the input is
    /// exactly 24 hex characters.
    pub fn from_hex(value: &str) -> Result<Self, IdentityError> {
        decode_hex_id(value)
            .map(Self)
            .ok_or_else(|| IdentityError::InvalidActorId(value.to_string()))
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Hex representation
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short display form (first 8 hex chars)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for ActorId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<ActorId> for ClientId {
    fn from(actor: ActorId) -> Self {
        ClientId(actor.0)
    }
}

impl From<ClientId> for ActorId {
    fn from(client: ClientId) -> Self {
        ActorId(client.0)
    }
}

/// Maximum length of a document key
pub const MAX_DOC_KEY_LEN: usize = 120;

/// Stable, human-chosen key of a document within a project
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocKey(String);

impl DocKey {
    /// Validate and create a document key
    ///
    /// Keys are 1 to 120 characters of `[A-Za-z0-9._-]` and may not start
    /// with `.` or `-`.
    pub fn new(key: impl Into<String>) -> Result<Self, IdentityError> {
        let key = key.into();
        let valid_len = !key.is_empty() && key.len() <= MAX_DOC_KEY_LEN;
        let valid_chars = key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        let valid_start = !key.starts_with(['.', '-']);

        if valid_len && valid_chars && valid_start {
            Ok(Self(key))
        } else {
            Err(IdentityError::InvalidDocKey(key))
        }
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DocKey {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Project-scoped reference to a document record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocRefKey {
    pub project_id: ProjectId,
    pub doc_id: DocId,
}

impl DocRefKey {
    pub fn new(project_id: ProjectId, doc_id: DocId) -> Self {
        Self { project_id, doc_id }
    }
}

impl Display for DocRefKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.doc_id)
    }
}

/// Project-scoped reference to a client record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRefKey {
    pub project_id: ProjectId,
    pub client_id: ClientId,
}

impl ClientRefKey {
    pub fn new(project_id: ProjectId, client_id: ClientId) -> Self {
        Self {
            project_id,
            client_id,
        }
    }
}

impl Display for ClientRefKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.client_id)
    }
}
