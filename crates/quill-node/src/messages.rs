//! Request and response types of the node services
//!
//! Transport-neutral: a wire layer decodes these with [`NodeRequest::from_bytes`]
//! and dispatches them to the matching service method. Client ids travel as
//! hex strings and are parsed by the services before any lock is taken.

use serde::{Deserialize, Serialize};

use quill_core::{ChangePack, DocId, DocumentSummary, SyncMode};

/// Requests understood by a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeRequest {
    ActivateClient(ActivateClientRequest),
    DeactivateClient(DeactivateClientRequest),
    AttachDocument(AttachDocumentRequest),
    PushPullChanges(PushPullChangesRequest),
    DetachDocument(DetachDocumentRequest),
    RemoveDocument(RemoveDocumentRequest),
}

impl NodeRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

/// Responses produced by a node, one variant per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeResponse {
    ActivateClient(ActivateClientResponse),
    DeactivateClient,
    AttachDocument(AttachDocumentResponse),
    PushPullChanges(PushPullChangesResponse),
    DetachDocument(DetachDocumentResponse),
    RemoveDocument(RemoveDocumentResponse),
}

impl NodeResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateClientRequest {
    /// Caller-chosen key, e.g. a device name
    pub client_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateClientResponse {
    /// Hex-encoded actor id of the new session
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeactivateClientRequest {
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachDocumentRequest {
    pub client_id: String,
    /// Local changes made before attaching, keyed by the document key
    pub change_pack: ChangePack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachDocumentResponse {
    pub doc_id: DocId,
    pub change_pack: ChangePack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPullChangesRequest {
    pub client_id: String,
    pub doc_id: DocId,
    pub change_pack: ChangePack,
    #[serde(default)]
    pub mode: SyncMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPullChangesResponse {
    pub change_pack: ChangePack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetachDocumentRequest {
    pub client_id: String,
    /// Document to detach; its id selects the record
    pub document: DocumentSummary,
}

/// Detach succeeds without a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetachDocumentResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDocumentRequest {
    pub client_id: String,
    pub doc_id: DocId,
    pub change_pack: ChangePack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDocumentResponse {
    pub change_pack: ChangePack,
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{ActorId, Checkpoint, DocKey};

    #[test]
    fn test_request_encoding() {
        let request = NodeRequest::PushPullChanges(PushPullChangesRequest {
            client_id: ActorId::generate().to_hex(),
            doc_id: DocId::generate(),
            change_pack: ChangePack::empty(DocKey::new("notes").unwrap(), Checkpoint::new(5, 3)),
            mode: SyncMode::PullOnly,
        });

        let bytes = request.to_bytes().unwrap();
        match NodeRequest::from_bytes(&bytes).unwrap() {
            NodeRequest::PushPullChanges(decoded) => {
                assert_eq!(decoded.mode, SyncMode::PullOnly);
                assert_eq!(decoded.change_pack.checkpoint, Checkpoint::new(5, 3));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(NodeRequest::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
