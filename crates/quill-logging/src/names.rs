//! Shared span and field names
//!
//! Every crate names its spans and structured fields from here so log
//! queries work across the whole node.

/// Standard field names
pub mod fields {
    pub const NODE_ID: &str = "node_id";
    pub const PROJECT_ID: &str = "project_id";
    pub const CLIENT_ID: &str = "client_id";
    pub const ACTOR_ID: &str = "actor_id";
    pub const DOC_ID: &str = "doc_id";
    pub const DOC_KEY: &str = "doc_key";
    pub const LOCK_KEY: &str = "lock_key";
    pub const CHECKPOINT: &str = "checkpoint";
    pub const SERVER_SEQ: &str = "server_seq";
    pub const PUSHED: &str = "pushed";
    pub const PULLED: &str = "pulled";
    pub const STATUS: &str = "status";
    pub const LATENCY_MS: &str = "latency_ms";
}

/// Standard span names
pub mod spans {
    // Node operations
    pub const ACTIVATE_CLIENT: &str = "activate_client";
    pub const DEACTIVATE_CLIENT: &str = "deactivate_client";
    pub const ATTACH_DOCUMENT: &str = "attach_document";
    pub const DETACH_DOCUMENT: &str = "detach_document";
    pub const PUSH_PULL_CHANGES: &str = "push_pull_changes";
    pub const REMOVE_DOCUMENT: &str = "remove_document";

    // Sync core
    pub const PUSH_PULL: &str = "push_pull";
    pub const BUILD_SNAPSHOT: &str = "build_snapshot";
    pub const STORE_SNAPSHOT: &str = "store_snapshot";

    // Coordination
    pub const ACQUIRE_LOCK: &str = "acquire_lock";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names_are_distinct() {
        let names = [
            spans::ACTIVATE_CLIENT,
            spans::DEACTIVATE_CLIENT,
            spans::ATTACH_DOCUMENT,
            spans::DETACH_DOCUMENT,
            spans::PUSH_PULL_CHANGES,
            spans::REMOVE_DOCUMENT,
            spans::PUSH_PULL,
            spans::BUILD_SNAPSHOT,
            spans::STORE_SNAPSHOT,
            spans::ACQUIRE_LOCK,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
