//! Snapshot chain planning.
//!
//! Chains are append-only and never fork: every advance hangs off the
//! current head, and re-running reconciliation for the same base version
//! produces no new rows.

use dmphub_core::{
    CoreError,
    ids::{SnapshotId, VersionId},
    overlay::{NodeContent, NodeRef, OverlaySnapshot},
};

/// Plan the next chain link for one node, or `None` when the head was
/// already taken against `source_version_id` (the idempotence key).
pub fn plan_advance(
    head: Option<&OverlaySnapshot>,
    node: NodeRef,
    source_version_id: VersionId,
    content: &NodeContent,
    now_ms: i64,
) -> Result<Option<OverlaySnapshot>, CoreError> {
    if let Some(head) = head {
        if head.source_version_id == source_version_id {
            return Ok(None);
        }
    }
    Ok(Some(OverlaySnapshot {
        snapshot_id: SnapshotId::new(),
        node,
        prior_id: head.map(|h| h.snapshot_id),
        current_id: None,
        source_version_id,
        fingerprint: content.fingerprint()?,
        payload: content.to_msgpack()?,
        created_at_ms: now_ms,
    }))
}
