//! Pattern Invalidation
//!
//! Deletes every key matching a glob by walking SCAN cursors. Each batch is
//! deleted before the next one is requested, so at most one batch of
//! deletes is in flight per master. In cluster mode every master is scanned
//! concurrently and independently; a master that fails contributes only
//! what it had deleted before failing.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::store::{ShardNode, StoreHandle};

/// Outcome of a pattern delete across all masters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Keys removed
    pub deleted: u64,
    /// Masters in the topology snapshot
    pub masters: usize,
    /// Masters whose scan or delete failed before completion
    pub interrupted: usize,
}

/// Outcome for a single master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOutcome {
    pub deleted: u64,
    pub completed: bool,
}

/// Deletes keys matching `pattern` on every master of `handle`.
///
/// Never fails: unreachable topology yields an empty report.
pub async fn delete_matching(
    handle: &dyn StoreHandle,
    pattern: &str,
    batch_size: usize,
) -> InvalidationReport {
    let masters = match handle.masters().await {
        Ok(masters) => masters,
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Could not enumerate masters for pattern delete");
            return InvalidationReport {
                interrupted: 1,
                ..Default::default()
            };
        }
    };

    let outcomes = join_all(
        masters
            .iter()
            .map(|node| delete_on_node(node.as_ref(), pattern, batch_size)),
    )
    .await;

    let report = InvalidationReport {
        deleted: outcomes.iter().map(|o| o.deleted).sum(),
        masters: masters.len(),
        interrupted: outcomes.iter().filter(|o| !o.completed).count(),
    };
    debug!(
        pattern = %pattern,
        deleted = report.deleted,
        masters = report.masters,
        interrupted = report.interrupted,
        "Pattern delete finished"
    );
    report
}

/// Scans one master and deletes each batch before fetching the next.
pub async fn delete_on_node(node: &dyn ShardNode, pattern: &str, batch_size: usize) -> NodeOutcome {
    let mut deleted = 0;
    let mut cursor = 0;

    loop {
        let (next, keys) = match node.scan(cursor, pattern, batch_size.max(1)).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(node = %node.address(), error = %e, deleted, "Scan failed, stopping");
                return NodeOutcome {
                    deleted,
                    completed: false,
                };
            }
        };

        if !keys.is_empty() {
            match node.delete_keys(&keys).await {
                Ok(removed) => deleted += removed,
                Err(e) => {
                    warn!(node = %node.address(), error = %e, deleted, "Batch delete failed, stopping scan");
                    return NodeOutcome {
                        deleted,
                        completed: false,
                    };
                }
            }
        }

        if next == 0 {
            return NodeOutcome {
                deleted,
                completed: true,
            };
        }
        cursor = next;
    }
}
