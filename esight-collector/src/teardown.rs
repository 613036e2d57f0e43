//! Teardown: delete every registered task on eSight
//!
//! Best effort. A task that cannot be deleted is logged and left behind; it
//! does not stop the others.

use crate::client::Platform;
use crate::registry::{TaskId, TaskRegistry};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub deleted: usize,
    pub failed: usize,
}

/// Delete all tasks of `registry`, at most `concurrency` at a time
pub async fn teardown<P: Platform + ?Sized>(
    platform: &P,
    registry: &TaskRegistry,
    concurrency: usize,
) -> TeardownReport {
    if registry.is_empty() {
        return TeardownReport::default();
    }
    info!("Deleting {} tasks from eSight...", registry.len());

    let ids: Vec<TaskId> = registry.ids().cloned().collect();
    let outcomes: Vec<bool> = stream::iter(ids)
        .map(move |id| async move { platform.delete_task(&id).await })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let deleted = outcomes.iter().filter(|deleted| **deleted).count();
    let report = TeardownReport {
        deleted,
        failed: outcomes.len() - deleted,
    };

    if report.failed > 0 {
        warn!(
            "Teardown incomplete: {} tasks deleted, {} left on eSight",
            report.deleted, report.failed
        );
    } else {
        info!("Teardown complete: {} tasks deleted", report.deleted);
    }
    report
}
