use tokio::{
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::coordinator::AuditCoordinator;

/// Periodically run a cleanup audit. Ticks that land while a run is in
/// flight join that run instead of starting another.
pub fn spawn_housekeeping(coordinator: AuditCoordinator, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; launch handles that one
        tick.tick().await;
        loop {
            tick.tick().await;
            let ticket = coordinator.audit_and_cleanup_with_completion(true);
            match ticket.wait().await {
                Ok(report) => debug!(
                    orphan_files = report.orphan_file_count,
                    "housekeeping audit finished"
                ),
                Err(err) => warn!(error = %err, "housekeeping audit failed"),
            }
        }
    })
}
