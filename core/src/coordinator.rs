use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use janitor_api::{AuditMode, AuditReport, FileSystem, RecordStore, SettingsStore};
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::{
    runtime::Handle,
    sync::{mpsc::UnboundedReceiver, oneshot},
    task::spawn_blocking,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    cleanup::CleanupExecutor,
    config::{AuditPolicy, ReportDetail},
    error::AuditFailure,
    events::{AuditEvent, EventBus},
    orphans::{compute_orphans, OrphanSet},
    records::{RecordWalk, RecordWalker},
    registry::PathRegistry,
    walker::{FilesystemSnapshot, FilesystemWalker},
};

/// Terminal result of one audit run.
pub type AuditOutcome = Result<Arc<AuditReport>, AuditFailure>;

/// The stores an audit reconciles, plus the bookkeeping store.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub fs: Arc<dyn FileSystem>,
    pub settings: Arc<dyn SettingsStore>,
}

/// `Idle` until the first run; afterwards the state of the latest run.
#[derive(Debug, Clone)]
pub enum AuditState {
    Idle,
    Running { run_id: Uuid, mode: AuditMode },
    Completed(Arc<AuditReport>),
    Failed(AuditFailure),
}

/// Handle on the completion of a started or joined audit.
pub struct AuditTicket {
    run_id: Uuid,
    coalesced: bool,
    rx: oneshot::Receiver<AuditOutcome>,
}

impl AuditTicket {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// True when this request attached to a run that was already in flight.
    pub fn coalesced(&self) -> bool {
        self.coalesced
    }

    /// Wait for the run to finish. The outcome is observed on the task that
    /// awaits; the audit keeps running to completion if the ticket is dropped.
    pub async fn wait(self) -> AuditOutcome {
        self.rx.await.unwrap_or_else(|_| {
            Err(AuditFailure::Internal(
                "audit task ended without a result".into(),
            ))
        })
    }
}

struct RunState {
    phase: AuditState,
    waiters: Vec<oneshot::Sender<AuditOutcome>>,
    cancel: Option<CancellationToken>,
    cleanup_started: bool,
}

struct Shared {
    collaborators: Collaborators,
    policy: Arc<AuditPolicy>,
    app_version: String,
    run: Mutex<RunState>,
    events: Mutex<EventBus>,
    in_use: Mutex<Vec<PathBuf>>,
}

/// Serializes audits: at most one runs at a time and later requests join it.
///
/// Runs execute on the tokio runtime the request is made from; walks and
/// deletions happen on its blocking pool.
#[derive(Clone)]
pub struct AuditCoordinator {
    shared: Arc<Shared>,
}

impl AuditCoordinator {
    pub fn new(
        collaborators: Collaborators,
        policy: Arc<AuditPolicy>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                collaborators,
                policy,
                app_version: app_version.into(),
                run: Mutex::new(RunState {
                    phase: AuditState::Idle,
                    waiters: Vec::new(),
                    cancel: None,
                    cleanup_started: false,
                }),
                events: Mutex::new(EventBus::new()),
                in_use: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start an audit without waiting for it. Deletion is skipped when the
    /// running version has already completed a cleanup pass.
    pub fn audit_and_cleanup(&self, should_cleanup: bool) {
        let mode = self
            .shared
            .resolve_mode(AuditMode::from_should_cleanup(should_cleanup));
        let _ = self.start(mode);
    }

    /// Start an audit with exactly the requested mode and return its ticket.
    pub fn audit_and_cleanup_with_completion(&self, should_cleanup: bool) -> AuditTicket {
        self.start(AuditMode::from_should_cleanup(should_cleanup))
    }

    /// Launch-time check: start a cleanup audit unless this version has
    /// already been cleaned, in which case the walk is skipped entirely.
    pub fn run_if_due(&self) -> Option<AuditTicket> {
        let version = &self.shared.app_version;
        match self.shared.collaborators.settings.last_cleaning() {
            Ok(Some(meta)) if meta.is_current_for(version) => {
                debug!(
                    %version,
                    cleaned_at = meta.cleaned_at,
                    "orphan cleanup already done for this version"
                );
                self.shared.events.lock().publish(AuditEvent::Skipped {
                    version: version.clone(),
                });
                None
            }
            Ok(_) => Some(self.audit_and_cleanup_with_completion(true)),
            Err(err) => {
                warn!(error = %err, "could not read last cleaning, auditing without cleanup");
                Some(self.audit_and_cleanup_with_completion(false))
            }
        }
    }

    /// Request cancellation of the running audit. Has no effect once
    /// deletion has begun; returns whether the request was accepted.
    pub fn cancel(&self) -> bool {
        let run = self.shared.run.lock();
        match (&run.phase, &run.cancel) {
            (AuditState::Running { run_id, .. }, Some(token)) if !run.cleanup_started => {
                info!(%run_id, "cancelling orphan audit");
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn state(&self) -> AuditState {
        self.shared.run.lock().phase.clone()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<AuditEvent> {
        self.shared.events.lock().subscribe()
    }

    /// Mark a file as in use (e.g. a temp file being written) so later
    /// audits never classify it as orphaned.
    pub fn protect_path(&self, path: impl Into<PathBuf>) {
        self.shared.in_use.lock().push(path.into());
    }

    pub fn release_path(&self, path: &Path) {
        self.shared.in_use.lock().retain(|p| p != path);
    }

    fn start(&self, mode: AuditMode) -> AuditTicket {
        let (tx, rx) = oneshot::channel();
        let mut run = self.shared.run.lock();

        if let AuditState::Running { run_id, .. } = run.phase {
            debug!(%run_id, "audit already running, attaching to it");
            run.waiters.push(tx);
            return AuditTicket {
                run_id,
                coalesced: true,
                rx,
            };
        }

        let run_id = Uuid::new_v4();
        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                drop(run);
                let _ = tx.send(Err(AuditFailure::Internal(format!(
                    "no async runtime to run the audit on: {err}"
                ))));
                return AuditTicket {
                    run_id,
                    coalesced: false,
                    rx,
                };
            }
        };

        let cancel = CancellationToken::new();
        run.phase = AuditState::Running { run_id, mode };
        run.waiters.push(tx);
        run.cancel = Some(cancel.clone());
        run.cleanup_started = false;
        drop(run);

        self.shared
            .events
            .lock()
            .publish(AuditEvent::Started { run_id, mode });

        let shared = self.shared.clone();
        runtime.spawn(async move {
            let outcome = match tokio::spawn(shared.clone().run(run_id, mode, cancel)).await {
                Ok(outcome) => outcome,
                Err(err) => Err(err.into()),
            };
            shared.finish(run_id, outcome);
        });

        AuditTicket {
            run_id,
            coalesced: false,
            rx,
        }
    }
}

impl Shared {
    async fn run(
        self: Arc<Self>,
        run_id: Uuid,
        mode: AuditMode,
        cancel: CancellationToken,
    ) -> AuditOutcome {
        let started_at = OffsetDateTime::now_utc().unix_timestamp();
        info!(%run_id, ?mode, "orphan audit started");

        let records_task = {
            let shared = self.clone();
            let cancel = cancel.clone();
            let registry = self.seeded_registry();
            spawn_blocking(move || {
                let c = &shared.collaborators;
                RecordWalker::new(&*c.records, &*c.fs, &shared.policy, &cancel).walk(registry)
            })
        };
        let files_task = {
            let shared = self.clone();
            let cancel = cancel.clone();
            spawn_blocking(move || {
                FilesystemWalker::new(&*shared.collaborators.fs, &shared.policy, &cancel).walk()
            })
        };

        // a failure on either side stops the other walk early
        let (record_walk, snapshot) = tokio::join!(
            async {
                let res = records_task.await.map_err(AuditFailure::from).and_then(|r| r);
                if res.is_err() {
                    cancel.cancel();
                }
                res
            },
            async {
                let res = files_task.await.map_err(AuditFailure::from).and_then(|r| r);
                if res.is_err() {
                    cancel.cancel();
                }
                res
            }
        );
        let (record_walk, snapshot) = match (record_walk, snapshot) {
            (Ok(r), Ok(s)) => (r, s),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
            (Err(a), Err(b)) => {
                return Err(if a == AuditFailure::Cancelled { b } else { a });
            }
        };

        let orphans = compute_orphans(
            &self.policy,
            &record_walk.registry,
            &snapshot,
            &record_walk.missing,
            SystemTime::now(),
        );
        debug!(
            %run_id,
            orphan_files = orphans.files.len(),
            orphan_records = orphans.records.len(),
            within_grace = orphans.within_grace,
            transient = orphans.transient,
            present_bytes = snapshot.total_bytes(),
            "orphans computed"
        );

        {
            let mut run = self.run.lock();
            if cancel.is_cancelled() {
                return Err(AuditFailure::Cancelled);
            }
            run.cleanup_started = true;
        }

        let shared = self.clone();
        let (cleanup, record_walk, snapshot, orphans) = spawn_blocking(move || {
            let c = &shared.collaborators;
            let executor =
                CleanupExecutor::new(&*c.fs, &*c.settings, &shared.policy, &shared.app_version);
            let cleanup = executor.execute(
                &orphans.files,
                &snapshot.directories,
                &record_walk.registry,
                mode.deletes(),
                OffsetDateTime::now_utc().unix_timestamp(),
            );
            (cleanup, record_walk, snapshot, orphans)
        })
        .await?;

        Ok(Arc::new(build_report(
            run_id,
            mode,
            started_at,
            record_walk,
            snapshot,
            orphans,
            cleanup,
            self.policy.report_detail,
        )))
    }

    /// Downgrade a cleanup request to audit-only once this version has been
    /// cleaned.
    fn resolve_mode(&self, requested: AuditMode) -> AuditMode {
        if !requested.deletes() {
            return requested;
        }
        match self.collaborators.settings.last_cleaning() {
            Ok(Some(meta)) if meta.is_current_for(&self.app_version) => {
                info!(
                    version = %self.app_version,
                    "already cleaned for this version, auditing only"
                );
                AuditMode::AuditOnly
            }
            Ok(_) => requested,
            Err(err) => {
                warn!(error = %err, "could not read last cleaning, auditing only");
                AuditMode::AuditOnly
            }
        }
    }

    fn seeded_registry(&self) -> PathRegistry {
        let normalizer = &self.policy.normalizer;
        let mut registry = PathRegistry::new();
        for path in &self.policy.protected_paths {
            registry.protect_tree(normalizer.normalize(path));
        }
        for path in self.in_use.lock().iter() {
            registry.protect_file(normalizer.normalize(path));
        }
        registry
    }

    fn finish(&self, run_id: Uuid, outcome: AuditOutcome) {
        let waiters = {
            let mut run = self.run.lock();
            run.phase = match &outcome {
                Ok(report) => AuditState::Completed(report.clone()),
                Err(err) => AuditState::Failed(err.clone()),
            };
            run.cancel = None;
            std::mem::take(&mut run.waiters)
        };

        let event = match &outcome {
            Ok(report) => {
                info!(
                    %run_id,
                    orphan_files = report.orphan_file_count,
                    orphan_records = report.orphan_record_count,
                    reclaimable_bytes = report.reclaimable_bytes,
                    cleaned = report.cleanup_performed(),
                    "orphan audit completed"
                );
                AuditEvent::Completed {
                    run_id,
                    orphan_files: report.orphan_file_count,
                    orphan_records: report.orphan_record_count,
                }
            }
            Err(err) => {
                warn!(%run_id, error = %err, "orphan audit failed");
                AuditEvent::Failed {
                    run_id,
                    reason: err.to_string(),
                }
            }
        };
        self.events.lock().publish(event);

        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_report(
    run_id: Uuid,
    mode: AuditMode,
    started_at: i64,
    record_walk: RecordWalk,
    snapshot: FilesystemSnapshot,
    orphans: OrphanSet,
    cleanup: Option<janitor_api::CleanupResult>,
    detail: ReportDetail,
) -> AuditReport {
    let full = detail == ReportDetail::Full;
    AuditReport {
        run_id: run_id.to_string(),
        mode,
        started_at,
        finished_at: OffsetDateTime::now_utc().unix_timestamp(),
        referenced_paths: record_walk.registry.len(),
        present_files: snapshot.files.len(),
        orphan_file_count: orphans.files.len(),
        orphan_files: if full { orphans.files } else { Vec::new() },
        orphan_record_count: orphans.records.len(),
        orphan_records: if full { orphans.records } else { Vec::new() },
        dangling_records: if full {
            record_walk.dangling
        } else {
            Vec::new()
        },
        reclaimable_bytes: orphans.reclaimable_bytes,
        skipped_entries: snapshot.skipped,
        malformed_records: record_walk.malformed,
        contract_violations: record_walk.violations,
        cleanup,
    }
}
