//! Run registry: the single owner of every run's mutable state.
//!
//! Each run lives behind its own lock inside a concurrent map, so the driver
//! writing one run never contends with readers of another. Critical sections
//! are plain memory operations; no lock is ever held across an `.await`.
//!
//! The registry is constructed once at startup and handed explicitly to the
//! supervisor and to every driver.

mod error;
mod model;
mod snapshot;

pub(crate) use error::RegistryError;
pub(crate) use model::{
    BugType, CicdRun, CicdStatus, FinalData, FinalStatus, FixRecord, FixStatus, LogEntry, LogKind,
    NewFix, RunEvent, RunId, RunMetadata, RunResult, RunStats, RunStatus, RunStatusView,
    RunSummary, Severity, Stage,
};
pub(crate) use snapshot::SnapshotStore;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the live event channel. Slow subscribers observe `Lagged`.
const EVENT_CAPACITY: usize = 1024;

/// All state of one run.
#[derive(Debug)]
struct RunEntry {
    meta: RunMetadata,
    status: RunStatus,
    stage: Stage,
    progress: u8,
    stats: RunStats,
    final_status: Option<FinalStatus>,
    end_time: Option<DateTime<Utc>>,
    total_time_secs: Option<f64>,
    iterations_used: Option<u32>,
    error: Option<String>,
    pr_url: Option<String>,
    manual_push_required: bool,
    logs: Vec<LogEntry>,
    fixes: Vec<FixRecord>,
    cicd_runs: Vec<CicdRun>,
    next_cicd_id: u64,
    /// Set once the finalized snapshot has been written.
    persisted: bool,
}

impl RunEntry {
    fn new(meta: RunMetadata) -> Self {
        Self {
            meta,
            status: RunStatus::Running,
            stage: Stage::Idle,
            progress: 0,
            stats: RunStats::default(),
            final_status: None,
            end_time: None,
            total_time_secs: None,
            iterations_used: None,
            error: None,
            pr_url: None,
            manual_push_required: false,
            logs: Vec::new(),
            fixes: Vec::new(),
            cicd_runs: Vec::new(),
            next_cicd_id: 1,
            persisted: false,
        }
    }

    fn is_finalized(&self) -> bool {
        self.status == RunStatus::Completed
    }

    fn status_view(&self, run_id: RunId) -> RunStatusView {
        RunStatusView {
            run_id,
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            stats: self.stats,
            repo_url: self.meta.repo_url.clone(),
            team_name: self.meta.team_name.clone(),
            team_leader: self.meta.team_leader.clone(),
            branch_name: self.meta.branch_name.clone(),
            final_status: self.final_status,
            iterations_used: self.iterations_used,
            pr_url: self.pr_url.clone(),
            manual_push_required: self.manual_push_required,
        }
    }

    fn summary(&self, run_id: RunId) -> RunSummary {
        RunSummary {
            run_id,
            repo_url: self.meta.repo_url.clone(),
            branch_name: self.meta.branch_name.clone(),
            status: self.status,
            stage: self.stage,
            progress: self.progress,
            start_time: self.meta.start_time,
            final_status: self.final_status,
        }
    }

    fn to_result(&self, run_id: RunId) -> RunResult {
        RunResult {
            run_id,
            repo_url: self.meta.repo_url.clone(),
            team_name: self.meta.team_name.clone(),
            team_leader: self.meta.team_leader.clone(),
            branch_name: self.meta.branch_name.clone(),
            retry_limit: self.meta.retry_limit,
            start_time: self.meta.start_time,
            end_time: self.end_time,
            total_time_secs: self.total_time_secs,
            iterations_used: self.iterations_used,
            final_status: self.final_status,
            error: self.error.clone(),
            pr_url: self.pr_url.clone(),
            manual_push_required: self.manual_push_required,
            stats: self.stats,
            fixes: self.fixes.clone(),
            cicd_runs: self.cicd_runs.clone(),
            logs: self.logs.clone(),
        }
    }

    fn apply_final(&mut self, data: FinalData) {
        self.final_status = Some(data.final_status);
        self.end_time = Some(data.end_time);
        if data.total_time_secs.is_some() {
            self.total_time_secs = data.total_time_secs;
        }
        if data.iterations_used.is_some() {
            self.iterations_used = data.iterations_used;
        }
        if data.error.is_some() {
            self.error = data.error;
        }
        self.status = RunStatus::Completed;
    }
}

/// Moves a fix out of `InProgress`, keeping the stats in step.
///
/// Returns false when nothing changed: the fix was already terminal, or the
/// requested status is `InProgress` itself.
fn transition_fix(stats: &mut RunStats, fix: &mut FixRecord, status: FixStatus) -> bool {
    if fix.status != FixStatus::InProgress || status == FixStatus::InProgress {
        return false;
    }
    fix.status = status;
    match status {
        FixStatus::Fixed => stats.fixed_bugs += 1,
        FixStatus::Failed => stats.failed_fixes += 1,
        FixStatus::InProgress => {}
    }
    true
}

struct Inner {
    runs: DashMap<RunId, Arc<RwLock<RunEntry>>>,
    store: SnapshotStore,
    events: broadcast::Sender<RunEvent>,
}

/// Concurrent store of all runs. Cheap to clone; clones share state.
#[derive(Clone)]
pub(crate) struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Creates an empty registry persisting snapshots into `store`.
    pub fn new(store: SnapshotStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                runs: DashMap::new(),
                store,
                events,
            }),
        }
    }

    /// The snapshot store finalized runs are written to.
    pub fn store(&self) -> &SnapshotStore {
        &self.inner.store
    }

    /// Subscribes to live run events across all runs.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is the common case.
        let _ = self.inner.events.send(event);
    }

    fn slot(&self, run_id: RunId) -> Result<Arc<RwLock<RunEntry>>, RegistryError> {
        self.inner
            .runs
            .get(&run_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| RegistryError::unknown_run(run_id))
    }

    /// Runs `f` against a live run under its write lock.
    fn write<T>(
        &self,
        run_id: RunId,
        f: impl FnOnce(&mut RunEntry) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let slot = self.slot(run_id)?;
        let mut entry = slot.write();
        if entry.is_finalized() {
            return Err(RegistryError::RunFinalized { run_id });
        }
        f(&mut *entry)
    }

    /// Runs `f` against a run under its read lock. `None` for unknown runs.
    fn read<T>(&self, run_id: RunId, f: impl FnOnce(&RunEntry) -> T) -> Option<T> {
        let slot = self.slot(run_id).ok()?;
        let entry = slot.read();
        Some(f(&*entry))
    }

    /// Registers a new run in stage `IDLE` with zeroed stats.
    pub fn create_run(&self, run_id: RunId, meta: RunMetadata) -> Result<(), RegistryError> {
        match self.inner.runs.entry(run_id) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateRun { run_id }),
            Entry::Vacant(vacant) => {
                debug!(%run_id, repo = %meta.repo_url, "registering run");
                vacant.insert(Arc::new(RwLock::new(RunEntry::new(meta))));
                Ok(())
            }
        }
    }

    /// Returns true if the run is known to this registry.
    pub fn contains(&self, run_id: RunId) -> bool {
        self.inner.runs.contains_key(&run_id)
    }

    /// Appends a log entry with the next sequence number of the run.
    pub fn append_log(
        &self,
        run_id: RunId,
        message: impl Into<String>,
        kind: LogKind,
    ) -> Result<LogEntry, RegistryError> {
        let message = message.into();
        let entry = self.write(run_id, |run| {
            let seq = run.logs.len() as u64;
            let entry = LogEntry {
                id: format!("{run_id}_{seq}"),
                seq,
                timestamp: Utc::now(),
                message,
                kind,
            };
            run.logs.push(entry.clone());
            Ok(entry)
        })?;
        self.emit(RunEvent::LogAppended {
            run_id,
            entry: entry.clone(),
        });
        Ok(entry)
    }

    /// Overwrites the stage and progress. Last write wins.
    pub fn set_stage(&self, run_id: RunId, stage: Stage, progress: u8) -> Result<(), RegistryError> {
        let progress = progress.min(100);
        self.write(run_id, |run| {
            run.stage = stage;
            run.progress = progress;
            Ok(())
        })?;
        self.emit(RunEvent::StageChanged {
            run_id,
            stage,
            progress,
        });
        Ok(())
    }

    /// Records an attempted fix as `IN_PROGRESS` and returns its identifier.
    pub fn record_fix(&self, run_id: RunId, fix: NewFix) -> Result<String, RegistryError> {
        self.write(run_id, |run| {
            let id = format!("{run_id}_fix_{}", run.fixes.len());
            run.fixes.push(FixRecord {
                id: id.clone(),
                timestamp: Utc::now(),
                file: fix.file,
                line: fix.line,
                bug_type: fix.bug_type,
                description: fix.description,
                commit_message: fix.commit_message,
                severity: fix.severity,
                status: FixStatus::InProgress,
            });
            run.stats.total_bugs += 1;
            Ok(id)
        })
    }

    /// Moves one fix out of `IN_PROGRESS`. Returns whether it changed.
    pub fn set_fix_status(
        &self,
        run_id: RunId,
        fix_id: &str,
        status: FixStatus,
    ) -> Result<bool, RegistryError> {
        self.write(run_id, |run| {
            let RunEntry { fixes, stats, .. } = run;
            let fix = fixes
                .iter_mut()
                .find(|fix| fix.id == fix_id)
                .ok_or_else(|| RegistryError::UnknownFix {
                    run_id,
                    fix_id: fix_id.to_string(),
                })?;
            Ok(transition_fix(stats, fix, status))
        })
    }

    /// Moves every `IN_PROGRESS` fix to `status`. Returns how many moved.
    pub fn set_all_in_progress_fixes(
        &self,
        run_id: RunId,
        status: FixStatus,
    ) -> Result<usize, RegistryError> {
        self.write(run_id, |run| {
            let RunEntry { fixes, stats, .. } = run;
            let mut moved = 0;
            for fix in fixes.iter_mut() {
                if transition_fix(stats, fix, status) {
                    moved += 1;
                }
            }
            Ok(moved)
        })
    }

    /// Appends a CI record and returns its per-run unique identifier.
    pub fn start_cicd_run(&self, run_id: RunId, status: CicdStatus) -> Result<u64, RegistryError> {
        self.write(run_id, |run| {
            let id = run.next_cicd_id;
            run.next_cicd_id += 1;
            run.cicd_runs.push(CicdRun {
                id,
                status,
                timestamp: Utc::now(),
                duration_secs: 0.0,
            });
            Ok(id)
        })
    }

    /// Updates the outcome and duration of a CI record.
    pub fn finish_cicd_run(
        &self,
        run_id: RunId,
        cicd_id: u64,
        status: CicdStatus,
        duration: Duration,
    ) -> Result<(), RegistryError> {
        self.write(run_id, |run| {
            let record = run
                .cicd_runs
                .iter_mut()
                .find(|record| record.id == cicd_id)
                .ok_or(RegistryError::UnknownCicdRun { run_id, cicd_id })?;
            record.status = status;
            record.duration_secs = duration.as_secs_f64();
            Ok(())
        })
    }

    /// Records the outcome of the push / pull-request step.
    pub fn record_publish(
        &self,
        run_id: RunId,
        pr_url: Option<String>,
        manual_push_required: bool,
    ) -> Result<(), RegistryError> {
        self.write(run_id, |run| {
            if pr_url.is_some() {
                run.pr_url = pr_url;
            }
            run.manual_push_required = manual_push_required;
            Ok(())
        })
    }

    /// Marks the run completed, merges `data` and persists the snapshot.
    ///
    /// The first call merges `data`. If writing the snapshot failed, a later
    /// call writes it again without touching the run; once the snapshot is
    /// written, calls return `Ok(None)`. On success returns the snapshot path.
    pub async fn finalize_run(
        &self,
        run_id: RunId,
        data: FinalData,
    ) -> Result<Option<PathBuf>, RegistryError> {
        let slot = self.slot(run_id)?;
        let (first, snapshot) = {
            let mut entry = slot.write();
            if entry.persisted {
                debug!(%run_id, "finalize called on an already finalized run");
                return Ok(None);
            }
            let first = !entry.is_finalized();
            if first {
                entry.apply_final(data);
            } else {
                debug!(%run_id, "retrying snapshot write");
            }
            (first, entry.to_result(run_id))
        };

        let final_status = snapshot.final_status.unwrap_or(FinalStatus::Error);
        if first {
            self.emit(RunEvent::Finalized {
                run_id,
                final_status,
            });
        }

        let path = self
            .inner
            .store
            .save(&snapshot)
            .await
            .map_err(|e| RegistryError::persist(run_id, format!("{e:#}")))?;
        slot.write().persisted = true;

        info!(%run_id, %final_status, path = %path.display(), "run snapshot persisted");
        Ok(Some(path))
    }

    /// Status projection, `None` when the run is unknown.
    pub fn get_status(&self, run_id: RunId) -> Option<RunStatusView> {
        self.read(run_id, |run| run.status_view(run_id))
    }

    /// The most recent `limit` log entries, oldest first.
    pub fn get_logs(&self, run_id: RunId, limit: usize) -> Option<Vec<LogEntry>> {
        self.read(run_id, |run| {
            let start = run.logs.len().saturating_sub(limit);
            run.logs[start..].to_vec()
        })
    }

    pub fn get_fixes(&self, run_id: RunId) -> Option<Vec<FixRecord>> {
        self.read(run_id, |run| run.fixes.clone())
    }

    pub fn get_cicd_runs(&self, run_id: RunId) -> Option<Vec<CicdRun>> {
        self.read(run_id, |run| run.cicd_runs.clone())
    }

    /// Complete in-memory record of a run.
    pub fn get_full_result(&self, run_id: RunId) -> Option<RunResult> {
        self.read(run_id, |run| run.to_result(run_id))
    }

    /// Complete record from memory, falling back to the persisted snapshot.
    pub async fn load_result(&self, run_id: RunId) -> Result<Option<RunResult>, RegistryError> {
        if let Some(result) = self.get_full_result(run_id) {
            return Ok(Some(result));
        }
        self.inner
            .store
            .load(run_id)
            .await
            .map_err(|e| RegistryError::persist(run_id, format!("{e:#}")))
    }

    /// Summaries of all in-memory runs, newest first.
    pub fn list_runs(&self) -> Vec<RunSummary> {
        let slots: Vec<(RunId, Arc<RwLock<RunEntry>>)> = self
            .inner
            .runs
            .iter()
            .map(|item| (*item.key(), Arc::clone(item.value())))
            .collect();

        let mut summaries: Vec<RunSummary> = slots
            .into_iter()
            .map(|(run_id, slot)| {
                let entry = slot.read();
                entry.summary(run_id)
            })
            .collect();
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        summaries
    }
}
