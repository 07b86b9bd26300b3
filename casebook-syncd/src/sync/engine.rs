use std::sync::atomic::{AtomicBool, Ordering};

use casebook_core::{ApiError, CasebookClient};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use super::progress::{ProgressReporter, ProgressStatus, emit};
use super::tasks::{SYNC_TASKS, SyncTask, TaskKind, find_task};
use crate::mirror::{Collection, MirrorError, MirrorStore, SyncMeta, SyncStatus};

/// Metadata key of the full-sync row.
pub const SYNC_META_KEY: &str = "all";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
    #[error("{collection} payload contains a record that is not an object")]
    InvalidRecord { collection: Collection },
    #[error("{0} is not a user-assignment collection")]
    NoParentKey(Collection),
    #[error("unknown sync task: {0}")]
    UnknownTask(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { records: usize },
    Skipped { reason: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: &'static str,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub tasks: Vec<TaskReport>,
    pub finished_at: OffsetDateTime,
}

impl SyncReport {
    pub fn records_written(&self) -> usize {
        self.tasks
            .iter()
            .map(|task| match task.outcome {
                TaskOutcome::Completed { records } => records,
                TaskOutcome::Skipped { .. } => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub projects: i64,
    pub subprojects: i64,
    pub activities: i64,
    pub users: i64,
    pub beneficiaries: i64,
    pub form_templates: i64,
    pub services: i64,
    pub kpis: i64,
    pub last_sync: Option<SyncMeta>,
}

pub struct SyncEngine {
    pub(super) client: CasebookClient,
    pub(super) store: MirrorStore,
    syncing: AtomicBool,
}

struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(client: CasebookClient, store: MirrorStore) -> Self {
        Self {
            client,
            store,
            syncing: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Pulls every entity collection into the mirror, in task order.
    ///
    /// Returns `Ok(None)` without doing anything when another sync on this
    /// engine is still running. The first failing task aborts the run;
    /// collections written before it are left as they are.
    pub async fn sync_all(
        &self,
        progress: Option<&dyn ProgressReporter>,
    ) -> Result<Option<SyncReport>, SyncError> {
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            warn!("sync already in progress, ignoring request");
            return Ok(None);
        };

        let total = SYNC_TASKS.len();
        let mut completed = 0;
        match self.run_all(progress, &mut completed).await {
            Ok(report) => {
                emit(progress, total, completed, "Complete", ProgressStatus::Completed);
                info!(
                    tasks = total,
                    records = report.records_written(),
                    "full sync completed"
                );
                Ok(Some(report))
            }
            Err(err) => {
                emit(progress, total, completed, "Error", ProgressStatus::Error);
                error!(completed, total, error = %err, "full sync failed");
                Err(err)
            }
        }
    }

    async fn run_all(
        &self,
        progress: Option<&dyn ProgressReporter>,
        completed: &mut usize,
    ) -> Result<SyncReport, SyncError> {
        let total = SYNC_TASKS.len();
        let mut tasks = Vec::with_capacity(total);
        for task in &SYNC_TASKS {
            emit(progress, total, *completed, task.name, ProgressStatus::Syncing);
            let outcome = self.run_task(task).await?;
            tasks.push(TaskReport {
                name: task.name,
                outcome,
            });
            *completed += 1;
        }

        let finished_at = OffsetDateTime::now_utc();
        self.store
            .put_sync_meta(
                SYNC_META_KEY,
                &SyncMeta {
                    last_synced_at: finished_at,
                    status: SyncStatus::Idle,
                },
            )
            .await?;

        Ok(SyncReport { tasks, finished_at })
    }

    /// Runs one task against whatever is already in the mirror.
    pub async fn run_task(&self, task: &SyncTask) -> Result<TaskOutcome, SyncError> {
        match task.kind {
            TaskKind::Direct {
                endpoint,
                envelope,
                collection,
            } => {
                let records = self
                    .sync_direct(task.name, endpoint, envelope, collection)
                    .await?;
                Ok(TaskOutcome::Completed { records })
            }
            TaskKind::FanOut {
                parent,
                parent_segment,
                collection,
            } => {
                let records = self
                    .sync_fan_out(task.name, parent, parent_segment, collection)
                    .await?;
                Ok(TaskOutcome::Completed { records })
            }
            TaskKind::Skipped { reason, .. } => {
                warn!(task = task.name, reason, "sync task not implemented, skipping");
                Ok(TaskOutcome::Skipped { reason })
            }
        }
    }

    /// Runs a single task by display name, under the same single-flight guard
    /// as [`SyncEngine::sync_all`].
    pub async fn sync_one(&self, name: &str) -> Result<Option<TaskReport>, SyncError> {
        let task = find_task(name).ok_or_else(|| SyncError::UnknownTask(name.to_string()))?;
        let Some(_guard) = SyncGuard::acquire(&self.syncing) else {
            warn!(task = task.name, "sync already in progress, ignoring request");
            return Ok(None);
        };
        let outcome = self.run_task(task).await?;
        Ok(Some(TaskReport {
            name: task.name,
            outcome,
        }))
    }

    pub async fn sync_stats(&self) -> Result<SyncStats, SyncError> {
        Ok(SyncStats {
            projects: self.store.count(Collection::Projects).await?,
            subprojects: self.store.count(Collection::Subprojects).await?,
            activities: self.store.count(Collection::Activities).await?,
            users: self.store.count(Collection::Users).await?,
            beneficiaries: self.store.count(Collection::Beneficiaries).await?,
            form_templates: self.store.count(Collection::FormTemplates).await?,
            services: self.store.count(Collection::Services).await?,
            kpis: self.store.count(Collection::Kpis).await?,
            last_sync: self.store.get_sync_meta(SYNC_META_KEY).await?,
        })
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
