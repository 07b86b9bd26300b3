use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Syncing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total: usize,
    pub completed: usize,
    pub current_entity: String,
    pub status: ProgressStatus,
}

/// Observer of sync progress. Called synchronously at every task transition.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &SyncProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&SyncProgress) + Send + Sync,
{
    fn report(&self, progress: &SyncProgress) {
        self(progress)
    }
}

pub(crate) fn emit(
    reporter: Option<&dyn ProgressReporter>,
    total: usize,
    completed: usize,
    current_entity: &str,
    status: ProgressStatus,
) {
    if let Some(reporter) = reporter {
        reporter.report(&SyncProgress {
            total,
            completed,
            current_entity: current_entity.to_string(),
            status,
        });
    }
}
