//! Log links for array children.
//!
//! Each child still being checked gets one link to its external job and one
//! link per recorded attempt. Links are named by the child's original array
//! position so they match what the user submitted.

use tributary_core::{Phase, TaskLog};

use crate::cache::job_store::{Attempt, JobRecord};

/// Renders log links for a batch backend.
pub trait LogLinkFormatter: Send + Sync {
    /// Link to the external job of one child.
    fn job_link(&self, job: &JobRecord, child: usize, original_index: usize) -> TaskLog;

    /// Link to the log stream of one attempt.
    fn attempt_link(&self, attempt: &Attempt, original_index: usize, phase: Phase) -> TaskLog;

    /// All links for one child.
    fn child_links(
        &self,
        job: &JobRecord,
        child: usize,
        original_index: usize,
        phase: Phase,
    ) -> Vec<TaskLog> {
        let attempts = job.attempts(child);
        let mut links = Vec::with_capacity(1 + attempts.len());
        links.push(self.job_link(job, child, original_index));
        links.extend(
            attempts
                .iter()
                .map(|attempt| self.attempt_link(attempt, original_index, phase)),
        );
        links
    }
}

/// Links into a cloud batch console and its log viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConsoleLinks {
    region: String,
}

impl BatchConsoleLinks {
    /// Creates links for jobs in `region`.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }
}

impl LogLinkFormatter for BatchConsoleLinks {
    fn job_link(&self, job: &JobRecord, child: usize, original_index: usize) -> TaskLog {
        TaskLog::new(
            format!("Batch Job #{original_index}"),
            format!(
                "https://console.aws.amazon.com/batch/home?region={}#/jobs/{}/child/{}:{child}",
                self.region, job.id, job.id
            ),
        )
    }

    fn attempt_link(&self, attempt: &Attempt, original_index: usize, phase: Phase) -> TaskLog {
        TaskLog::new(
            format!("Batch #{original_index} ({phase})"),
            format!(
                "https://console.aws.amazon.com/cloudwatch/home?region={}#logEventViewer:group=/aws/batch/job;stream={}",
                self.region, attempt.log_stream
            ),
        )
    }
}
