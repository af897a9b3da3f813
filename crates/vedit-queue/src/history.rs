//! Bounded retention of finished jobs, for operational visibility only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use vedit_models::RenderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
}

/// A finished job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub render_id: RenderId,
    pub outcome: JobOutcome,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Ring buffers of completed and failed jobs, pruned by age and count.
#[derive(Debug)]
pub struct JobHistory {
    completed: VecDeque<HistoryEntry>,
    failed: VecDeque<HistoryEntry>,
    keep_completed: Duration,
    keep_failed: Duration,
    max_entries: usize,
}

impl JobHistory {
    pub fn new(keep_completed: Duration, keep_failed: Duration, max_entries: usize) -> Self {
        Self {
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            keep_completed,
            keep_failed,
            max_entries,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        let now = entry.finished_at;
        let list = match entry.outcome {
            JobOutcome::Completed => &mut self.completed,
            JobOutcome::Failed => &mut self.failed,
        };
        list.push_back(entry);
        while list.len() > self.max_entries {
            list.pop_front();
        }
        self.prune(now);
    }

    /// Drop entries older than their retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        prune_list(&mut self.completed, self.keep_completed, now);
        prune_list(&mut self.failed, self.keep_failed, now);
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    /// Most recent entries first, across both outcomes.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut all: Vec<&HistoryEntry> = self.completed.iter().chain(self.failed.iter()).collect();
        all.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        all.into_iter().take(limit).cloned().collect()
    }
}

fn prune_list(list: &mut VecDeque<HistoryEntry>, keep: Duration, now: DateTime<Utc>) {
    while let Some(front) = list.front() {
        let expired = (now - front.finished_at)
            .to_std()
            .map(|age| age > keep)
            .unwrap_or(false);
        if !expired {
            break;
        }
        list.pop_front();
    }
}
