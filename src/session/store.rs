//! Per-session turn history with bounded retention
//!
//! Records live in a concurrent map keyed by session id. Each record sits
//! behind its own async mutex, so one session is a single timeline while
//! different sessions never contend. A [`SessionHandle`] owns the lock and is
//! what the pipeline holds from history load through turn append.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use crate::config::SessionConfig;
use crate::session::compaction::Compactor;
use crate::types::{SessionSnapshot, Summary, Turn};

/// Compaction thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Turns condensed per summary; compaction runs when the active count is a multiple of it
    pub compaction_batch: usize,
    /// Hard bound on active turns
    pub max_active_turns: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            compaction_batch: 5,
            max_active_turns: 10,
        }
    }
}

impl From<&SessionConfig> for RetentionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            compaction_batch: config.compaction_batch.max(1),
            max_active_turns: config.max_active_turns.max(config.compaction_batch.max(1)),
        }
    }
}

/// Mutable state of one session
#[derive(Debug, Default)]
pub struct SessionRecord {
    turns: Vec<Turn>,
    summaries: Vec<Summary>,
    last_sequence: u64,
}

impl SessionRecord {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            turns: self.turns.clone(),
            summaries: self.summaries.clone(),
        }
    }

    fn reset(&mut self) {
        *self = SessionRecord::default();
    }
}

pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<SessionRecord>>>,
    compactor: Compactor,
    policy: RetentionPolicy,
}

impl SessionStore {
    pub fn new(compactor: Compactor, policy: RetentionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            compactor,
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Enter the session's critical region, creating the session if unseen
    pub async fn lock(&self, key: &str) -> SessionHandle {
        let record = self
            .sessions
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();
        let guard = record.lock_owned().await;

        SessionHandle {
            key: key.to_string(),
            guard,
            compactor: self.compactor.clone(),
            policy: self.policy,
        }
    }

    /// Active turns and summaries; empty if the key is unseen
    #[instrument(skip(self))]
    pub async fn get_history(&self, key: &str) -> SessionSnapshot {
        let record = match self.sessions.get(key) {
            Some(entry) => entry.value().clone(),
            None => return SessionSnapshot::default(),
        };
        let snapshot = record.lock().await.snapshot();
        snapshot
    }

    /// Append one turn, compacting when the batch boundary is reached
    #[instrument(skip(self, turn))]
    pub async fn append_turn(&self, key: &str, turn: Turn) -> u64 {
        self.lock(key).await.append_turn(turn).await
    }

    /// Discard all turns and summaries for `key`; unknown keys are a no-op
    #[instrument(skip(self))]
    pub async fn clear(&self, key: &str) {
        let record = match self.sessions.get(key) {
            Some(entry) => entry.value().clone(),
            None => return,
        };

        record.lock().await.reset();
        drop(record);

        // Keep the entry if another task is waiting on it
        self.sessions
            .remove_if(key, |_, record| Arc::strong_count(record) == 1);
        debug!("session cleared");
    }

    /// Number of sessions currently tracked
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Exclusive access to one session until dropped
pub struct SessionHandle {
    key: String,
    guard: OwnedMutexGuard<SessionRecord>,
    compactor: Compactor,
    policy: RetentionPolicy,
}

impl SessionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.guard.snapshot()
    }

    pub fn active_turns(&self) -> usize {
        self.guard.turns.len()
    }

    /// Append `turn`, returning its assigned sequence
    ///
    /// Never fails: a failed summary leaves the turns in place. If the active
    /// list is already at its bound the oldest batch is condensed first, with
    /// an extractive summary standing in when generation fails again.
    pub async fn append_turn(&mut self, mut turn: Turn) -> u64 {
        if self.guard.turns.len() >= self.policy.max_active_turns {
            self.compact_oldest(true).await;
        }

        self.guard.last_sequence += 1;
        turn.sequence = self.guard.last_sequence;
        self.guard.turns.push(turn);

        let active = self.guard.turns.len();
        if active % self.policy.compaction_batch == 0 {
            self.compact_oldest(false).await;
        }

        debug!(
            session_id = %self.key,
            sequence = self.guard.last_sequence,
            active_turns = self.guard.turns.len(),
            summaries = self.guard.summaries.len(),
            "turn appended"
        );
        self.guard.last_sequence
    }

    pub fn clear(&mut self) {
        self.guard.reset();
    }

    async fn compact_oldest(&mut self, must_shrink: bool) {
        let batch = self.policy.compaction_batch.min(self.guard.turns.len());
        if batch == 0 {
            return;
        }
        let oldest: Vec<Turn> = self.guard.turns[..batch].to_vec();

        let summary = match self.compactor.summarize(&oldest).await {
            Ok(summary) => summary,
            Err(e) if must_shrink => {
                warn!(session_id = %self.key, error = %e, "summarization failed, using extractive summary");
                Compactor::extractive(&oldest)
            }
            Err(e) => {
                warn!(session_id = %self.key, error = %e, "summarization failed, keeping turns");
                return;
            }
        };

        self.guard.turns.drain(..batch);
        self.guard.summaries.push(summary);
    }
}
