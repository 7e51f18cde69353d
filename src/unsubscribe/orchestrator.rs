//! Run orchestration: walks a message's mechanisms in priority order and
//! persists exactly one terminal record per run.
//!
//! Runs for the same message id never overlap. Runs for different ids are
//! independent and bounded by `max_concurrent_runs`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::DatabaseError;
use crate::store::StatusStore;

use super::classifier::{Vocabulary, classify};
use super::executor::StrategyExecutor;
use super::extractor::{extract, first_mailto, first_unsubscribe_href};
use super::transport::HttpTransport;
use super::types::{
    MechanismKind, MessageMetadata, Outcome, OutcomeRecord, UnsubscribeMethod, UnsubscribeStatus,
};

/// What happened to a trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerResult {
    /// A background run was scheduled.
    Started,
    /// A run for this message is already in flight; nothing was scheduled.
    AlreadyRunning,
    /// The message is already unsubscribed; use a forced trigger to rerun.
    AlreadySucceeded,
}

/// Releases the in-flight claim on a message id when dropped.
pub(crate) struct RunGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    message_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.message_id);
    }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Orchestrator {
    store: Arc<dyn StatusStore>,
    executor: StrategyExecutor,
    vocabulary: Arc<Vocabulary>,
    base_url: Option<String>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn StatusStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Arc<Self> {
        let vocabulary = Arc::new(config.vocabulary.clone());
        Arc::new(Self {
            store,
            executor: StrategyExecutor::new(transport, Arc::clone(&vocabulary)),
            vocabulary,
            base_url: config.base_url.clone(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            permits: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
        })
    }

    pub fn store(&self) -> &Arc<dyn StatusStore> {
        &self.store
    }

    /// Whether a run for `message_id` is queued or in flight.
    pub fn is_running(&self, message_id: &str) -> bool {
        lock(&self.in_flight).contains(message_id)
    }

    pub(crate) fn claim(&self, message_id: &str) -> Option<RunGuard> {
        lock(&self.in_flight)
            .insert(message_id.to_string())
            .then(|| RunGuard {
                in_flight: Arc::clone(&self.in_flight),
                message_id: message_id.to_string(),
            })
    }

    /// Current record of a message; `not_attempted` if no run has touched it.
    pub async fn status(&self, message_id: &str) -> Result<OutcomeRecord, DatabaseError> {
        Ok(self
            .store
            .get_outcome(message_id)
            .await?
            .unwrap_or_else(|| OutcomeRecord::not_attempted(message_id)))
    }

    /// Records for several messages, in request order.
    pub async fn statuses(&self, message_ids: &[String]) -> Result<Vec<OutcomeRecord>, DatabaseError> {
        let mut found = self.store.get_outcomes(message_ids).await?;
        Ok(message_ids
            .iter()
            .map(|id| match found.iter().position(|r| &r.message_id == id) {
                Some(i) => found.swap_remove(i),
                None => OutcomeRecord::not_attempted(id),
            })
            .collect())
    }

    // ── Background triggers ─────────────────────────────────────────

    /// Schedule a background run unless one is in flight or the message
    /// is already unsubscribed.
    pub async fn trigger(self: &Arc<Self>, message_id: &str) -> TriggerResult {
        self.spawn_run(message_id, false).await
    }

    /// Schedule a background run even if the message already succeeded.
    pub async fn retrigger(self: &Arc<Self>, message_id: &str) -> TriggerResult {
        self.spawn_run(message_id, true).await
    }

    /// Trigger every id in order. Duplicates in `message_ids` collapse to
    /// one run.
    pub async fn trigger_many(
        self: &Arc<Self>,
        message_ids: &[String],
        force: bool,
    ) -> Vec<(String, TriggerResult)> {
        let mut results = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            results.push((id.clone(), self.spawn_run(id, force).await));
        }
        results
    }

    async fn spawn_run(self: &Arc<Self>, message_id: &str, force: bool) -> TriggerResult {
        let Some(guard) = self.claim(message_id) else {
            debug!(message_id, "Run already in flight, ignoring trigger");
            return TriggerResult::AlreadyRunning;
        };

        if !force {
            match self.store.get_outcome(message_id).await {
                Ok(Some(record)) if record.status == UnsubscribeStatus::Success => {
                    debug!(message_id, "Already unsubscribed, ignoring trigger");
                    return TriggerResult::AlreadySucceeded;
                }
                Ok(_) => {}
                Err(e) => warn!(message_id, error = %e, "Could not read prior outcome, running anyway"),
            }
        }

        let this = Arc::clone(self);
        let message_id = message_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.run_claimed(guard, &message_id, None).await {
                error!(message_id = %message_id, error = %e, "Unsubscribe run failed to persist");
            }
        });
        TriggerResult::Started
    }

    // ── Inline runs ─────────────────────────────────────────────────

    /// Run the engine for a stored message and wait for the terminal record.
    ///
    /// Returns `None` when a run for the same id is already in flight.
    pub async fn run(&self, message_id: &str) -> Result<Option<OutcomeRecord>, DatabaseError> {
        let Some(guard) = self.claim(message_id) else {
            return Ok(None);
        };
        self.run_claimed(guard, message_id, None).await.map(Some)
    }

    /// Run the engine on metadata supplied by the caller instead of the store.
    pub async fn run_metadata(
        &self,
        message_id: &str,
        metadata: &MessageMetadata,
    ) -> Result<Option<OutcomeRecord>, DatabaseError> {
        let Some(guard) = self.claim(message_id) else {
            return Ok(None);
        };
        self.run_claimed(guard, message_id, Some(metadata.clone()))
            .await
            .map(Some)
    }

    /// Run several messages concurrently and wait for all of them.
    pub async fn run_many(
        &self,
        message_ids: &[String],
    ) -> Vec<(String, Result<Option<OutcomeRecord>, DatabaseError>)> {
        let runs = message_ids.iter().map(|id| async move { (id.clone(), self.run(id).await) });
        futures::future::join_all(runs).await
    }

    async fn run_claimed(
        &self,
        _guard: RunGuard,
        message_id: &str,
        metadata: Option<MessageMetadata>,
    ) -> Result<OutcomeRecord, DatabaseError> {
        // The semaphore is never closed, so acquire only fails if it is.
        let _permit = self.permits.acquire().await.ok();
        let run_id = Uuid::new_v4();

        let metadata = match metadata {
            Some(m) => Some(m),
            None => self.store.get_message(message_id).await?,
        };
        let attempts = self.store.begin_attempt(message_id).await?;
        info!(run_id = %run_id, message_id, attempts, "Unsubscribe run started");

        let mut record = match metadata {
            Some(metadata) => self.attempt(run_id, message_id, &metadata).await,
            None => {
                warn!(run_id = %run_id, message_id, "Unknown message id");
                OutcomeRecord::finished(
                    message_id,
                    &Outcome::Failed {
                        error: "message not found".into(),
                    },
                    UnsubscribeMethod::None,
                    None,
                )
            }
        };
        record.attempts = attempts;
        self.store.save_outcome(&record).await?;

        info!(
            run_id = %run_id,
            message_id,
            status = %record.status,
            method = %record.method,
            "Unsubscribe run finished"
        );
        Ok(record)
    }

    /// Walk the candidates until one is decisive. Without one, keep the last
    /// non-failed outcome, falling back to the last failure.
    async fn attempt(&self, run_id: Uuid, message_id: &str, metadata: &MessageMetadata) -> OutcomeRecord {
        let mechanisms = extract(metadata, self.base_url.as_deref());
        if mechanisms.is_empty() {
            return manual_fallback(message_id, metadata);
        }

        let mut last_usable: Option<(Outcome, MechanismKind, String)> = None;
        let mut last_failure: Option<(Outcome, MechanismKind, String)> = None;

        for (index, mechanism) in mechanisms.iter().enumerate() {
            let execution = self.executor.execute(mechanism).await;
            let outcome = classify(execution.kind, &execution.result, &self.vocabulary);
            info!(
                run_id = %run_id,
                message_id,
                candidate = index + 1,
                of = mechanisms.len(),
                kind = ?execution.kind,
                url = %execution.url,
                status = %outcome.status(),
                "Mechanism attempted"
            );

            if outcome.is_decisive() {
                return OutcomeRecord::finished(
                    message_id,
                    &outcome,
                    execution.kind.method(),
                    Some(execution.url),
                );
            }
            let slot = match outcome {
                Outcome::Failed { .. } => &mut last_failure,
                _ => &mut last_usable,
            };
            *slot = Some((outcome, execution.kind, execution.url));
        }

        match last_usable.or(last_failure) {
            Some((outcome, kind, url)) => OutcomeRecord::finished(message_id, &outcome, kind.method(), Some(url)),
            None => manual_fallback(message_id, metadata),
        }
    }
}

/// Record for a message with no automatable mechanism. A body anchor that
/// could not be resolved to http(s) is kept as a manual link; otherwise the
/// first mailto target, if any, is kept for reference.
fn manual_fallback(message_id: &str, metadata: &MessageMetadata) -> OutcomeRecord {
    let anchor = metadata.html_body.as_deref().and_then(first_unsubscribe_href);
    let (method, url) = match anchor {
        Some(href) => (UnsubscribeMethod::Manual, Some(href)),
        None => (UnsubscribeMethod::None, first_mailto(metadata)),
    };
    OutcomeRecord::finished(message_id, &Outcome::ManualRequired, method, url)
}
