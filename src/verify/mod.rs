//! Landmark verification against the fact source
//!
//! Verification is advisory. Any query that errors, times out or returns an
//! unexpected shape counts as "not verified"; the failure is logged and never
//! reaches the caller.

use crate::facts::{case_params, FactSource, FactSourceError, Row};
use crate::models::{CaseState, LandmarkState, VerificationConfig, WorkflowDefinition};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Prefix of the note written on auto-verified landmarks
pub const AUTO_VERIFIED_NOTE: &str = "Auto-verified from fact source";

/// Read the boolean answer out of a result set
///
/// Uses the first row only: its `verified` column if present, otherwise its
/// single column. Anything that is not a boolean is unverified.
pub fn interpret_rows(rows: &[Row]) -> bool {
    let Some(row) = rows.first() else {
        return false;
    };
    let value = match row.get("verified") {
        Some(v) => v,
        None if row.len() == 1 => match row.values().next() {
            Some(v) => v,
            None => return false,
        },
        None => return false,
    };
    matches!(value, Value::Bool(true))
}

/// Runs landmark verification queries for one workflow
pub struct LandmarkVerifier {
    facts: Arc<dyn FactSource>,
    workflow: Arc<WorkflowDefinition>,
    config: VerificationConfig,
}

impl LandmarkVerifier {
    pub fn new(
        facts: Arc<dyn FactSource>,
        workflow: Arc<WorkflowDefinition>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            facts,
            workflow,
            config,
        }
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    /// Check one landmark; false when it is not verifiable or the query fails
    pub async fn verify(&self, case_id: &str, landmark_id: &str) -> bool {
        let Some((_, landmark)) = self.workflow.landmark(landmark_id) else {
            return false;
        };
        let Some(query) = landmark.verification_query() else {
            return false;
        };
        run_verification(
            self.facts.clone(),
            case_id.to_string(),
            landmark_id.to_string(),
            query.to_string(),
            self.config.timeout(),
        )
        .await
    }

    /// Landmarks of the current phase worth querying
    pub fn candidates(&self, state: &CaseState) -> Vec<(String, String)> {
        let Some(phase) = self.workflow.phase(&state.phase) else {
            return Vec::new();
        };
        phase
            .landmarks
            .iter()
            .filter(|l| !state.landmark_state(&l.id).is_done())
            .filter_map(|l| {
                l.verification_query()
                    .map(|q| (l.id.clone(), q.to_string()))
            })
            .collect()
    }

    /// Verify several landmarks concurrently, bounded by `max_concurrency`
    ///
    /// Returns the ids that verified true. The whole batch is bounded by
    /// [`VerificationConfig::overall_timeout`]; queries still running at that
    /// point count as unverified.
    pub async fn verify_batch(&self, case_id: &str, candidates: Vec<(String, String)>) -> Vec<String> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let order: HashMap<String, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (id.clone(), i))
            .collect();
        let overall = self.config.overall_timeout(candidates.len());
        let permits = Arc::new(Semaphore::new(self.config.concurrency()));
        let per_query = self.config.timeout();

        let mut tasks = JoinSet::new();
        for (landmark_id, query) in candidates {
            let facts = self.facts.clone();
            let permits = permits.clone();
            let case_id = case_id.to_string();
            tasks.spawn(async move {
                let verified = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        run_verification(facts, case_id, landmark_id.clone(), query, per_query).await
                    }
                    Err(_) => false,
                };
                (landmark_id, verified)
            });
        }

        let mut verified = Vec::new();
        let collect = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, true)) => verified.push(id),
                    Ok((_, false)) => {}
                    Err(e) => tracing::warn!(case_id, error = %e, "verification task failed"),
                }
            }
        };
        if tokio::time::timeout(overall, collect).await.is_err() {
            tracing::warn!(
                case_id,
                timeout_ms = overall.as_millis() as u64,
                "verification pass timed out; unfinished landmarks left unverified"
            );
        }
        tasks.abort_all();

        verified.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
        verified
    }

    /// Verify the current phase's open landmarks and mark the confirmed ones
    /// complete. Returns the landmarks that changed.
    pub async fn auto_verify(&self, state: &mut CaseState, now: DateTime<Utc>) -> Vec<String> {
        let candidates = self.candidates(state);
        let verified = self.verify_batch(&state.case_id, candidates).await;

        let mut changed = Vec::new();
        for id in verified {
            let entry = state.landmarks.entry(id.clone()).or_default();
            if entry.is_done() {
                continue;
            }
            entry.set_status(LandmarkState::Complete, now);
            entry.add_note(format!("{} on {}", AUTO_VERIFIED_NOTE, now.format("%Y-%m-%d")));
            tracing::info!(case_id = %state.case_id, landmark = %id, "landmark auto-verified");
            changed.push(id);
        }
        changed
    }
}

async fn run_verification(
    facts: Arc<dyn FactSource>,
    case_id: String,
    landmark_id: String,
    query: String,
    timeout: Duration,
) -> bool {
    let params = case_params(&case_id);
    let result = match tokio::time::timeout(timeout, facts.query(&query, &params)).await {
        Ok(result) => result,
        Err(_) => Err(FactSourceError::Timeout(timeout)),
    };

    match result {
        Ok(rows) => {
            let verified = interpret_rows(&rows);
            tracing::debug!(case_id = %case_id, landmark = %landmark_id, verified, "verification query answered");
            verified
        }
        Err(e) => {
            tracing::warn!(
                case_id = %case_id,
                landmark = %landmark_id,
                source = facts.name(),
                error = %e,
                "verification failed; treating as not verified"
            );
            false
        }
    }
}
