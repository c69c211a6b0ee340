//! WorkflowEngine - load, synchronise, persist and report for one case
//!
//! Every operation takes the case's lock, re-loads the document from the
//! store (no state is cached between calls), does its work and saves only
//! when something changed.

use super::format::format_report;
use super::status::{seed_phase, StatusComputer};
use super::transition::PhaseTransitionController;
use crate::automation::ToolCatalog;
use crate::error::{WorkflowError, WorkflowResult};
use crate::facts::{self, case_params, FactSource};
use crate::models::{
    CaseState, CasetrackConfig, LandmarkState, LandmarkStatus, MutationTemplates, StatusReport,
    TransitionRecord, VerificationConfig, WorkflowDefinition,
};
use crate::state::StateStore;
use crate::verify::LandmarkVerifier;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Starting values for a new case
#[derive(Debug, Clone, Default)]
pub struct CaseInit {
    pub client_name: Option<String>,
    pub incident_date: Option<String>,
    /// Starting phase; the first configured phase when unset
    pub phase: Option<String>,
}

/// Explicit change to one landmark
#[derive(Debug, Clone, Default)]
pub struct LandmarkUpdate {
    pub status: Option<LandmarkState>,
    pub sub_steps: Vec<(String, bool)>,
    pub note: Option<String>,
}

pub struct WorkflowEngine {
    store: Arc<StateStore>,
    workflow: Arc<WorkflowDefinition>,
    computer: StatusComputer,
    transitions: PhaseTransitionController,
    facts: Arc<dyn FactSource>,
    templates: MutationTemplates,
    verification: VerificationConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<StateStore>,
        workflow: Arc<WorkflowDefinition>,
        facts: Arc<dyn FactSource>,
        tools: ToolCatalog,
        verification: VerificationConfig,
        templates: MutationTemplates,
    ) -> Self {
        let verifier = LandmarkVerifier::new(facts.clone(), workflow.clone(), verification.clone());
        Self {
            store,
            computer: StatusComputer::new(workflow.clone(), verifier, tools),
            transitions: PhaseTransitionController::new(workflow.clone()),
            workflow,
            facts,
            templates,
            verification,
        }
    }

    /// Wire everything from `casetrack/config.toml`
    pub fn from_config(config: &CasetrackConfig, project_root: &Path) -> anyhow::Result<Self> {
        let workflow = match config.workflow_path(project_root) {
            Some(path) => WorkflowDefinition::load(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load workflow {}: {}", path.display(), e))?,
            None => WorkflowDefinition::builtin()?,
        };
        let facts = facts::from_config(config, project_root)?;
        tracing::debug!(source = facts.name(), phases = workflow.phases.len(), "engine configured");

        Ok(Self::new(
            Arc::new(StateStore::new(config.state_dir(project_root))),
            Arc::new(workflow),
            facts,
            ToolCatalog::new(config.automation.available_tools.iter().cloned()),
            config.verification.clone(),
            config.fact_source.templates.clone(),
        ))
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Create the state document for a new case
    pub async fn init_case(&self, case_id: &str, init: CaseInit) -> WorkflowResult<CaseState> {
        let _guard = self.store.lock(case_id).await;
        if self.store.exists(case_id) {
            return Err(WorkflowError::AlreadyExists(case_id.to_string()));
        }

        let phase = match &init.phase {
            Some(id) => self
                .workflow
                .phase(id)
                .ok_or_else(|| WorkflowError::UnknownPhase(id.clone()))?,
            None => self.workflow.first_phase(),
        };

        let now = Utc::now();
        let mut state = CaseState::new(case_id, &phase.id, now);
        state.metadata.client_name = init.client_name;
        state.metadata.incident_date = init.incident_date;
        state.metadata.opened_at = Some(now.format("%Y-%m-%d").to_string());
        seed_phase(&mut state, phase, now);

        self.store.save(case_id, &mut state)?;
        tracing::info!(case_id, phase = %phase.id, "case initialised");
        Ok(state)
    }

    /// Compute status, persisting any corrections
    pub async fn status(&self, case_id: &str) -> WorkflowResult<StatusReport> {
        let _guard = self.store.lock(case_id).await;
        let (report, _) = self.refresh(case_id).await?;
        Ok(report)
    }

    /// Status rendered as text
    pub async fn status_text(&self, case_id: &str) -> WorkflowResult<String> {
        Ok(format_report(&self.status(case_id).await?))
    }

    /// Status for many cases, `max_concurrency` at a time, in input order
    pub async fn status_many(
        self: Arc<Self>,
        case_ids: Vec<String>,
    ) -> Vec<(String, WorkflowResult<StatusReport>)> {
        let permits = Arc::new(Semaphore::new(self.verification.concurrency()));
        let mut tasks = JoinSet::new();
        for (index, case_id) in case_ids.iter().cloned().enumerate() {
            let engine = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => engine.status(&case_id).await,
                    Err(_) => Err(WorkflowError::Io(std::io::Error::other("worker pool closed"))),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<WorkflowResult<StatusReport>>> =
            case_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "status task panicked"),
            }
        }

        case_ids
            .into_iter()
            .zip(results)
            .map(|(id, result)| {
                let result = result.unwrap_or_else(|| {
                    Err(WorkflowError::Io(std::io::Error::other("status task did not finish")))
                });
                (id, result)
            })
            .collect()
    }

    /// Run auto-verification only; returns the landmarks that changed
    pub async fn auto_verify_all(&self, case_id: &str) -> WorkflowResult<Vec<String>> {
        let _guard = self.store.lock(case_id).await;
        let mut state = self.store.load(case_id)?;
        let now = Utc::now();

        let repairs = state.take_repairs();
        let sync = self.computer.synchronize(&mut state, now);
        let changed = self.computer.verifier().auto_verify(&mut state, now).await;

        if !repairs.is_empty() || !sync.is_empty() || !changed.is_empty() {
            self.store.save(case_id, &mut state)?;
        }
        for landmark_id in &changed {
            self.mirror_landmark(case_id, landmark_id, LandmarkState::Complete)
                .await;
        }
        Ok(changed)
    }

    /// Move the case to `target`, recomputing status first
    pub async fn advance(&self, case_id: &str, target: &str, force: bool) -> WorkflowResult<TransitionRecord> {
        let _guard = self.store.lock(case_id).await;
        let (report, mut state) = self.refresh(case_id).await?;

        let record = self.transitions.plan(&report, target, force, Utc::now())?;
        let seeded = self.transitions.commit(&mut state, &record);
        self.store.save(case_id, &mut state)?;

        if record.was_overridden() {
            tracing::warn!(
                case_id,
                from = %record.from_phase,
                to = %record.to_phase,
                overridden = ?record.overridden_blockers,
                "phase advanced with hard blockers overridden"
            );
        } else {
            tracing::info!(case_id, from = %record.from_phase, to = %record.to_phase, "phase advanced");
        }
        tracing::debug!(case_id, seeded = ?seeded, "landmarks seeded for new phase");

        self.mirror_phase(case_id, &record).await;
        Ok(record)
    }

    /// Explicitly set a landmark's status, sub-steps or notes
    pub async fn update_landmark(
        &self,
        case_id: &str,
        landmark_id: &str,
        update: LandmarkUpdate,
    ) -> WorkflowResult<LandmarkStatus> {
        let Some((_, definition)) = self.workflow.landmark(landmark_id) else {
            return Err(WorkflowError::UnknownLandmark(landmark_id.to_string()));
        };
        for (step, _) in &update.sub_steps {
            if !definition.sub_steps.iter().any(|s| s == step) {
                return Err(WorkflowError::UnknownLandmark(format!("{}.{}", landmark_id, step)));
            }
        }

        let _guard = self.store.lock(case_id).await;
        let mut state = self.store.load(case_id)?;
        let now = Utc::now();

        let entry = state
            .landmarks
            .entry(landmark_id.to_string())
            .or_insert_with(|| LandmarkStatus::not_started(now));
        let previous = entry.status;
        if let Some(status) = update.status {
            entry.set_status(status, now);
        }
        for (step, done) in update.sub_steps {
            entry.sub_steps.insert(step, done);
        }
        if let Some(note) = update.note {
            entry.add_note(note);
        }
        entry.updated_at = Some(now);
        let updated = entry.clone();

        self.store.save(case_id, &mut state)?;
        if previous != updated.status {
            tracing::info!(case_id, landmark = landmark_id, from = %previous, to = %updated.status, "landmark updated");
            self.mirror_landmark(case_id, landmark_id, updated.status).await;
        }
        Ok(updated)
    }

    /// Load, synchronise and save if corrected; caller holds the lock
    async fn refresh(&self, case_id: &str) -> WorkflowResult<(StatusReport, CaseState)> {
        let mut state = self.store.load(case_id)?;
        let report = self.computer.compute_status(&mut state).await;

        if report.has_corrections() {
            self.store.save(case_id, &mut state)?;
            tracing::info!(case_id, corrections = report.corrections.len(), "persisted status corrections");
            for correction in &report.corrections {
                tracing::debug!(case_id, kind = ?correction.kind, subject = %correction.subject, detail = %correction.detail, "correction");
            }
            for correction in report
                .corrections
                .iter()
                .filter(|c| c.kind == crate::models::CorrectionKind::AutoVerified)
            {
                self.mirror_landmark(case_id, &correction.subject, LandmarkState::Complete)
                    .await;
            }
        }
        Ok((report, state))
    }

    async fn mirror_landmark(&self, case_id: &str, landmark_id: &str, status: LandmarkState) {
        let Some(template) = &self.templates.set_landmark_status else {
            return;
        };
        let mut params = case_params(case_id);
        params.insert("landmark_id".to_string(), Value::String(landmark_id.to_string()));
        params.insert("status".to_string(), Value::String(status.as_str().to_string()));
        self.mirror(case_id, template, params).await;
    }

    async fn mirror_phase(&self, case_id: &str, record: &TransitionRecord) {
        let Some(template) = &self.templates.set_phase else {
            return;
        };
        let mut params = case_params(case_id);
        params.insert("phase".to_string(), Value::String(record.to_phase.clone()));
        params.insert(
            "previous_phase".to_string(),
            Value::String(record.from_phase.clone()),
        );
        self.mirror(case_id, template, params).await;
    }

    /// Best-effort write to the fact source; failures are only logged
    async fn mirror(&self, case_id: &str, template: &str, params: facts::QueryParams) {
        let timeout = self.verification.timeout();
        match tokio::time::timeout(timeout, self.facts.execute(template, &params)).await {
            Ok(Ok(())) => tracing::debug!(case_id, "mirrored update to fact source"),
            Ok(Err(e)) => tracing::warn!(case_id, error = %e, "failed to mirror update to fact source"),
            Err(_) => tracing::warn!(case_id, timeout_ms = timeout.as_millis() as u64, "mirroring to fact source timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::MemoryFactSource;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"
phases:
  - id: setup
    landmarks:
      - id: a
      - id: b
        sub_steps: [one, two]
      - id: claim
        auto_verify: true
        verify_query: "CLAIM"
  - id: active_work
    landmarks: [{ id: c }]
"#;

    fn engine(facts: Arc<MemoryFactSource>, templates: MutationTemplates) -> (TempDir, WorkflowEngine) {
        let temp = TempDir::new().unwrap();
        let engine = WorkflowEngine::new(
            Arc::new(StateStore::new(temp.path().join("cases"))),
            Arc::new(WorkflowDefinition::from_yaml(WORKFLOW).unwrap()),
            facts,
            ToolCatalog::default(),
            VerificationConfig::default(),
            templates,
        );
        (temp, engine)
    }

    #[tokio::test]
    async fn test_init_case() {
        let (_temp, engine) = engine(Arc::new(MemoryFactSource::new()), MutationTemplates::default());
        let state = engine
            .init_case(
                "smith-2024",
                CaseInit {
                    client_name: Some("Jane Smith".to_string()),
                    ..CaseInit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(state.phase, "setup");
        assert_eq!(state.landmarks.len(), 3);

        let again = engine.init_case("smith-2024", CaseInit::default()).await;
        assert!(matches!(again, Err(WorkflowError::AlreadyExists(_))));

        let bad_phase = engine
            .init_case(
                "other",
                CaseInit {
                    phase: Some("nowhere".to_string()),
                    ..CaseInit::default()
                },
            )
            .await;
        assert!(matches!(bad_phase, Err(WorkflowError::UnknownPhase(_))));
    }

    #[tokio::test]
    async fn test_status_missing_case() {
        let (_temp, engine) = engine(Arc::new(MemoryFactSource::new()), MutationTemplates::default());
        let err = engine.status("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_landmark() {
        let (_temp, engine) = engine(Arc::new(MemoryFactSource::new()), MutationTemplates::default());
        engine.init_case("x", CaseInit::default()).await.unwrap();

        let updated = engine
            .update_landmark(
                "x",
                "b",
                LandmarkUpdate {
                    status: Some(LandmarkState::InProgress),
                    sub_steps: vec![("one".to_string(), true)],
                    note: Some("called provider".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, LandmarkState::InProgress);
        assert_eq!(updated.sub_steps.get("one"), Some(&true));

        let stored = engine.store().load("x").unwrap();
        assert_eq!(stored.landmark_state("b"), LandmarkState::InProgress);
        assert_eq!(stored.landmark("b").unwrap().notes.as_deref(), Some("called provider"));

        let unknown = engine.update_landmark("x", "zzz", LandmarkUpdate::default()).await;
        assert!(matches!(unknown, Err(WorkflowError::UnknownLandmark(_))));
        let bad_step = engine
            .update_landmark(
                "x",
                "b",
                LandmarkUpdate {
                    sub_steps: vec![("three".to_string(), true)],
                    ..LandmarkUpdate::default()
                },
            )
            .await;
        assert!(matches!(bad_step, Err(WorkflowError::UnknownLandmark(_))));
    }

    #[tokio::test]
    async fn test_auto_verify_all_persists_and_mirrors() {
        let facts = Arc::new(MemoryFactSource::new().with_verified("CLAIM", "x", true));
        let templates = MutationTemplates {
            set_landmark_status: Some("SET_STATUS".to_string()),
            set_phase: None,
        };
        let (_temp, engine) = engine(facts.clone(), templates);
        engine.init_case("x", CaseInit::default()).await.unwrap();

        let changed = engine.auto_verify_all("x").await.unwrap();
        assert_eq!(changed, vec!["claim"]);
        assert_eq!(
            engine.store().load("x").unwrap().landmark_state("claim"),
            LandmarkState::Complete
        );

        let executed = facts.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "SET_STATUS");
        assert_eq!(executed[0].1["landmark_id"], "claim");
        assert_eq!(executed[0].1["status"], "complete");

        assert!(engine.auto_verify_all("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirror_failure_is_not_fatal() {
        let facts = Arc::new(MemoryFactSource::new());
        facts.fail_query("SET_PHASE");
        let templates = MutationTemplates {
            set_landmark_status: None,
            set_phase: Some("SET_PHASE".to_string()),
        };
        let (_temp, engine) = engine(facts, templates);
        engine.init_case("x", CaseInit::default()).await.unwrap();

        let record = engine.advance("x", "active_work", true).await.unwrap();
        assert_eq!(record.to_phase, "active_work");
        assert_eq!(engine.store().load("x").unwrap().phase, "active_work");
    }

    #[tokio::test]
    async fn test_status_many_keeps_order() {
        let (_temp, engine) = engine(Arc::new(MemoryFactSource::new()), MutationTemplates::default());
        engine.init_case("b", CaseInit::default()).await.unwrap();
        engine.init_case("a", CaseInit::default()).await.unwrap();
        let engine = Arc::new(engine);

        let results = engine
            .status_many(vec!["b".to_string(), "ghost".to_string(), "a".to_string()])
            .await;
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "ghost", "a"]);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.as_ref().unwrap_err().is_not_found());
        assert!(results[2].1.is_ok());
    }
}
