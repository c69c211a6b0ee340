use casetrack::automation::ToolCatalog;
use casetrack::facts::MemoryFactSource;
use casetrack::models::{CorrectionKind, LandmarkState, MutationTemplates, VerificationConfig};
use casetrack::verify::AUTO_VERIFIED_NOTE;
use casetrack::workflow::{CaseInit, LandmarkUpdate};
use casetrack::{StateStore, WorkflowDefinition, WorkflowEngine, WorkflowError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const WORKFLOW: &str = r#"
phases:
  - id: setup
    name: File Setup
    landmarks:
      - id: a
        description: Client intake complete
      - id: b
        description: Retainer signed
        owner: external
        waiting_on: client
      - id: c
        description: Claim opened
        auto_verify: true
        verify_query: "MATCH (c:Case {id: $case_id})-[:HAS_CLAIM]->(:Claim) RETURN true AS verified"
        tool: claims_intake
      - id: d
        description: Police report obtained
        blocker: soft
        auto_verify: true
        verify_query: "MATCH (r:PoliceReport {case_id: $case_id}) RETURN true AS verified"
  - id: negotiation
    landmarks:
      - id: offer_received
  - id: litigation
    landmarks:
      - id: complaint_filed
  - id: closed
    landmarks: []
transitions:
  - from: setup
    to: litigation
    reason: Statute of limitations approaching
"#;

const CLAIM_QUERY: &str =
    "MATCH (c:Case {id: $case_id})-[:HAS_CLAIM]->(:Claim) RETURN true AS verified";
const REPORT_QUERY: &str = "MATCH (r:PoliceReport {case_id: $case_id}) RETURN true AS verified";

struct Harness {
    _temp: TempDir,
    facts: Arc<MemoryFactSource>,
    engine: Arc<WorkflowEngine>,
}

fn harness_with(verification: VerificationConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let facts = Arc::new(MemoryFactSource::new());
    let engine = WorkflowEngine::new(
        Arc::new(StateStore::new(temp.path().join("cases"))),
        Arc::new(WorkflowDefinition::from_yaml(WORKFLOW).unwrap()),
        facts.clone(),
        ToolCatalog::new(["claims_intake".to_string()]),
        verification,
        MutationTemplates::default(),
    );
    Harness {
        _temp: temp,
        facts,
        engine: Arc::new(engine),
    }
}

fn harness() -> Harness {
    harness_with(VerificationConfig::default())
}

async fn open(h: &Harness, case_id: &str) {
    h.engine
        .init_case(
            case_id,
            CaseInit {
                client_name: Some("Jane Smith".to_string()),
                ..CaseInit::default()
            },
        )
        .await
        .unwrap();
}

async fn complete(h: &Harness, case_id: &str, landmark: &str) {
    h.engine
        .update_landmark(
            case_id,
            landmark,
            LandmarkUpdate {
                status: Some(LandmarkState::Complete),
                ..LandmarkUpdate::default()
            },
        )
        .await
        .unwrap();
}

fn write_raw(h: &Harness, case_id: &str, content: &str) {
    let path = h.engine.store().state_path(case_id).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_blocked_advance_then_forced_override() {
    let h = harness();
    open(&h, "smith").await;
    complete(&h, "smith", "a").await;

    let err = h.engine.advance("smith", "negotiation", false).await.unwrap_err();
    match err {
        WorkflowError::BlockedTransition { blockers, .. } => {
            let ids: Vec<&str> = blockers.iter().map(|b| b.id.as_str()).collect();
            assert!(ids.contains(&"b"));
            assert!(ids.contains(&"c"));
            assert!(!ids.contains(&"a"));
            // Soft blockers never block
            assert!(!ids.contains(&"d"));
        }
        other => panic!("expected BlockedTransition, got {:?}", other),
    }
    assert_eq!(h.engine.store().load("smith").unwrap().phase, "setup");

    let record = h.engine.advance("smith", "negotiation", true).await.unwrap();
    assert!(record.forced);
    assert!(record.was_overridden());
    assert!(record.overridden_blockers.contains(&"b".to_string()));
    assert_eq!(record.open_soft_blockers, vec!["d"]);

    let state = h.engine.store().load("smith").unwrap();
    assert_eq!(state.phase, "negotiation");
    assert_eq!(state.previous_phase.as_deref(), Some("setup"));
    assert_eq!(state.transitions.len(), 1);
    assert_eq!(state.transitions[0].overridden_blockers, record.overridden_blockers);
}

#[tokio::test]
async fn test_advance_without_blockers() {
    let h = harness();
    open(&h, "smith").await;
    for id in ["a", "b", "c"] {
        complete(&h, "smith", id).await;
    }

    let record = h.engine.advance("smith", "negotiation", false).await.unwrap();
    assert!(!record.was_overridden());

    let report = h.engine.status("smith").await.unwrap();
    assert_eq!(report.phase, "negotiation");
    assert!(report.completed.is_empty());
    assert_eq!(report.blockers.len(), 1);
    assert_eq!(report.blockers[0].id, "offer_received");
}

#[tokio::test]
async fn test_unknown_phase_is_reset_once() {
    let h = harness();
    write_raw(
        &h,
        "legacy",
        r#"{ "case_id": "legacy", "phase": "unknown_phase", "landmarks": {} }"#,
    );

    let report = h.engine.status("legacy").await.unwrap();
    assert_eq!(report.phase, "setup");
    assert_eq!(report.corrections.len(), 1);
    assert_eq!(report.corrections[0].kind, CorrectionKind::PhaseReset);

    let stored = h.engine.store().load("legacy").unwrap();
    assert_eq!(stored.phase, "setup");
    assert!(h.engine.status("legacy").await.unwrap().corrections.is_empty());
}

#[tokio::test]
async fn test_reset_phase_shows_in_history_after_advance() {
    let h = harness();
    write_raw(
        &h,
        "legacy",
        r#"{ "case_id": "legacy", "phase": "unknown_phase", "landmarks": {},
             "phase_history": [{ "phase": "unknown_phase", "entered_at": "2023-05-01T00:00:00Z" }] }"#,
    );

    h.engine.status("legacy").await.unwrap();
    h.engine.advance("legacy", "negotiation", true).await.unwrap();

    let state = h.engine.store().load("legacy").unwrap();
    let phases: Vec<&str> = state.phase_history.iter().map(|e| e.phase.as_str()).collect();
    assert_eq!(phases, vec!["unknown_phase", "setup", "negotiation"]);
    assert!(state.phase_history[0].exited_at.is_some());
    assert!(state.phase_history[1].exited_at.is_some());
    assert!(state.phase_history[2].exited_at.is_none());
    assert_eq!(state.transitions[0].from_phase, "setup");
}

#[tokio::test]
async fn test_damaged_transition_record_does_not_wipe_audit_log() {
    let h = harness();
    open(&h, "smith").await;
    h.engine.advance("smith", "negotiation", true).await.unwrap();
    h.engine.advance("smith", "litigation", true).await.unwrap();

    let path = h.engine.store().state_path("smith").unwrap();
    let mut doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    doc["transitions"][0].as_object_mut().unwrap().remove("id");
    std::fs::write(&path, doc.to_string()).unwrap();

    let report = h.engine.status("smith").await.unwrap();
    assert!(report
        .corrections
        .iter()
        .any(|c| c.kind == CorrectionKind::FieldRepaired && c.subject == "transitions[0]"));

    let state = h.engine.store().load("smith").unwrap();
    assert_eq!(state.transitions.len(), 1);
    assert_eq!(state.transitions[0].to_phase, "litigation");
    let kept = &state.extra["transitions_unreadable"][0];
    assert_eq!(kept["to_phase"], "negotiation");
    assert_eq!(kept["overridden_blockers"], serde_json::json!(["a", "b", "c"]));

    // The repair is persisted once; later passes are clean
    assert!(h.engine.status("smith").await.unwrap().corrections.is_empty());
}

#[tokio::test]
async fn test_auto_verification_completes_landmark() {
    let h = harness();
    open(&h, "smith").await;
    h.facts.set_verified(CLAIM_QUERY, "smith", true);

    let report = h.engine.status("smith").await.unwrap();
    assert!(report.completed.contains(&"c".to_string()));
    assert!(report
        .corrections
        .iter()
        .any(|c| c.kind == CorrectionKind::AutoVerified && c.subject == "c"));

    let landmark = h.engine.store().load("smith").unwrap().landmark("c").cloned().unwrap();
    assert_eq!(landmark.status, LandmarkState::Complete);
    assert!(landmark.notes.unwrap().contains(AUTO_VERIFIED_NOTE));
}

#[tokio::test]
async fn test_failing_and_slow_queries_leave_status_unchanged() {
    let h = harness_with(VerificationConfig {
        timeout_ms: 50,
        max_concurrency: 2,
    });
    open(&h, "smith").await;
    h.facts.fail_query(CLAIM_QUERY);
    h.facts.delay_query(REPORT_QUERY, Duration::from_secs(2));
    h.facts.set_verified(REPORT_QUERY, "smith", true);

    let report = h.engine.status("smith").await.unwrap();
    assert!(report.corrections.is_empty());

    let state = h.engine.store().load("smith").unwrap();
    assert_eq!(state.landmark_state("c"), LandmarkState::NotStarted);
    assert_eq!(state.landmark_state("d"), LandmarkState::NotStarted);
}

#[tokio::test]
async fn test_status_is_idempotent() {
    let h = harness();
    open(&h, "smith").await;
    complete(&h, "smith", "a").await;

    let first = h.engine.status("smith").await.unwrap();
    let second = h.engine.status("smith").await.unwrap();
    assert!(second.corrections.is_empty());
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(
        h.engine.status_text("smith").await.unwrap(),
        h.engine.status_text("smith").await.unwrap()
    );
}

#[tokio::test]
async fn test_missing_landmarks_are_seeded() {
    let h = harness();
    write_raw(
        &h,
        "sparse",
        r#"{ "case_id": "sparse", "phase": "setup", "landmarks": { "a": { "status": "complete" } } }"#,
    );

    let report = h.engine.status("sparse").await.unwrap();
    let seeded: Vec<&str> = report
        .corrections
        .iter()
        .filter(|c| c.kind == CorrectionKind::LandmarkSeeded)
        .map(|c| c.subject.as_str())
        .collect();
    assert_eq!(seeded, vec!["b", "c", "d"]);

    let state = h.engine.store().load("sparse").unwrap();
    for id in ["a", "b", "c", "d"] {
        assert!(state.landmark(id).is_some(), "landmark {} not persisted", id);
    }
    assert_eq!(state.landmark_state("a"), LandmarkState::Complete);
}

#[tokio::test]
async fn test_completion_is_never_reverted() {
    let h = harness();
    open(&h, "smith").await;
    complete(&h, "smith", "c").await;

    // Fact source now says the claim is missing
    h.facts.set_verified(CLAIM_QUERY, "smith", false);
    h.engine.status("smith").await.unwrap();
    h.engine.auto_verify_all("smith").await.unwrap();

    let state = h.engine.store().load("smith").unwrap();
    assert_eq!(state.landmark_state("c"), LandmarkState::Complete);
}

#[tokio::test]
async fn test_progress_stays_in_bounds() {
    let h = harness();
    open(&h, "smith").await;
    assert_eq!(h.engine.status("smith").await.unwrap().progress_percent, 0);

    complete(&h, "smith", "a").await;
    assert_eq!(h.engine.status("smith").await.unwrap().progress_percent, 25);

    for id in ["b", "c", "d"] {
        complete(&h, "smith", id).await;
    }
    assert_eq!(h.engine.status("smith").await.unwrap().progress_percent, 100);

    h.engine.advance("smith", "closed", true).await.unwrap_err();
    h.engine.advance("smith", "negotiation", false).await.unwrap();
    h.engine.advance("smith", "litigation", true).await.unwrap();
    h.engine.advance("smith", "closed", true).await.unwrap();
    let report = h.engine.status("smith").await.unwrap();
    assert_eq!(report.landmarks_total, 0);
    assert_eq!(report.progress_percent, 100);
    assert_eq!(report.next_phase, None);
}

#[tokio::test]
async fn test_non_linear_transition_uses_rule() {
    let h = harness();
    open(&h, "smith").await;

    let blocked = h.engine.advance("smith", "litigation", false).await;
    assert!(matches!(blocked, Err(WorkflowError::BlockedTransition { .. })));

    let record = h.engine.advance("smith", "litigation", true).await.unwrap();
    assert_eq!(record.rule.as_deref(), Some("Statute of limitations approaching"));

    let invalid = h.engine.advance("smith", "setup", true).await;
    assert!(matches!(invalid, Err(WorkflowError::InvalidTransition { .. })));
    let unknown = h.engine.advance("smith", "appeal", true).await;
    assert!(matches!(unknown, Err(WorkflowError::UnknownPhase(_))));
}

#[tokio::test]
async fn test_concurrent_status_corrects_once() {
    let h = harness();
    write_raw(
        &h,
        "legacy",
        r#"{ "case_id": "legacy", "phase": "unknown_phase", "landmarks": {} }"#,
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move { engine.status("legacy").await }));
    }

    let mut resets = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.phase, "setup");
        resets += report
            .corrections
            .iter()
            .filter(|c| c.kind == CorrectionKind::PhaseReset)
            .count();
    }
    assert_eq!(resets, 1);
}

#[tokio::test]
async fn test_malformed_and_missing_documents() {
    let h = harness();
    write_raw(&h, "broken", "{ not json");
    assert!(matches!(
        h.engine.status("broken").await,
        Err(WorkflowError::MalformedState { .. })
    ));

    assert!(h.engine.status("nobody").await.unwrap_err().is_not_found());
    assert!(matches!(
        h.engine.status("../escape").await,
        Err(WorkflowError::InvalidCaseId(_))
    ));
}

#[tokio::test]
async fn test_next_actions_prefer_automatable_internal_work() {
    let h = harness();
    open(&h, "smith").await;

    let report = h.engine.status("smith").await.unwrap();
    let first = &report.next_actions[0];
    assert_eq!(first.step, "c");
    assert!(first.can_automate);
    assert_eq!(first.tool.as_deref(), Some("claims_intake"));

    let external = report.next_actions.iter().find(|a| a.step == "b").unwrap();
    assert!(!external.can_automate);
    assert!(external.description.contains("client"));
}
