//! Status computation
//!
//! A status pass has two halves:
//!
//! 1. **Synchronise** the stored state with configuration and the fact
//!    source: reset an unknown phase, seed missing landmark entries, and
//!    auto-verify open landmarks. Every change is returned as a
//!    [`Correction`] and left on the state for the caller to persist.
//! 2. **Derive** the report (progress, completed items, blockers, next
//!    actions) from the synchronised state. This half is pure.

use crate::automation::ToolCatalog;
use crate::models::status::progress_percent;
use crate::models::{
    Blocker, CaseState, Correction, CorrectionKind, LandmarkDefinition, LandmarkState,
    LandmarkStatus, NextAction, Owner, PhaseDefinition, PhaseHistoryEntry, StatusReport,
    WorkflowDefinition,
};
use crate::verify::LandmarkVerifier;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct StatusComputer {
    workflow: Arc<WorkflowDefinition>,
    verifier: LandmarkVerifier,
    tools: ToolCatalog,
}

impl StatusComputer {
    pub fn new(workflow: Arc<WorkflowDefinition>, verifier: LandmarkVerifier, tools: ToolCatalog) -> Self {
        Self {
            workflow,
            verifier,
            tools,
        }
    }

    pub fn verifier(&self) -> &LandmarkVerifier {
        &self.verifier
    }

    /// Synchronise `state` and derive its report
    ///
    /// The report's `corrections` lists every change made to `state`; when it
    /// is non-empty the caller must save the state.
    pub async fn compute_status(&self, state: &mut CaseState) -> StatusReport {
        let now = Utc::now();
        let mut corrections = state.take_repairs();
        corrections.extend(self.synchronize(state, now));

        for landmark_id in self.verifier.auto_verify(state, now).await {
            corrections.push(Correction::new(
                CorrectionKind::AutoVerified,
                landmark_id,
                "confirmed by fact source; marked complete",
            ));
        }

        self.derive(state, corrections)
    }

    /// Reset an unknown phase and seed missing landmark entries
    pub fn synchronize(&self, state: &mut CaseState, now: DateTime<Utc>) -> Vec<Correction> {
        let mut corrections = Vec::new();

        if self.workflow.phase(&state.phase).is_none() {
            let first = self.workflow.first_phase();
            let detail = if state.phase.trim().is_empty() {
                format!("phase missing; set to '{}'", first.id)
            } else {
                format!("'{}' is not a configured phase; reset to '{}'", state.phase, first.id)
            };
            tracing::warn!(case_id = %state.case_id, phase = %state.phase, reset_to = %first.id, "resetting unknown phase");

            if let Some(open) = state
                .phase_history
                .iter_mut()
                .rev()
                .find(|e| e.exited_at.is_none())
            {
                open.exited_at = Some(now);
            }
            state.phase_history.push(PhaseHistoryEntry {
                phase: first.id.clone(),
                entered_at: now,
                exited_at: None,
            });
            if !state.phase.trim().is_empty() {
                state.previous_phase = Some(std::mem::take(&mut state.phase));
            }
            state.phase = first.id.clone();
            state.phase_entered_at = Some(now);
            // Entering a phase seeds its landmarks; that is part of the reset
            let seeded = seed_phase(state, first, now);
            let detail = if seeded.is_empty() {
                detail
            } else {
                format!("{} (seeded {})", detail, seeded.join(", "))
            };
            corrections.push(Correction::new(CorrectionKind::PhaseReset, "phase", detail));
            return corrections;
        }

        if let Some(phase) = self.workflow.phase(&state.phase) {
            for landmark_id in seed_phase(state, phase, now) {
                corrections.push(Correction::new(
                    CorrectionKind::LandmarkSeeded,
                    landmark_id,
                    "no status entry; seeded as not_started",
                ));
            }
        }

        corrections
    }

    /// Build the report from an already-synchronised state
    pub fn derive(&self, state: &CaseState, corrections: Vec<Correction>) -> StatusReport {
        let phase = self
            .workflow
            .phase(&state.phase)
            .unwrap_or_else(|| self.workflow.first_phase());

        let mut completed = Vec::new();
        let mut blockers = Vec::new();
        let mut next_actions = Vec::new();

        for landmark in &phase.landmarks {
            let status = state.landmark(&landmark.id);
            if status.is_some_and(LandmarkStatus::is_done) {
                completed.push(landmark.id.clone());
                continue;
            }

            blockers.push(Blocker {
                id: landmark.id.clone(),
                description: landmark.purpose().to_string(),
                owner: landmark.owner,
                waiting_on: landmark.waiting_on.clone(),
                kind: landmark.blocker,
            });
            next_actions.push(self.next_action(phase, landmark, status));
        }

        sort_next_actions(&mut next_actions);

        StatusReport {
            case_id: state.case_id.clone(),
            client_name: state.client_display_name().to_string(),
            phase: phase.id.clone(),
            phase_name: phase.display_name().to_string(),
            next_phase: self.workflow.next_phase(&phase.id).map(|p| p.id.clone()),
            progress_percent: progress_percent(completed.len(), phase.landmarks.len()),
            landmarks_total: phase.landmarks.len(),
            completed,
            blockers,
            next_actions,
            corrections,
        }
    }

    fn next_action(
        &self,
        phase: &PhaseDefinition,
        landmark: &LandmarkDefinition,
        status: Option<&LandmarkStatus>,
    ) -> NextAction {
        let tool_available = landmark
            .tool
            .as_deref()
            .is_some_and(|t| self.tools.is_available(t));

        NextAction {
            description: action_description(landmark, status),
            owner: landmark.owner,
            workflow: phase.id.clone(),
            step: landmark.id.clone(),
            tool: landmark.tool.clone(),
            // Work waiting on an outside party cannot be pushed by a tool
            can_automate: tool_available && landmark.owner == Owner::Internal,
            tool_available,
            manual_fallback: landmark.fallback_text(),
        }
    }
}

/// Internal before external, automatable first, otherwise workflow order
pub fn sort_next_actions(actions: &mut [NextAction]) {
    actions.sort_by_key(|a| (a.owner, !a.can_automate));
}

/// Insert not_started entries for a phase's missing landmarks
pub(crate) fn seed_phase(state: &mut CaseState, phase: &PhaseDefinition, now: DateTime<Utc>) -> Vec<String> {
    phase
        .landmarks
        .iter()
        .filter(|l| state.ensure_landmark(&l.id, now))
        .map(|l| l.id.clone())
        .collect()
}

fn action_description(landmark: &LandmarkDefinition, status: Option<&LandmarkStatus>) -> String {
    let purpose = landmark.purpose();
    let state = status.map(|s| s.status).unwrap_or_default();

    if let Some(status) = status {
        if status.sub_steps_done(&landmark.sub_steps) {
            return format!("Mark '{}' complete; all sub-steps are done ({})", landmark.id, purpose);
        }
    }

    let remaining: Vec<&str> = landmark
        .sub_steps
        .iter()
        .filter(|s| !status.and_then(|st| st.sub_steps.get(*s)).copied().unwrap_or(false))
        .map(String::as_str)
        .collect();

    let mut text = match (landmark.owner, &landmark.waiting_on, state) {
        (Owner::External, Some(party), _) => format!("Waiting on {}: {}", party, purpose),
        (_, _, LandmarkState::InProgress) => format!("Continue: {}", purpose),
        _ => purpose.to_string(),
    };
    if !remaining.is_empty() && remaining.len() < landmark.sub_steps.len() {
        text.push_str(&format!(" (remaining: {})", remaining.join(", ")));
    }
    text
}
