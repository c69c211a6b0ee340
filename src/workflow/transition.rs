//! Phase transition rules
//!
//! A case may move to the next phase in the configured ordering, or along an
//! explicit non-linear rule. Hard blockers in the current phase stop the move
//! unless forced; a forced move records every blocker it overrode.

use super::status::seed_phase;
use crate::error::{WorkflowError, WorkflowResult};
use crate::models::{CaseState, PhaseHistoryEntry, StatusReport, TransitionRecord, WorkflowDefinition};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct PhaseTransitionController {
    workflow: Arc<WorkflowDefinition>,
}

impl PhaseTransitionController {
    pub fn new(workflow: Arc<WorkflowDefinition>) -> Self {
        Self { workflow }
    }

    /// Check the target against the ordering and non-linear rules
    pub fn check_target(&self, current: &str, target: &str) -> WorkflowResult<Option<String>> {
        if self.workflow.phase(target).is_none() {
            return Err(WorkflowError::UnknownPhase(target.to_string()));
        }
        if current == target {
            return Err(WorkflowError::InvalidTransition {
                from: current.to_string(),
                to: target.to_string(),
                reason: "case is already in this phase".to_string(),
            });
        }

        if self.workflow.next_phase(current).is_some_and(|p| p.id == target) {
            return Ok(None);
        }
        if let Some(rule) = self.workflow.transition_rule(current, target) {
            return Ok(Some(
                rule.reason
                    .clone()
                    .unwrap_or_else(|| format!("{} -> {}", rule.from, rule.to)),
            ));
        }

        let reason = match self.workflow.next_phase(current) {
            Some(next) => format!("the next phase is '{}'", next.id),
            None => format!("'{}' is the last phase", current),
        };
        Err(WorkflowError::InvalidTransition {
            from: current.to_string(),
            to: target.to_string(),
            reason,
        })
    }

    /// Decide the move from a freshly computed report, without committing it
    pub fn plan(
        &self,
        report: &StatusReport,
        target: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> WorkflowResult<TransitionRecord> {
        let rule = self.check_target(&report.phase, target)?;

        let hard: Vec<_> = report.hard_blockers().cloned().collect();
        if !hard.is_empty() && !force {
            return Err(WorkflowError::BlockedTransition {
                case_id: report.case_id.clone(),
                from: report.phase.clone(),
                to: target.to_string(),
                blockers: hard,
            });
        }

        let mut record = TransitionRecord::new(&report.case_id, &report.phase, target, now);
        record.forced = force;
        record.overridden_blockers = hard.into_iter().map(|b| b.id).collect();
        record.open_soft_blockers = report
            .blockers
            .iter()
            .filter(|b| !b.is_hard())
            .map(|b| b.id.clone())
            .collect();
        record.rule = rule;
        Ok(record)
    }

    /// Apply a planned transition to the state
    ///
    /// Closes the current phase-history entry, enters the new phase, keeps
    /// the old phase name for audit, seeds the new phase's landmarks and
    /// appends the record. Returns the landmarks that were seeded.
    pub fn commit(&self, state: &mut CaseState, record: &TransitionRecord) -> Vec<String> {
        let now = record.at;

        if let Some(open) = state
            .phase_history
            .iter_mut()
            .rev()
            .find(|e| e.exited_at.is_none())
        {
            open.exited_at = Some(now);
        }
        state.phase_history.push(PhaseHistoryEntry {
            phase: record.to_phase.clone(),
            entered_at: now,
            exited_at: None,
        });

        state.previous_phase = Some(record.from_phase.clone());
        state.phase = record.to_phase.clone();
        state.phase_entered_at = Some(now);

        let seeded = match self.workflow.phase(&record.to_phase) {
            Some(phase) => seed_phase(state, phase, now),
            None => Vec::new(),
        };
        state.transitions.push(record.clone());
        seeded
    }
}
