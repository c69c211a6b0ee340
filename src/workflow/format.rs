//! Status report rendering
//!
//! Pure text rendering of a [`StatusReport`] for agents and terminals. Reads
//! nothing but the report, so the same report always renders the same text.

use super::status::sort_next_actions;
use crate::models::{Blocker, NextAction, Owner, StatusReport};
use std::fmt::Write;

const OWNERS: [Owner; 2] = [Owner::Internal, Owner::External];

pub fn format_report(report: &StatusReport) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, report: &StatusReport) -> std::fmt::Result {
    writeln!(out, "# Case Status: {} ({})", report.client_name, report.case_id)?;
    writeln!(out)?;

    writeln!(out, "## Phase")?;
    writeln!(
        out,
        "{} ({}): {}% complete ({}/{} landmarks)",
        report.phase_name,
        report.phase,
        report.progress_percent,
        report.completed.len(),
        report.landmarks_total
    )?;
    match &report.next_phase {
        Some(next) if report.can_advance() => writeln!(out, "Ready to advance to: {}", next)?,
        Some(next) => writeln!(out, "Next phase: {}", next)?,
        None => writeln!(out, "Final phase")?,
    }
    writeln!(out)?;

    writeln!(out, "## Completed")?;
    if report.completed.is_empty() {
        writeln!(out, "- (none)")?;
    }
    for id in &report.completed {
        writeln!(out, "- {}", id)?;
    }
    writeln!(out)?;

    writeln!(out, "## Blockers")?;
    if report.blockers.is_empty() {
        writeln!(out, "None")?;
    }
    for owner in OWNERS {
        let group: Vec<&Blocker> = report.blockers.iter().filter(|b| b.owner == owner).collect();
        if group.is_empty() {
            continue;
        }
        writeln!(out, "### {}", title(owner))?;
        for blocker in group {
            write!(
                out,
                "- [{}] {}: {}",
                if blocker.is_hard() { "HARD" } else { "soft" },
                blocker.id,
                blocker.description
            )?;
            if let Some(party) = &blocker.waiting_on {
                write!(out, " (waiting on {})", party)?;
            }
            writeln!(out)?;
        }
    }
    writeln!(out)?;

    writeln!(out, "## Next Actions")?;
    if report.next_actions.is_empty() {
        writeln!(out, "None")?;
    }
    let mut actions: Vec<NextAction> = report.next_actions.clone();
    sort_next_actions(&mut actions);
    for owner in OWNERS {
        let group: Vec<&NextAction> = actions.iter().filter(|a| a.owner == owner).collect();
        if group.is_empty() {
            continue;
        }
        writeln!(out, "### {}", title(owner))?;
        for (i, action) in group.iter().enumerate() {
            let mode = match (&action.tool, action.can_automate) {
                (Some(tool), true) => format!("auto: {}", tool),
                _ => "manual".to_string(),
            };
            writeln!(out, "{}. [{}] {} ({})", i + 1, mode, action.description, action.step)?;
            if !action.can_automate {
                writeln!(out, "   Manual: {}", action.manual_fallback)?;
            }
        }
    }

    if !report.corrections.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Corrections Applied")?;
        for correction in &report.corrections {
            writeln!(out, "- {}: {}", correction.subject, correction.detail)?;
        }
    }

    Ok(())
}

fn title(owner: Owner) -> &'static str {
    match owner {
        Owner::Internal => "Internal",
        Owner::External => "External",
    }
}
