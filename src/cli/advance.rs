use crate::{Result, WorkflowError};
use colored::Colorize;
use std::path::Path;

pub async fn run(project_root: &Path, case_id: &str, phase: &str, force: bool, json: bool) -> Result<()> {
    let engine = super::load_engine(project_root)?;

    let record = match engine.advance(case_id, phase, force).await {
        Ok(record) => record,
        Err(WorkflowError::BlockedTransition {
            case_id,
            from,
            to,
            blockers,
        }) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "error": "blocked_transition",
                        "case_id": case_id,
                        "from": from,
                        "to": to,
                        "blockers": blockers,
                    })
                );
            } else {
                println!(
                    "{}",
                    format!("⛔ Cannot advance '{}' from {} to {}", case_id, from, to)
                        .red()
                        .bold()
                );
                for blocker in &blockers {
                    println!(
                        "   • {} ({}): {}",
                        blocker.id,
                        blocker.owner.label(),
                        blocker.description
                    );
                }
                println!(
                    "{}",
                    "Resolve these landmarks, or pass --force to override.".yellow()
                );
            }
            anyhow::bail!("{} hard blocker(s) unresolved", blockers.len());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!(
        "{}",
        format!("✅ {} advanced: {} → {}", case_id, record.from_phase, record.to_phase).green()
    );
    if let Some(rule) = &record.rule {
        println!("   Rule:       {}", rule);
    }
    if record.was_overridden() {
        println!(
            "{}",
            format!("   Overridden: {}", record.overridden_blockers.join(", ")).yellow()
        );
    }
    if !record.open_soft_blockers.is_empty() {
        println!("   Still open: {}", record.open_soft_blockers.join(", "));
    }

    Ok(())
}
