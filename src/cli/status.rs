use crate::models::StatusReport;
use crate::workflow::format_report;
use crate::{Result, WorkflowError};
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub async fn run(project_root: &Path, case_id: &str, json: bool) -> Result<()> {
    let engine = super::load_engine(project_root)?;

    let report = match engine.status(case_id).await {
        Ok(report) => report,
        Err(WorkflowError::NotFound { case_id }) => {
            if json {
                println!("{}", json!({ "error": "case_not_found", "case_id": case_id }));
            } else {
                println!("{}", format!("Case '{}' not found", case_id).red());
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Status for every case in the store
pub async fn run_all(project_root: &Path, json: bool) -> Result<()> {
    let engine = Arc::new(super::load_engine(project_root)?);
    let case_ids = engine.store().list_cases()?;
    if case_ids.is_empty() {
        println!("{}", "No cases found. Run 'casetrack init <case>' first.".yellow());
        return Ok(());
    }

    let results = engine.status_many(case_ids).await;

    if json {
        let items: Vec<_> = results
            .into_iter()
            .map(|(case_id, result)| match result {
                Ok(report) => json!({ "case_id": case_id, "report": report }),
                Err(e) => json!({ "case_id": case_id, "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    for (case_id, result) in results {
        match result {
            Ok(report) => {
                let progress = format!("{:>3}%", report.progress_percent);
                let blocked = report.hard_blockers().count();
                let marker = if blocked == 0 {
                    "ready".green()
                } else {
                    format!("{} hard blocker(s)", blocked).red()
                };
                println!(
                    "   • {:<24} {:<16} {} {}",
                    case_id,
                    report.phase,
                    progress.cyan(),
                    marker
                );
            }
            Err(e) => {
                eprintln!("{}", format!("⚠️  {}: {}", case_id, e).yellow());
            }
        }
    }

    Ok(())
}

/// Formatted report with headings and hard blockers highlighted
fn print_report(report: &StatusReport) {
    for line in format_report(report).lines() {
        if line.starts_with("# ") {
            println!("{}", line.cyan().bold());
        } else if line.starts_with("## ") {
            println!("{}", line.green().bold());
        } else if line.starts_with("### ") {
            println!("{}", line.bold());
        } else if line.contains("[HARD]") {
            println!("{}", line.red());
        } else if line.starts_with("Ready to advance") {
            println!("{}", line.green());
        } else {
            println!("{}", line);
        }
    }
}
