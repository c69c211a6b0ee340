use crate::models::LandmarkState;
use crate::workflow::LandmarkUpdate;
use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Parse `name=true|false` (bare `name` means true)
pub fn parse_step(arg: &str) -> Result<(String, bool)> {
    let (name, value) = match arg.split_once('=') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (arg.trim(), "true"),
    };
    if name.is_empty() {
        anyhow::bail!("Invalid sub-step '{}': expected NAME=true|false", arg);
    }
    let done = match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "done" => true,
        "false" | "no" | "0" => false,
        _ => anyhow::bail!("Invalid sub-step value '{}': expected true or false", value),
    };
    Ok((name.to_string(), done))
}

pub async fn run(
    project_root: &Path,
    case_id: &str,
    landmark_id: &str,
    status: Option<LandmarkState>,
    steps: &[String],
    note: Option<String>,
) -> Result<()> {
    if status.is_none() && steps.is_empty() && note.is_none() {
        anyhow::bail!("Nothing to update: pass --status, --step or --note");
    }

    let sub_steps = steps
        .iter()
        .map(|s| parse_step(s))
        .collect::<Result<Vec<_>>>()?;

    let engine = super::load_engine(project_root)?;
    let updated = engine
        .update_landmark(
            case_id,
            landmark_id,
            LandmarkUpdate {
                status,
                sub_steps,
                note,
            },
        )
        .await?;

    println!(
        "{}",
        format!("✅ {} / {}: {}", case_id, landmark_id, updated.status).green()
    );
    for (step, done) in &updated.sub_steps {
        println!("   [{}] {}", if *done { "x" } else { " " }, step);
    }

    Ok(())
}
