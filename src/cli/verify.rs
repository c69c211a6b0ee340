use crate::Result;
use colored::Colorize;
use std::path::Path;

pub async fn run(project_root: &Path, case_id: &str) -> Result<()> {
    let engine = super::load_engine(project_root)?;
    let changed = engine.auto_verify_all(case_id).await?;

    if changed.is_empty() {
        println!("{}", "No landmarks newly verified.".yellow());
    } else {
        println!("{}", format!("Verified {} landmark(s):", changed.len()).green().bold());
        for id in changed {
            println!("   ✓ {}", id);
        }
    }

    Ok(())
}
