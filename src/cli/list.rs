use crate::Result;
use colored::Colorize;
use std::path::Path;

pub fn run(project_root: &Path) -> Result<()> {
    let engine = super::load_engine(project_root)?;
    let store = engine.store();

    println!("{}", "📋 Listing cases...".cyan());

    let case_ids = store.list_cases()?;
    if case_ids.is_empty() {
        println!("{}", "No cases found. Run 'casetrack init <case>' first.".yellow());
        return Ok(());
    }

    println!("\n{}", "Cases:".green().bold());
    for case_id in case_ids {
        // Raw stored view; no synchronisation happens here
        match store.load(&case_id) {
            Ok(state) => {
                let phase = if state.phase.is_empty() { "?" } else { state.phase.as_str() };
                println!(
                    "   • {:<24} {:<16} {}",
                    case_id,
                    phase,
                    state.client_display_name().bright_black()
                );
            }
            Err(e) => println!("   • {:<24} {}", case_id, format!("unreadable: {}", e).red()),
        }
    }

    Ok(())
}
