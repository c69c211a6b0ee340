use crate::Result;
use colored::Colorize;
use std::path::Path;

/// Print the configured phases, their landmarks and non-linear transitions
pub fn run(project_root: &Path) -> Result<()> {
    let engine = super::load_engine(project_root)?;
    let workflow = engine.workflow();

    for (index, phase) in workflow.phases.iter().enumerate() {
        println!(
            "{} {} {}",
            format!("{}.", index + 1).bright_black(),
            phase.display_name().cyan().bold(),
            format!("({})", phase.id).bright_black()
        );
        for landmark in &phase.landmarks {
            let kind = if landmark.blocker.is_hard() {
                "hard".red()
            } else {
                "soft".yellow()
            };
            let auto = if landmark.verification_query().is_some() {
                " [auto-verify]"
            } else {
                ""
            };
            println!(
                "   • {:<28} {:<5} {:<8}{}",
                landmark.id,
                kind,
                landmark.owner.label(),
                auto
            );
        }
    }

    if !workflow.transitions.is_empty() {
        println!("\n{}", "Transitions:".green().bold());
        for rule in &workflow.transitions {
            match &rule.reason {
                Some(reason) => println!("   {} → {}: {}", rule.from, rule.to, reason),
                None => println!("   {} → {}", rule.from, rule.to),
            }
        }
    }

    Ok(())
}
