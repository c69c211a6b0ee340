use crate::models::CasetrackConfig;
use crate::workflow::CaseInit;
use crate::Result;
use colored::Colorize;
use std::path::Path;

pub async fn run(
    project_root: &Path,
    case_id: &str,
    client: Option<String>,
    incident_date: Option<String>,
    phase: Option<String>,
) -> Result<()> {
    // First case in a project: write the default config so it can be edited
    let config_path = project_root.join(crate::models::config::CONFIG_PATH);
    if !config_path.exists() {
        CasetrackConfig::default().save(project_root)?;
        println!(
            "{}",
            format!("Created {}", config_path.display()).bright_black()
        );
    }

    let engine = super::load_engine(project_root)?;
    let state = engine
        .init_case(
            case_id,
            CaseInit {
                client_name: client,
                incident_date,
                phase,
            },
        )
        .await?;

    println!(
        "{}",
        format!("✅ Opened case '{}' in phase {}", state.case_id, state.phase).green()
    );
    println!("   Client:    {}", state.client_display_name());
    println!("   Landmarks: {}", state.landmarks.len());

    Ok(())
}
