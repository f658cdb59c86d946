//! `warden sweep <pass>`: run one curation pass now.

use super::{build_engine, open_store};
use warden_config::AppConfig;
use warden_curation::SweepPass;

pub async fn run(
    config: AppConfig,
    pass: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pass: SweepPass = pass.parse()?;
    let store = open_store(&config.store).await?;
    let engine = build_engine(&config, store.entries, None)?;

    let report = engine.run(pass).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Curation pass: {pass}");
    println!("─────────────────────────────────────");
    if report.skipped {
        println!("  Skipped: a previous run of this pass is still in progress");
        return Ok(());
    }
    println!("  Promoted:  {}", report.promoted);
    println!("  Demoted:   {}", report.demoted);
    println!("  Archived:  {}", report.archived);
    println!("  Deleted:   {}", report.deleted);
    println!("  Purged:    {}", report.purged);
    println!("  Decayed:   {}", report.decayed);
    println!("  Rescored:  {}", report.rescored);
    if report.errors > 0 {
        println!("  Errors:    {} (see log)", report.errors);
    }
    Ok(())
}
