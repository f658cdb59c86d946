//! `warden status`: store contents against the tier budgets.

use super::{build_engine, open_store};
use warden_config::AppConfig;
use warden_curation::SweepPass;

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&config.store).await?;
    let engine = build_engine(&config, store.entries.clone(), None)?;
    let policy = engine.policy();

    println!("Warden Status");
    println!("==================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Store:        {}", store.entries.name());
    if config.store.backend == "sqlite" {
        println!("  Database:     {}", config.store.resolved_path().display());
    }
    println!("  Base cycle:   {} min", config.scheduler.base_cycle_minutes);
    println!();

    println!("  {:<8} {:>8} {:>8}", "Tier", "Entries", "Budget");
    for (tier, count) in engine.tier_counts().await? {
        let budget = policy
            .tier_max_entries(tier)
            .map_or_else(|| "-".to_string(), |max| max.to_string());
        let marker = match policy.tier_max_entries(tier) {
            Some(max) if count > max => "  over budget",
            _ => "",
        };
        println!("  {:<8} {:>8} {:>8}{marker}", tier.as_str(), count, budget);
    }
    println!();

    if config.curation.enabled {
        println!("  Curation passes (owner '{}'):", config.curation.owner);
        for pass in SweepPass::ALL {
            println!(
                "    {:<9} every {} min",
                pass.as_str(),
                config.scheduler.base_cycle_minutes * pass.cycle_multiple()
            );
        }
    } else {
        println!("  Curation:     disabled");
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("\n  No config file at {}; using defaults", config_path.display());
    }

    Ok(())
}
