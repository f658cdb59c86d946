//! `warden budget`: the spending ledger's effective settings.
//!
//! Live spend lives in the daemon's ledger; this command only reads the
//! configuration, so it reports ceilings and never availability.

use super::build_ledger;
use std::fmt::Write;
use warden_budget::BudgetError;
use warden_config::AppConfig;

pub fn run(config: AppConfig, owner: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    print!("{}", render(&config, owner)?);
    Ok(())
}

fn render(config: &AppConfig, owner: Option<&str>) -> Result<String, BudgetError> {
    let ledger = build_ledger(&config.budget, None)?;
    let settings = ledger.settings();
    let mut out = String::new();

    if let Some(owner) = owner {
        let max = ledger.summary(owner).max_budget;
        let source = if config.budget.overrides.contains_key(owner) {
            "override"
        } else {
            "default"
        };
        let _ = writeln!(out, "Budget settings for '{owner}'");
        let _ = writeln!(out, "─────────────────────────────────────");
        let _ = writeln!(out, "  Ceiling:    {max:.2} ({source})");
        let _ = writeln!(out, "  Window:     {}h", settings.window.num_hours());
        return Ok(out);
    }

    let _ = writeln!(out, "Spending Ledger Settings");
    let _ = writeln!(out, "─────────────────────────────────────");
    let _ = writeln!(out, "  Default ceiling:    {:.2}", settings.default_max_budget);
    let _ = writeln!(out, "  Window:             {}h", settings.window.num_hours());
    let _ = writeln!(
        out,
        "  Stale reservations: released after {} min",
        settings.stale_reservation_timeout.num_minutes()
    );

    let mut overrides: Vec<(&String, &f64)> = config.budget.overrides.iter().collect();
    overrides.sort_by(|a, b| a.0.cmp(b.0));
    if !overrides.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Ceiling overrides:");
        for (owner, max) in overrides {
            let _ = writeln!(out, "    {owner:<20} {max:.2}");
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use warden_config::BudgetConfig;

    fn config() -> AppConfig {
        AppConfig {
            budget: BudgetConfig {
                default_max_budget: 500.0,
                overrides: HashMap::from([("researcher".to_string(), 50.0)]),
                ..BudgetConfig::default()
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn owner_view_shows_ceiling_not_spend() {
        let out = render(&config(), Some("researcher")).unwrap();
        assert!(out.contains("Ceiling:    50.00 (override)"));
        assert!(!out.contains("Available"));

        let out = render(&config(), Some("writer")).unwrap();
        assert!(out.contains("Ceiling:    500.00 (default)"));
    }

    #[test]
    fn overview_lists_overrides() {
        let out = render(&config(), None).unwrap();
        assert!(out.contains("Default ceiling:    500.00"));
        assert!(out.contains("researcher"));
        assert!(out.contains("Window:             24h"));
    }
}
