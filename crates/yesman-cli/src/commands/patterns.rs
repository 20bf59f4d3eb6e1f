use anyhow::Result;

use yesman_pilot::store::{LearnedPattern, PatternStore};
use yesman_types::AutomationConfig;

use crate::commands::DATETIME_FMT;

/// Run `yesman patterns`.
pub fn run(config: &AutomationConfig, filter: Option<&str>, limit: usize) -> Result<()> {
    let store = PatternStore::open(&config.store.path);
    let patterns = select(&store, filter, limit);

    if patterns.is_empty() {
        println!("No learned patterns in {}.", config.store.path.display());
        return Ok(());
    }

    let threshold = config.responder.confidence_threshold;
    println!(
        "{:<6} {:<6} {:<10} {:<20} SIGNATURE",
        "HITS", "CONF", "RESPONSE", "LAST USED"
    );
    println!("{}", "-".repeat(100));
    for p in &patterns {
        let marker = if p.confidence >= threshold { "*" } else { " " };
        println!(
            "{:<6} {:.3}{} {:<10} {:<20} {}",
            p.hit_count,
            p.confidence,
            marker,
            p.response_value,
            p.last_used_at.format(DATETIME_FMT),
            p.signature
        );
    }
    println!();
    println!("* used automatically (confidence >= {threshold})");
    Ok(())
}

/// Patterns to show: filtered by signature text, most used first.
fn select(store: &PatternStore, filter: Option<&str>, limit: usize) -> Vec<LearnedPattern> {
    match filter {
        Some(partial) => store
            .suggestions(partial, limit)
            .iter()
            .filter_map(|sig| store.get(sig))
            .collect(),
        None => {
            let mut patterns = store.snapshot();
            patterns.sort_by(|a, b| b.hit_count.cmp(&a.hit_count));
            patterns.truncate(limit);
            patterns
        }
    }
}
