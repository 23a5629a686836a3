use std::sync::Arc;

use mompick::{
    app_state::AppState,
    config::Config,
    facility::Domain,
    loader::analyze,
    region::RegionCode,
};

/// usage: prewarm-regions [domain] [code...]
///
/// Codes default to `PREWARM_REGIONS` (comma separated); without a domain
/// every domain is warmed.
#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("failed to read configuration");
    let _guard = mompick::tracing::setup_tracing(&config);

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let domains = match args.first().map(|a| a.parse::<Domain>()) {
        Some(Ok(domain)) => {
            args.remove(0);
            vec![domain]
        }
        _ => Domain::ALL.to_vec(),
    };

    if args.is_empty() {
        args = std::env::var("PREWARM_REGIONS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    let codes: Vec<RegionCode> = args
        .iter()
        .map(|a| a.parse().expect("invalid region code"))
        .collect();
    if codes.is_empty() {
        eprintln!("no region codes given");
        std::process::exit(1);
    }

    let state = AppState::from_config(config).expect("failed to set up app state");

    for domain in domains {
        let Some(loader) = state.loader(domain).map(Arc::clone) else {
            continue;
        };

        println!("prewarming {domain} for {} regions", codes.len());
        let results = loader.load_many(&codes).await;
        let summary = analyze(results.values());

        for code in &codes {
            if let Some(res) = results.get(code).filter(|r| r.error.is_some()) {
                println!("  {code}: {}", res.error.as_deref().unwrap_or_default());
            }
        }
        println!(
            "  {} from cache, {} from api, {} errors, {} items, {:.0}ms avg",
            summary.cache_hits,
            summary.api_calls,
            summary.errors,
            summary.total_items,
            summary.average_load_time_ms,
        );
    }
}
