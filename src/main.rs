use std::sync::Arc;

use variant_graph_engine::config::AppConfig;
use variant_graph_engine::logic::ConsistencyEngine;
use variant_graph_engine::seed::{self, Snapshot};
use variant_graph_engine::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    use env_logger::Builder;
    Builder::new().filter_level(config.log_level()).init();

    println!("vge-audit: variant graph consistency audit");
    println!(
        "Modes: classic={} graph={}, circular paths {} (max {} steps)",
        config.engine.modes.classic,
        config.engine.modes.graph,
        if config.engine.allow_circular { "allowed" } else { "rejected" },
        config.engine.max_path_steps
    );

    // Replay the given snapshot, or the built-in demo data set
    let snapshot = match std::env::args().nth(1) {
        Some(path) => {
            println!("Reading snapshot {}", path);
            Snapshot::from_json(&std::fs::read_to_string(&path)?)?
        }
        None => {
            println!("No snapshot given, replaying the demo data set");
            seed::demo_snapshot()
        }
    };

    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(snapshot.catalog());
    let engine = ConsistencyEngine::open(store, catalog, config.engine.clone()).await?;

    let report = seed::replay(&engine, snapshot).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        println!("{} records rejected", report.rejections.len());
        std::process::exit(1);
    }
    println!("All {} records accepted", report.accepted);

    Ok(())
}
