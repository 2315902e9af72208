//! `gemledger <script.json> [config.toml]`
//!
//! Replays a JSON script of inventory operations against an in-memory ledger
//! and prints the resulting warehouse valuations and audits as JSON.

mod script;

use std::path::Path;

use anyhow::{Context, bail};

use gemledger_infra::{EngineConfig, InMemoryInventoryEngine};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(script_path) = args.next() else {
        bail!("usage: gemledger <script.json> [config.toml]");
    };

    let config = match args.next() {
        Some(path) => EngineConfig::load_from_path(Path::new(&path))
            .with_context(|| format!("loading configuration from {path}"))?,
        None => EngineConfig::load().context("loading configuration")?,
    };
    gemledger_observability::init_with_filter(&config.log.filter);

    let raw = std::fs::read_to_string(&script_path)
        .with_context(|| format!("reading script {script_path}"))?;
    let script: script::Script =
        serde_json::from_str(&raw).with_context(|| format!("parsing script {script_path}"))?;

    let engine = InMemoryInventoryEngine::in_memory(&config);
    let report = script::run(&engine, &script)?;
    tracing::info!(
        operations = script.ops.len(),
        warehouses = report.warehouses.len(),
        "script applied"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
