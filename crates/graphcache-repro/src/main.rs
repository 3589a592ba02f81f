#![cfg_attr(test, allow(unused_crate_dependencies))]

use anyhow::Context;
use clap::crate_version;
use tokio::runtime;

use self::scenario::Scenario;

mod args;
mod logging;
mod scenario;

const THREAD_NAME: &str = "graphcache-repro";

fn main() -> anyhow::Result<()> {
    let args = self::args::parse();
    logging::init(&args);

    let crate_version = crate_version!();
    tracing::info!("graphcache-repro {crate_version}");

    let config = args.config_source()?;
    let scenario = Scenario::from_json(&args.scenario_source()?)?;

    let report = runtime()?.block_on(scenario::replay(&config, scenario))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("could not serialize the report")?
    );

    Ok(())
}

/// Increments are applied one at a time, a single thread is all the replay needs.
pub(crate) fn runtime() -> anyhow::Result<runtime::Runtime> {
    let runtime = runtime::Builder::new_current_thread()
        .thread_name(THREAD_NAME)
        .build()?;

    Ok(runtime)
}
