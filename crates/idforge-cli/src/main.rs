#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use clap::Parser;
use config::{AppConfig, CliArgs, Strategy};
use idforge::{
    CounterIdGenerator, LocalIdGenerator, MemoryCoordinator, MemoryScriptStore,
    SequenceIdGenerator,
};
use telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let ids = match config.strategy {
        Strategy::Local => local_ids(&config)?,
        Strategy::Counter => counter_ids(&config).await?,
        Strategy::Sequence => sequence_ids(&config).await?,
    };
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

fn log_startup_info(_config: &AppConfig) {
    #[cfg(feature = "tracing")]
    if _config.in_process && _config.strategy != Strategy::Local {
        tracing::warn!(
            strategy = ?_config.strategy,
            "using the in-process backend; counters and sequence nodes start fresh on every \
             run, so these IDs are not unique across runs"
        );
    }
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Generating IDs with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Generating {} IDs with the {:?} strategy",
            _config.count,
            _config.strategy
        );
    }
}

fn local_ids(config: &AppConfig) -> anyhow::Result<Vec<String>> {
    let generator = LocalIdGenerator::new(config.local.clone())?;
    let ids = generator.next_unique_ids(config.count)?;
    if !config.decode {
        return Ok(ids);
    }

    ids.into_iter()
        .map(|id| {
            let decoded = generator.decode(id.parse()?);
            Ok::<_, anyhow::Error>(format!(
                "{id}\ttimestamp_ms={} datacenter_id={} machine_id={} sequence={}",
                decoded.timestamp_ms, decoded.datacenter_id, decoded.machine_id, decoded.sequence
            ))
        })
        .collect()
}

// Both shared-backend strategies run against the in-process backends, which
// configuration only allows with IDFORGE_IN_PROCESS set.
async fn counter_ids(config: &AppConfig) -> anyhow::Result<Vec<String>> {
    let generator = CounterIdGenerator::new(MemoryScriptStore::new(), config.counter.clone())?;
    let ids = generator
        .next_unique_ids_for(
            &config.name,
            &config.key,
            config.counter.step,
            config.counter.length,
            config.count,
        )
        .await?;
    Ok(ids)
}

async fn sequence_ids(config: &AppConfig) -> anyhow::Result<Vec<String>> {
    let generator = SequenceIdGenerator::connect(
        MemoryCoordinator::new(),
        config.coordination.clone(),
        config.start_timeout,
    )
    .await?;

    let result = generator
        .next_sequence_ids_for(&config.name, &config.key, config.count)
        .await;
    if let Err(_e) = generator.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Error during session shutdown: {:?}", _e);
    }
    Ok(result?)
}
