//! `brane-make`: build and run the BraneScript notebook environment.

use anyhow::Context;
use brane_make::{Builder, Cli, MakeConfig, ProcessRunner, table};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let list = cli.list;
    let requested = cli.targets.clone();
    let config = MakeConfig::try_from(cli).context("Invalid build configuration")?;
    let targets = table::targets(&config).context("Failed to set up the target table")?;
    let builder = Builder::new(targets, ProcessRunner, config.options);

    if list {
        let width = builder.targets().iter().map(|t| t.id.len()).max().unwrap_or(0);
        for target in builder.targets() {
            if target.deps.is_empty() {
                println!("{:width$}  {}", target.id, target.description);
            } else {
                println!(
                    "{:width$}  {} (after: {})",
                    target.id,
                    target.description,
                    target.deps.join(", ")
                );
            }
        }
        return Ok(());
    }

    tracing::debug!(
        arch = %config.options.arch,
        os = %config.options.os,
        dry_run = config.options.dry_run,
        force = config.options.force,
        "Starting build"
    );
    for id in &requested {
        let changed = builder
            .build(id)
            .await
            .with_context(|| format!("Failed to build target '{id}'"))?;
        if changed {
            tracing::info!(target = %id, "Done");
        } else {
            tracing::info!(target = %id, "Nothing to do");
        }
    }
    Ok(())
}
