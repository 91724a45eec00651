// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Interchain Query Relayer Binary.
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use directories_next::ProjectDirs;
use futures::FutureExt;
use structopt::StructOpt;
use tokio::signal::unix;

use icq_relayer::context::RelayerContext;
use icq_relayer::store::SledStore;
use icq_relayer::{config, service};

/// Package identifier, where the default database is placed when the
/// configuration does not pin a storage path.
const PACKAGE_ID: [&str; 3] = ["tools", "icq", "icq-relayer"];

/// The Interchain Query Relayer Command-line tool
///
/// Start the relayer from a config file:
///
///     $ icq-relayer -vvv -c <CONFIG_FILE_PATH>
#[derive(paw_structopt::StructOpt, StructOpt)]
#[structopt(name = "ICQ Relayer")]
struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    verbose: i32,
    /// File that contains configration.
    #[structopt(
        short = "c",
        long = "config-filename",
        value_name = "PATH",
        parse(from_os_str)
    )]
    config_filename: PathBuf,
    /// Create the database store in a temporary directory, deleted when the
    /// process exits.
    #[structopt(long)]
    tmp: bool,
}

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::trace!("Failed to load .env file: {}", e);
        }
    }

    let config = config::load(&args.config_filename)
        .context("failed to load the config file")?;
    let ctx = RelayerContext::new(config)?;
    let store = Arc::new(create_store(&ctx, args.tmp)?);

    // operator endpoints
    tokio::spawn(service::serve_metrics(ctx.clone()).map(|result| {
        if let Err(e) = result {
            tracing::error!(error = %e, "metrics server exited with an error");
        }
    }));
    tokio::spawn(service::serve_status(ctx.clone(), store.clone()).map(
        |result| {
            if let Err(e) = result {
                tracing::error!(error = %e, "status server exited with an error");
            }
        },
    ));

    // subscriber, dispatcher and submit checker
    service::ignite(&ctx, store).await?;
    tracing::event!(
        target: icq_relayer::probe::TARGET,
        tracing::Level::DEBUG,
        kind = %icq_relayer::probe::Kind::Lifecycle,
        started = true
    );

    // watch for signals, and for a background service bringing the relayer
    // down (e.g. a critical proof failure)
    let mut failure_signal = ctx.shutdown_signal();
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let shutdown = || {
        tracing::event!(
            target: icq_relayer::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %icq_relayer::probe::Kind::Lifecycle,
            shutdown = true
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
        std::thread::sleep(std::time::Duration::from_millis(300));
        tracing::info!("Clean Exit ..");
    };
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown();
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown();
        },
        _ = failure_signal.recv() => {
            tracing::error!("a background service terminated the relayer");
            anyhow::bail!("relayer stopped by a background service failure");
        },
    }
    Ok(())
}

fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("icq_relayer={}", log_level).parse()?);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

/// Opens the durable store at the configured path, the platform data
/// directory, or a temporary directory when `--tmp` is passed.
fn create_store(ctx: &RelayerContext, tmp: bool) -> anyhow::Result<SledStore> {
    if tmp {
        tracing::debug!("Using temp dir for store");
        return Ok(SledStore::temporary()?);
    }
    let db_path = match &ctx.config.storage_path {
        Some(path) => path.clone(),
        None => {
            let dirs =
                ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
                    .context("failed to get the default data directory")?;
            dirs.data_local_dir().join("store")
        }
    };
    Ok(SledStore::open(db_path)?)
}
