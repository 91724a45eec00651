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

//! # Relayer Configuration Module 🕸️
//!
//! A module for configuring the relayer.
//!
//! ## Overview
//!
//! Configuration is read from a single `toml` or `json` file, with every key
//! overridable from the environment under the `ICQ` prefix
//! (e.g. `ICQ_PROMETHEUS-PORT=9091`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The default port the metrics endpoint will listen on.
const fn default_prometheus_port() -> u16 {
    9090
}
/// The default port the status REST endpoint will listen on.
const fn default_webserver_port() -> u16 {
    9955
}
/// The default capacity of the registered-queries tasks channel.
const fn default_task_queue_capacity() -> usize {
    10_000
}
/// The default deadline for one outbound RPC, in milliseconds.
const fn default_rpc_timeout_ms() -> u64 {
    10_000
}
/// The default page size for target chain transaction searches.
const fn default_tx_search_page_size() -> u32 {
    100
}
/// The default interval between host event polls, in milliseconds.
const fn default_events_poll_interval_ms() -> u64 {
    1_000
}
/// The default gas adjustment applied to simulated gas.
const fn default_gas_adjustment() -> f64 {
    1.5
}

/// RelayerConfig is the configuration for the interchain query relayer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    /// Port of the Prometheus scrape endpoint.
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
    /// Port of the storage-backed status REST endpoint.
    #[serde(default = "default_webserver_port")]
    pub webserver_port: u16,
    /// Capacity of the tasks channel between the subscriber and the
    /// dispatcher. The subscriber blocks when it is full; this is the
    /// admission-control point of the pipeline.
    #[serde(default = "default_task_queue_capacity")]
    pub queries_task_queue_capacity: usize,
    /// Height delta below the current target tip at which a newly seen TX
    /// query starts searching. Zero starts from the beginning of history.
    #[serde(default)]
    pub initial_tx_search_offset: u64,
    /// Filesystem location of the durable store. Defaults to the platform
    /// data directory.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// The chain that registers queries and receives proofs.
    pub host: HostChainConfig,
    /// The chain whose state is being proved.
    pub target: TargetChainConfig,
    /// Tuning of the submitted-transaction checker.
    #[serde(default)]
    pub submit_checker: SubmitCheckerConfig,
}

/// Connection and signing parameters for the host chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostChainConfig {
    /// JSON-RPC endpoint of a host chain node.
    pub rpc_endpoint: url::Url,
    /// Chain id the submitted transactions are signed for.
    pub chain_id: String,
    /// Endpoint of the signing service that holds the relayer key.
    pub signer_endpoint: url::Url,
    /// Name of the signing key on the signing service.
    pub sign_key_name: String,
    /// Gas prices attached to submitted transactions, e.g. `0.025untrn`.
    pub gas_prices: String,
    /// Multiplier applied to simulated gas.
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,
    /// Interval between polls of the registered-query event feed.
    #[serde(default = "default_events_poll_interval_ms")]
    pub events_poll_interval_ms: u64,
    /// Deadline for one outbound RPC to the host.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl HostChainConfig {
    /// Deadline for one outbound RPC to the host.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Interval between polls of the registered-query event feed.
    pub fn events_poll_interval(&self) -> Duration {
        Duration::from_millis(self.events_poll_interval_ms)
    }
}

/// Connection parameters for the target chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetChainConfig {
    /// JSON-RPC endpoint of a target chain node.
    pub rpc_endpoint: url::Url,
    /// Chain id of the target chain, as known to the host light client.
    pub chain_id: String,
    /// Page size used when paginating transaction searches.
    #[serde(default = "default_tx_search_page_size")]
    pub tx_search_page_size: u32,
    /// Deadline for one outbound RPC to the target.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl TargetChainConfig {
    /// Deadline for one outbound RPC to the target.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// SubmitCheckerConfig is the configuration for the submit checker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubmitCheckerConfig {
    /// Milliseconds between polls for the commit result of one transaction.
    pub poll_interval_ms: u64,
    /// How many polls to attempt before leaving a transaction for the next
    /// reconciliation.
    pub max_poll_attempts: usize,
    /// Milliseconds between sweeps over the stored backlog of transactions
    /// still in `Submitted` state.
    pub reconcile_interval_ms: u64,
}

impl Default for SubmitCheckerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_poll_attempts: 5,
            reconcile_interval_ms: 300_000,
        }
    }
}

impl SubmitCheckerConfig {
    /// Interval between commit-result polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Interval between backlog sweeps.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

/// Try to parse the [`RelayerConfig`] from the given config file.
pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<RelayerConfig> {
    let path = path.as_ref();
    tracing::trace!("Loading config file: {}", path.display());
    let ext = path
        .extension()
        .map(|e| e.to_str().unwrap_or(""))
        .unwrap_or("");
    let format = match ext {
        "json" => config::FileFormat::Json,
        _ => config::FileFormat::Toml,
    };
    let cfg = config::Config::builder()
        .add_source(config::File::from(path).format(format))
        .add_source(config::Environment::with_prefix("ICQ").separator("_"))
        .build()?;
    let config: Result<
        RelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_toml_with_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"
                initial-tx-search-offset = 100

                [host]
                rpc-endpoint = "http://localhost:26657"
                chain-id = "host-1"
                signer-endpoint = "http://localhost:8555"
                sign-key-name = "relayer"
                gas-prices = "0.025uhost"

                [target]
                rpc-endpoint = "http://localhost:16657"
                chain-id = "target-1"
            "#
        )
        .unwrap();

        let cfg = load(file.path()).unwrap();
        assert_eq!(cfg.prometheus_port, default_prometheus_port());
        assert_eq!(cfg.queries_task_queue_capacity, 10_000);
        assert_eq!(cfg.initial_tx_search_offset, 100);
        assert_eq!(cfg.host.chain_id, "host-1");
        assert_eq!(cfg.target.tx_search_page_size, 100);
        assert_eq!(cfg.submit_checker.max_poll_attempts, 5);
    }
}
