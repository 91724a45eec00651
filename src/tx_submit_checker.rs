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

//! Finalizing submitted transactions: the checker drains the unbounded FIFO
//! fed by the TX processor and polls the host for each transaction's
//! committed result, transitioning its record to `SubmittedAndVerified` or
//! `ErrorOnCommit`.
//!
//! At startup the checker first reconciles every record still in `Submitted`
//! state from storage; a transaction whose result cannot be obtained within
//! the bounded poll budget stays `Submitted` and is picked up by the next
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::config::{HostChainConfig, SubmitCheckerConfig};
use crate::context::Shutdown;
use crate::error::Error;
use crate::metric::Metrics;
use crate::retry::FixedDelayRetries;
use crate::rpc::JsonRpcClient;
use crate::store::RelayerStorage;
use crate::types::{
    PendingSubmittedTxInfo, SubmittedTxInfo, SubmittedTxStatus,
};

/// The committed result of a host transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    /// The DeliverTx result code; zero means success.
    pub code: u32,
    /// The host-reported log line.
    pub log: String,
}

/// Looks up the committed result of a broadcast host transaction.
#[async_trait]
pub trait TxStatusClient: Send + Sync {
    /// `Ok(None)` while the transaction has not been committed yet.
    async fn tx_commit_status(
        &self,
        host_tx_hash: &str,
    ) -> crate::Result<Option<CommitStatus>>;
}

#[derive(Serialize)]
struct TxStatusParams<'a> {
    hash: &'a str,
}

#[derive(Deserialize)]
struct TxStatusResult {
    committed: bool,
    #[serde(default)]
    code: u32,
    #[serde(default)]
    log: String,
}

/// A [`TxStatusClient`] over the host node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpTxStatusClient {
    rpc: JsonRpcClient,
}

impl HttpTxStatusClient {
    /// Creates a client from the host chain configuration.
    pub fn new(config: &HostChainConfig) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.rpc_endpoint.clone(),
                config.rpc_timeout(),
            )?,
        })
    }
}

#[async_trait]
impl TxStatusClient for HttpTxStatusClient {
    async fn tx_commit_status(
        &self,
        host_tx_hash: &str,
    ) -> crate::Result<Option<CommitStatus>> {
        let result: TxStatusResult = self
            .rpc
            .call("tx_status", &TxStatusParams { hash: host_tx_hash })
            .await?;
        if !result.committed {
            return Ok(None);
        }
        Ok(Some(CommitStatus {
            code: result.code,
            log: result.log,
        }))
    }
}

/// Drains the pending FIFO and finalizes each submitted transaction.
pub struct TxSubmitChecker<H, St> {
    host: Arc<H>,
    storage: Arc<St>,
    poll_interval: Duration,
    max_poll_attempts: usize,
    reconcile_interval: Duration,
    metrics: Arc<Mutex<Metrics>>,
}

impl<H, St> TxSubmitChecker<H, St>
where
    H: TxStatusClient,
    St: RelayerStorage,
{
    /// Creates a checker over the given host client and storage.
    pub fn new(
        host: Arc<H>,
        storage: Arc<St>,
        config: &SubmitCheckerConfig,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            host,
            storage,
            poll_interval: config.poll_interval(),
            max_poll_attempts: config.max_poll_attempts,
            reconcile_interval: config.reconcile_interval(),
            metrics,
        }
    }

    /// Reconciles the backlog from storage, then consumes the FIFO until it
    /// closes or shutdown is signalled, sweeping the backlog again on every
    /// reconcile interval.
    pub async fn run(
        self,
        mut pending: mpsc::Receiver<PendingSubmittedTxInfo>,
        mut shutdown: Shutdown,
    ) -> crate::Result<()> {
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::SubmitChecker,
            starting = true,
        );
        self.reconcile().await?;
        let mut reconcile = tokio::time::interval_at(
            tokio::time::Instant::now() + self.reconcile_interval,
            self.reconcile_interval,
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signalled, stopping the submit checker");
                    return Ok(());
                }
                _ = reconcile.tick() => {
                    self.reconcile().await?;
                }
                maybe_item = pending.recv() => {
                    let Some(item) = maybe_item else {
                        tracing::info!("pending queue closed, stopping the submit checker");
                        return Ok(());
                    };
                    self.check(item).await;
                }
            }
        }
    }

    /// Sweeps every record still in `Submitted` state.
    async fn reconcile(&self) -> crate::Result<()> {
        let backlog = self.storage.all_pending_txs()?;
        if backlog.is_empty() {
            return Ok(());
        }
        tracing::info!(
            count = backlog.len(),
            "reconciling transactions still awaiting their commit result"
        );
        for item in backlog {
            self.check(item).await;
        }
        Ok(())
    }

    /// Polls for one transaction's committed result within the bounded retry
    /// budget and transitions its record. Leaves the record `Submitted` when
    /// the budget is exhausted.
    async fn check(&self, item: PendingSubmittedTxInfo) {
        let backoff =
            FixedDelayRetries::new(self.poll_interval, self.max_poll_attempts);
        let result = backoff::future::retry(backoff, || async {
            match self.host.tx_commit_status(&item.host_tx_hash).await {
                Ok(Some(status)) => Ok(status),
                Ok(None) => Err(backoff::Error::transient(Error::Generic(
                    "transaction not committed yet",
                ))),
                Err(e) => Err(backoff::Error::transient(e)),
            }
        })
        .await;

        let info = match result {
            Ok(status) if status.code == 0 => {
                self.metrics.lock().await.verified_txs.inc();
                tracing::debug!(
                    query_id = item.query_id,
                    host_tx_hash = %item.host_tx_hash,
                    "submitted transaction committed successfully"
                );
                SubmittedTxInfo {
                    status: SubmittedTxStatus::SubmittedAndVerified,
                    message: String::new(),
                }
            }
            Ok(status) => {
                self.metrics.lock().await.commit_failed_txs.inc();
                tracing::warn!(
                    query_id = item.query_id,
                    host_tx_hash = %item.host_tx_hash,
                    code = status.code,
                    log = %status.log,
                    "submitted transaction failed on commit"
                );
                SubmittedTxInfo {
                    status: SubmittedTxStatus::ErrorOnCommit,
                    message: status.log,
                }
            }
            Err(e) => {
                tracing::warn!(
                    query_id = item.query_id,
                    host_tx_hash = %item.host_tx_hash,
                    error = %e,
                    "commit result unavailable, leaving for the next reconciliation"
                );
                return;
            }
        };
        if let Err(e) = self.storage.set_tx_status(
            item.query_id,
            &item.submitted_tx_hash,
            &item.host_tx_hash,
            info,
        ) {
            tracing::error!(
                query_id = item.query_id,
                error = %e,
                "failed to record the committed status"
            );
        }
    }
}
