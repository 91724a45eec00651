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

//! Mocked collaborators shared by the unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::consensus::ConsensusManager;
use crate::context::Shutdown;
use crate::error::Error;
use crate::metric::Metrics;
use crate::submit::Submitter;
use crate::target_client::{TargetClient, TxSearch};
use crate::types::{
    InclusionProof, KvKey, ProvenTx, QueryId, StorageProof, Transaction,
    TrustedHeader,
};

/// A fresh metrics handle on its own registry.
pub fn test_metrics() -> Arc<tokio::sync::Mutex<Metrics>> {
    Arc::new(tokio::sync::Mutex::new(
        Metrics::new().expect("metrics registry"),
    ))
}

/// A shutdown pair: send on the returned sender to trigger it.
pub fn test_shutdown() -> (broadcast::Sender<()>, Shutdown) {
    let (tx, rx) = broadcast::channel(2);
    (tx, Shutdown::new(rx))
}

/// A deterministic transaction at `height` whose bytes derive from `seed`.
pub fn test_tx(height: u64, seed: u8) -> Transaction {
    Transaction {
        height,
        index: seed as u32,
        data: vec![seed; 16],
        inclusion_proof: InclusionProof {
            total: 8,
            index: seed as u32,
            leaf_hash: vec![seed; 32],
            aunts: vec![vec![seed ^ 0xff; 32]],
        },
    }
}

/// A target chain with a scripted transaction history. Searches honor the
/// `tx.height > w` clause the processor appends, so passes over the same
/// history behave like real re-searches.
pub struct MockTargetClient {
    latest: u64,
    txs: Vec<Transaction>,
    searches: Mutex<Vec<String>>,
    // deliver only this many transactions, then fail the stream
    fail_after: Mutex<Option<(usize, Error)>>,
}

impl MockTargetClient {
    pub fn new(latest: u64, txs: Vec<Transaction>) -> Self {
        Self {
            latest,
            txs,
            searches: Mutex::new(vec![]),
            fail_after: Mutex::new(None),
        }
    }

    /// Makes the next searches deliver `count` transactions and then end
    /// with `error` instead of a clean close.
    pub fn fail_search_after(&self, count: usize, error: Error) {
        *self.fail_after.lock() = Some((count, error));
    }

    /// Every search query string seen so far.
    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().clone()
    }

    fn watermark_of(query: &str) -> u64 {
        query
            .split("tx.height>")
            .nth(1)
            .and_then(|rest| {
                rest.split_whitespace().next().and_then(|n| n.parse().ok())
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl TargetClient for MockTargetClient {
    async fn latest_height(&self) -> crate::Result<u64> {
        Ok(self.latest)
    }

    async fn search_transactions(&self, query: &str) -> crate::Result<TxSearch> {
        self.searches.lock().push(query.to_string());
        let watermark = Self::watermark_of(query);
        let mut matching: Vec<Transaction> = self
            .txs
            .iter()
            .filter(|tx| tx.height > watermark)
            .cloned()
            .collect();
        matching.sort_by_key(|tx| (tx.height, tx.index));

        let fail_after = self.fail_after.lock().take();
        let (txs_tx, txs_rx) = mpsc::channel(8);
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (limit, outcome) = match fail_after {
                Some((count, error)) => (count, Err(error)),
                None => (matching.len(), Ok(())),
            };
            for tx in matching.into_iter().take(limit) {
                if txs_tx.send(tx).await.is_err() {
                    return;
                }
            }
            drop(txs_tx);
            let _ = done_tx.send(outcome);
        });
        Ok(TxSearch {
            txs: txs_rx,
            done: done_rx,
        })
    }

    async fn kv_proofs(
        &self,
        height: u64,
        keys: &[KvKey],
    ) -> crate::Result<Vec<StorageProof>> {
        Ok(keys
            .iter()
            .map(|kv_key| StorageProof {
                path: kv_key.path.clone(),
                key: kv_key.key.clone(),
                value: format!("value@{height}").into_bytes(),
                proof: vec![0xab; 8],
            })
            .collect())
    }
}

/// A consensus manager that trusts everything: headers come back anchored
/// one height above the request.
pub struct MockConsensus;

#[async_trait]
impl ConsensusManager for MockConsensus {
    async fn header_with_best_trusted_height(
        &self,
        height: u64,
    ) -> crate::Result<TrustedHeader> {
        Ok(TrustedHeader {
            height,
            trusted_height: height + 1,
            payload: vec![],
        })
    }
}

/// One recorded call to the mock submitter.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitCall {
    Tx {
        query_id: QueryId,
        height: u64,
        hash: String,
    },
    Kv {
        query_id: QueryId,
        height: u64,
        entries: Vec<Vec<u8>>,
        header_height: u64,
    },
}

/// Records submissions and hands out sequential host hashes; individual
/// calls can be scripted to fail.
#[derive(Default)]
pub struct MockSubmitter {
    calls: Mutex<Vec<SubmitCall>>,
    failures: Mutex<Vec<(usize, Error)>>,
}

impl MockSubmitter {
    /// Fails the next call (index = calls so far).
    pub fn fail_next(&self, error: Error) {
        let at = self.calls.lock().len();
        self.failures.lock().push((at, error));
    }

    /// Fails the `n`-th call (zero-based).
    pub fn fail_nth(&self, n: usize, error: Error) {
        self.failures.lock().push((n, error));
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<SubmitCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: SubmitCall) -> crate::Result<String> {
        let mut calls = self.calls.lock();
        let index = calls.len();
        calls.push(call);
        let mut failures = self.failures.lock();
        if let Some(pos) = failures.iter().position(|(at, _)| *at == index) {
            let (_, error) = failures.remove(pos);
            return Err(error);
        }
        Ok(format!("HOSTHASH{index}"))
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    async fn submit_tx_proof(
        &self,
        query_id: QueryId,
        proven_tx: &ProvenTx,
    ) -> crate::Result<String> {
        self.record(SubmitCall::Tx {
            query_id,
            height: proven_tx.tx.height,
            hash: proven_tx.tx.hash(),
        })
    }

    async fn submit_kv_proof(
        &self,
        query_id: QueryId,
        height: u64,
        entries: &[StorageProof],
        header: &TrustedHeader,
    ) -> crate::Result<String> {
        self.record(SubmitCall::Kv {
            query_id,
            height,
            entries: entries.iter().map(|e| e.key.clone()).collect(),
            header_height: header.height,
        })
    }
}
