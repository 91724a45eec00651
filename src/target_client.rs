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

//! Read-side client for the target chain: transaction search, latest height,
//! and proven key-value reads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::TargetChainConfig;
use crate::rpc::JsonRpcClient;
use crate::types::{InclusionProof, KvKey, StorageProof, Transaction};

/// How many transactions a search may buffer ahead of the consumer.
const SEARCH_BUFFER: usize = 64;

/// A lazily produced, finite sequence of matching transactions in ascending
/// `(height, index)` order.
///
/// The terminal result arrives on `done` after `txs` closes: `Ok(())` on a
/// clean end of the sequence, otherwise the first fatal error. Dropping the
/// stream cancels the underlying pagination promptly.
#[derive(Debug)]
pub struct TxSearch {
    /// The matched transactions.
    pub txs: mpsc::Receiver<Transaction>,
    /// Terminal result, delivered once `txs` is exhausted.
    pub done: oneshot::Receiver<crate::Result<()>>,
}

/// Read-side RPC surface of the target chain.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// The current tip height of the target chain.
    async fn latest_height(&self) -> crate::Result<u64>;

    /// Starts a paginated transaction search for `query` (grammar per
    /// [`crate::filter::render_query`]).
    async fn search_transactions(&self, query: &str) -> crate::Result<TxSearch>;

    /// Reads every requested key at `height`, each with its Merkle proof.
    async fn kv_proofs(
        &self,
        height: u64,
        keys: &[KvKey],
    ) -> crate::Result<Vec<StorageProof>>;
}

/// A [`TargetClient`] backed by the target node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpTargetClient {
    rpc: JsonRpcClient,
    page_size: u32,
}

impl HttpTargetClient {
    /// Creates a client from the target chain configuration.
    pub fn new(config: &TargetChainConfig) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.rpc_endpoint.clone(),
                config.rpc_timeout(),
            )?,
            page_size: config.tx_search_page_size,
        })
    }
}

#[derive(Serialize)]
struct TxSearchParams<'a> {
    query: &'a str,
    prove: bool,
    page: u32,
    per_page: u32,
    order_by: &'a str,
}

#[derive(Deserialize)]
struct TxSearchResult {
    txs: Vec<TxResult>,
    total_count: u64,
}

#[derive(Deserialize)]
struct TxResult {
    height: u64,
    index: u32,
    tx: String,
    proof: TxProofResult,
}

#[derive(Deserialize)]
struct TxProofResult {
    total: u32,
    index: u32,
    leaf_hash: String,
    aunts: Vec<String>,
}

impl TxResult {
    fn into_transaction(self) -> crate::Result<Transaction> {
        Ok(Transaction {
            height: self.height,
            index: self.index,
            data: hex::decode(self.tx)?,
            inclusion_proof: InclusionProof {
                total: self.proof.total,
                index: self.proof.index,
                leaf_hash: hex::decode(self.proof.leaf_hash)?,
                aunts: self
                    .proof
                    .aunts
                    .into_iter()
                    .map(hex::decode)
                    .collect::<Result<_, _>>()?,
            },
        })
    }
}

#[derive(Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Deserialize)]
struct SyncInfo {
    latest_block_height: u64,
}

#[derive(Serialize)]
struct AbciQueryParams<'a> {
    path: String,
    data: &'a str,
    height: u64,
    prove: bool,
}

#[derive(Deserialize)]
struct AbciQueryResult {
    response: AbciQueryResponse,
}

#[derive(Deserialize)]
struct AbciQueryResponse {
    code: u32,
    #[serde(default)]
    log: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    proof_ops: String,
}

impl HttpTargetClient {
    async fn search_page(
        &self,
        query: &str,
        page: u32,
    ) -> crate::Result<TxSearchResult> {
        self.rpc
            .call(
                "tx_search",
                &TxSearchParams {
                    query,
                    prove: true,
                    page,
                    per_page: self.page_size,
                    order_by: "asc",
                },
            )
            .await
    }
}

#[async_trait]
impl TargetClient for HttpTargetClient {
    async fn latest_height(&self) -> crate::Result<u64> {
        let status: StatusResult = self.rpc.call("status", &()).await?;
        Ok(status.sync_info.latest_block_height)
    }

    async fn search_transactions(&self, query: &str) -> crate::Result<TxSearch> {
        let (txs_tx, txs_rx) = mpsc::channel(SEARCH_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();
        let client = self.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            let mut page = 1u32;
            let mut fetched = 0u64;
            let outcome = loop {
                let result = match client.search_page(&query, page).await {
                    Ok(result) => result,
                    Err(e) => break Err(e),
                };
                let page_len = result.txs.len() as u64;
                for raw in result.txs {
                    let tx = match raw.into_transaction() {
                        Ok(tx) => tx,
                        Err(e) => {
                            // decode failures are fatal to this pass
                            let _ = done_tx.send(Err(e));
                            return;
                        }
                    };
                    if txs_tx.send(tx).await.is_err() {
                        // caller dropped the stream: cancelled
                        return;
                    }
                }
                fetched += page_len;
                if page_len == 0 || fetched >= result.total_count {
                    break Ok(());
                }
                page += 1;
            };
            // close the stream before delivering the terminal result
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
        let mut proofs = Vec::with_capacity(keys.len());
        for kv_key in keys {
            let data = hex::encode(&kv_key.key);
            let result: AbciQueryResult = self
                .rpc
                .call(
                    "abci_query",
                    &AbciQueryParams {
                        path: format!("store/{}/key", kv_key.path),
                        data: &data,
                        height,
                        prove: true,
                    },
                )
                .await?;
            let response = result.response;
            if response.code != 0 {
                return Err(crate::Error::Rpc {
                    code: response.code as i64,
                    message: response.log,
                });
            }
            proofs.push(StorageProof {
                path: kv_key.path.clone(),
                key: kv_key.key.clone(),
                value: hex::decode(response.value)?,
                proof: hex::decode(response.proof_ops)?,
            });
        }
        Ok(proofs)
    }
}
