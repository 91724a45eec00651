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

//! Building, signing and broadcasting proof-bearing host transactions.
//!
//! The relayer never holds key material: the result message is handed to a
//! signing service behind the [`TxSigner`] seam, and the signed bytes are
//! broadcast synchronously. Mempool acceptance (CheckTx code 0) yields the
//! host transaction hash; the committed outcome is discovered later by the
//! submit checker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::HostChainConfig;
use crate::error::Error;
use crate::rpc::JsonRpcClient;
use crate::types::{ProvenTx, QueryId, StorageProof, TrustedHeader};

/// Codespace the host uses for deterministic proof-verification rejections.
/// A rejection here cannot be fixed by retrying; it terminates the process.
const PROOF_CODESPACE: &str = "proof";

/// The result message submitted to the host chain for a registered query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResultMsg<'a> {
    /// Proven key-value entries at a height, with the header sealing it.
    KvResult {
        /// The registered query this result answers.
        query_id: QueryId,
        /// The height the entries were read at.
        height: u64,
        /// The proven entries.
        entries: &'a [StorageProof],
        /// Header attesting `height + 1`, used to verify the entries.
        header: &'a TrustedHeader,
    },
    /// One proven target-chain transaction with both headers.
    TxResult {
        /// The registered query this result answers.
        query_id: QueryId,
        /// The proven transaction and its two headers.
        proven_tx: &'a ProvenTx,
    },
}

/// Turns a result message into signed, broadcastable transaction bytes.
///
/// The wire encoding and the signature scheme of the host chain live behind
/// this seam.
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// Signs `msg` on behalf of the relayer key.
    async fn sign(&self, msg: &QueryResultMsg<'_>) -> crate::Result<Vec<u8>>;
}

/// Submits proof-bearing transactions to the host chain.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submits one proven transaction for a TX query. Returns the host
    /// transaction hash once the mempool accepts the broadcast.
    async fn submit_tx_proof(
        &self,
        query_id: QueryId,
        proven_tx: &ProvenTx,
    ) -> crate::Result<String>;

    /// Submits the proven key-value entries of a KV query.
    async fn submit_kv_proof(
        &self,
        query_id: QueryId,
        height: u64,
        entries: &[StorageProof],
        header: &TrustedHeader,
    ) -> crate::Result<String>;
}

#[derive(Serialize)]
struct SignRequest<'a> {
    chain_id: &'a str,
    key_name: &'a str,
    gas_prices: &'a str,
    gas_adjustment: f64,
    msg: &'a QueryResultMsg<'a>,
}

#[derive(Deserialize)]
struct SignResult {
    tx: String,
}

/// A [`TxSigner`] that delegates to an external signing service holding the
/// relayer key, the same way a remote signer sidecar does.
#[derive(Debug, Clone)]
pub struct RemoteSigner {
    rpc: JsonRpcClient,
    chain_id: String,
    sign_key_name: String,
    gas_prices: String,
    gas_adjustment: f64,
}

impl RemoteSigner {
    /// Creates a signer from the host chain configuration.
    pub fn new(config: &HostChainConfig) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.signer_endpoint.clone(),
                config.rpc_timeout(),
            )?,
            chain_id: config.chain_id.clone(),
            sign_key_name: config.sign_key_name.clone(),
            gas_prices: config.gas_prices.clone(),
            gas_adjustment: config.gas_adjustment,
        })
    }
}

#[async_trait]
impl TxSigner for RemoteSigner {
    async fn sign(&self, msg: &QueryResultMsg<'_>) -> crate::Result<Vec<u8>> {
        let result: SignResult = self
            .rpc
            .call(
                "sign_tx",
                &SignRequest {
                    chain_id: &self.chain_id,
                    key_name: &self.sign_key_name,
                    gas_prices: &self.gas_prices,
                    gas_adjustment: self.gas_adjustment,
                    msg,
                },
            )
            .await?;
        Ok(hex::decode(result.tx)?)
    }
}

#[derive(Serialize)]
struct BroadcastParams {
    tx: String,
}

#[derive(Deserialize)]
struct BroadcastResult {
    code: u32,
    #[serde(default)]
    codespace: String,
    #[serde(default)]
    log: String,
    hash: String,
}

/// A [`Submitter`] that signs via a [`TxSigner`] and broadcasts to the host
/// node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HostTxSender<G> {
    rpc: JsonRpcClient,
    signer: G,
}

impl<G: TxSigner> HostTxSender<G> {
    /// Creates a sender from the host chain configuration.
    pub fn new(config: &HostChainConfig, signer: G) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.rpc_endpoint.clone(),
                config.rpc_timeout(),
            )?,
            signer,
        })
    }

    async fn broadcast(&self, msg: QueryResultMsg<'_>) -> crate::Result<String> {
        let tx_bytes = self.signer.sign(&msg).await?;
        let result: BroadcastResult = self
            .rpc
            .call(
                "broadcast_tx_sync",
                &BroadcastParams {
                    tx: hex::encode(tx_bytes),
                },
            )
            .await?;
        classify_broadcast(result)
    }
}

/// Maps a CheckTx outcome to the host transaction hash or the matching
/// error kind. Rejections in the proof codespace are deterministic and are
/// tagged critical.
fn classify_broadcast(result: BroadcastResult) -> crate::Result<String> {
    if result.code == 0 {
        return Ok(result.hash);
    }
    if result.codespace == PROOF_CODESPACE {
        return Err(Error::CriticalProof(result.log));
    }
    Err(Error::MempoolRejection {
        code: result.code,
        log: result.log,
    })
}

#[async_trait]
impl<G: TxSigner> Submitter for HostTxSender<G> {
    async fn submit_tx_proof(
        &self,
        query_id: QueryId,
        proven_tx: &ProvenTx,
    ) -> crate::Result<String> {
        self.broadcast(QueryResultMsg::TxResult {
            query_id,
            proven_tx,
        })
        .await
    }

    async fn submit_kv_proof(
        &self,
        query_id: QueryId,
        height: u64,
        entries: &[StorageProof],
        header: &TrustedHeader,
    ) -> crate::Result<String> {
        self.broadcast(QueryResultMsg::KvResult {
            query_id,
            height,
            entries,
            header,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: u32, codespace: &str, log: &str) -> BroadcastResult {
        BroadcastResult {
            code,
            codespace: codespace.into(),
            log: log.into(),
            hash: "AB12".into(),
        }
    }

    #[test]
    fn code_zero_yields_the_host_hash() {
        let hash = classify_broadcast(result(0, "", "")).unwrap();
        assert_eq!(hash, "AB12");
    }

    #[test]
    fn ordinary_rejections_are_not_critical() {
        let err =
            classify_broadcast(result(13, "sdk", "insufficient fee")).unwrap_err();
        assert!(!err.is_critical_proof());
        assert!(
            matches!(err, Error::MempoolRejection { code: 13, ref log } if log == "insufficient fee")
        );
    }

    #[test]
    fn proof_codespace_rejections_are_critical() {
        let err = classify_broadcast(result(
            2,
            PROOF_CODESPACE,
            "header does not match the proof",
        ))
        .unwrap_err();
        assert!(err.is_critical_proof());
    }
}

