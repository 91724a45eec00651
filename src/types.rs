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

//! Core data model of the relayer: registered queries, target-chain
//! transactions with their proofs, and the records kept for every submitted
//! host transaction.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a registered interchain query, unique per host chain.
pub type QueryId = u64;

/// The kind of a registered interchain query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// A set of storage keys read from the target chain at a proven height.
    Kv,
    /// A transaction filter matched against the target chain history.
    Tx,
}

impl QueryKind {
    /// The wire/metrics label of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Kv => "kv",
            QueryKind::Tx => "tx",
        }
    }
}

impl Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single storage key requested by a KV query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvKey {
    /// The store path on the target chain, e.g. `bank` or `staking`.
    pub path: String,
    /// The raw key bytes under that path.
    #[serde(with = "hex")]
    pub key: Vec<u8>,
}

/// A query registered on the host chain, as decoded from a
/// `registered-interchain-query` event.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredQuery {
    /// The query id assigned by the host chain.
    pub id: QueryId,
    /// Whether this is a KV or a TX query.
    pub kind: QueryKind,
    /// Requested storage keys. Only meaningful for KV queries.
    pub kv_keys: Vec<KvKey>,
    /// Raw JSON transactions filter. Only meaningful for TX queries.
    pub transactions_filter: String,
}

/// The KV half of a registered query, routed to the KV processor.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageKv {
    /// The query id assigned by the host chain.
    pub query_id: QueryId,
    /// Requested storage keys.
    pub kv_keys: Vec<KvKey>,
}

/// The TX half of a registered query, routed to the TX processor.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTx {
    /// The query id assigned by the host chain.
    pub query_id: QueryId,
    /// Raw JSON transactions filter.
    pub transactions_filter: String,
}

/// A transaction found on the target chain, with its inclusion proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The height of the block that includes this transaction.
    pub height: u64,
    /// The index of this transaction inside its block.
    pub index: u32,
    /// The canonical transaction bytes.
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    /// Merkle proof of inclusion in the block's transaction tree.
    pub inclusion_proof: InclusionProof,
}

impl Transaction {
    /// The hash of a transaction is the SHA-256 of its canonical bytes,
    /// rendered as lowercase hex.
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }
}

/// Merkle proof that a transaction is part of a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Total number of leaves in the transaction tree.
    pub total: u32,
    /// Index of the proven leaf.
    pub index: u32,
    /// Hash of the proven leaf.
    #[serde(with = "hex")]
    pub leaf_hash: Vec<u8>,
    /// Sibling hashes on the path to the root, bottom-up.
    #[serde(with = "hex_list")]
    pub aunts: Vec<Vec<u8>>,
}

/// A target-chain header packaged so that the host light client will accept
/// it: the update payload plus the already-trusted height it is anchored on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedHeader {
    /// The height this header attests.
    pub height: u64,
    /// The height on the host light client used as the trust basis.
    pub trusted_height: u64,
    /// Opaque client-update payload as assembled by the header updater.
    #[serde(with = "hex")]
    pub payload: Vec<u8>,
}

/// A transaction plus the two consensus headers the host needs to verify it.
///
/// `next_header` attests `tx.height + 1`; its last commit is what validates
/// `header` on the host, so both are always required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenTx {
    /// Header attesting `tx.height`.
    pub header: TrustedHeader,
    /// Header attesting `tx.height + 1`.
    pub next_header: TrustedHeader,
    /// The proven transaction.
    pub tx: Transaction,
}

/// A proven key-value entry read from the target chain store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageProof {
    /// The store path the key was read from.
    pub path: String,
    /// The raw key bytes.
    #[serde(with = "hex")]
    pub key: Vec<u8>,
    /// The value bytes at the proven height. Empty for an absence proof.
    #[serde(with = "hex")]
    pub value: Vec<u8>,
    /// Opaque Merkle proof ops for the entry.
    #[serde(with = "hex")]
    pub proof: Vec<u8>,
}

/// Lifecycle state of a transaction submitted to the host chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmittedTxStatus {
    /// Accepted into the host mempool; final outcome still unknown.
    Submitted,
    /// Committed on the host chain with a zero result code.
    SubmittedAndVerified,
    /// The host mempool refused the broadcast.
    ErrorOnSubmit,
    /// Committed on the host chain with a non-zero result code.
    ErrorOnCommit,
}

impl SubmittedTxStatus {
    /// Terminal states are never rewritten back to [`Self::Submitted`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmittedTxStatus::Submitted)
    }
}

/// Status attached to a `(query id, source tx hash)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedTxInfo {
    /// Current lifecycle state.
    pub status: SubmittedTxStatus,
    /// Host- or relayer-reported detail, empty on the happy path.
    pub message: String,
}

/// The full stored record for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedTxRecord {
    /// Hash of the host transaction carrying the proof, once known.
    pub host_tx_hash: String,
    /// Current status and detail.
    pub info: SubmittedTxInfo,
    /// Unix milliseconds at which the record was first written.
    pub submitted_at_ms: u64,
}

/// Queue element handed from the TX processor to the submit checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmittedTxInfo {
    /// The query the proof was submitted for.
    pub query_id: QueryId,
    /// Hash of the source transaction on the target chain.
    pub submitted_tx_hash: String,
    /// Hash of the host transaction carrying the proof.
    pub host_tx_hash: String,
    /// Unix milliseconds at which the proof was submitted.
    pub submitted_at_ms: u64,
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as u64
}

mod hex_list {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &[Vec<u8>],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(value.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| hex::decode(s).map_err(D::Error::custom))
            .collect()
    }
}
