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
//
//! # Relayer Store Module 🕸️
//!
//! A module for managing the storage of the relayer.
//!
//! ## Overview
//!
//! The store keeps two families of durable state, both keyed by query id:
//! the last fully-processed target-chain height of each TX query (the
//! watermark), and one record per transaction submitted to the host chain.
//! Writes are durable before they are observable by a later read, and every
//! operation is atomic per key; the core never needs multi-key transactions.

use crate::types::{
    PendingSubmittedTxInfo, QueryId, SubmittedTxInfo, SubmittedTxRecord,
};

/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;

/// A store that uses [`sled`](https://sled.rs) as the backend.
pub use self::sled::SledStore;
/// A store that uses in memory data structures as the backend.
pub use mem::InMemoryStore;

/// Durable per-query relayer state.
pub trait RelayerStorage: Send + Sync {
    /// The watermark of a TX query: its last fully-processed target height.
    /// `None` for a query this relayer has never seen.
    fn last_query_height(&self, query_id: QueryId) -> crate::Result<Option<u64>>;

    /// Persists the watermark of a TX query.
    fn set_last_query_height(
        &self,
        query_id: QueryId,
        height: u64,
    ) -> crate::Result<()>;

    /// Whether a proof for `(query_id, tx_hash)` was already submitted.
    fn tx_exists(&self, query_id: QueryId, tx_hash: &str) -> crate::Result<bool>;

    /// Idempotent status upsert keyed by `(query_id, tx_hash)`.
    ///
    /// An empty `host_tx_hash` leaves any previously stored host hash in
    /// place. A terminal record is never rewritten back to `Submitted`.
    fn set_tx_status(
        &self,
        query_id: QueryId,
        tx_hash: &str,
        host_tx_hash: &str,
        info: SubmittedTxInfo,
    ) -> crate::Result<()>;

    /// All records of a query, keyed by source transaction hash.
    fn txs_for_query(
        &self,
        query_id: QueryId,
    ) -> crate::Result<Vec<(String, SubmittedTxRecord)>>;

    /// Every record still in `Submitted` state, across all queries. Used by
    /// the submit checker to reconcile after a restart.
    fn all_pending_txs(&self) -> crate::Result<Vec<PendingSubmittedTxInfo>>;
}

/// Merges a status update into an existing record, preserving the stored
/// host hash and submit time, and refusing to downgrade a terminal record
/// back to `Submitted`.
pub(crate) fn merge_record(
    existing: Option<SubmittedTxRecord>,
    host_tx_hash: &str,
    info: SubmittedTxInfo,
) -> Option<SubmittedTxRecord> {
    match existing {
        None => Some(SubmittedTxRecord {
            host_tx_hash: host_tx_hash.to_string(),
            info,
            submitted_at_ms: crate::types::now_ms(),
        }),
        Some(record) => {
            if record.info.status.is_terminal() && !info.status.is_terminal() {
                return None;
            }
            Some(SubmittedTxRecord {
                host_tx_hash: if host_tx_hash.is_empty() {
                    record.host_tx_hash
                } else {
                    host_tx_hash.to_string()
                },
                info,
                submitted_at_ms: record.submitted_at_ms,
            })
        }
    }
}
