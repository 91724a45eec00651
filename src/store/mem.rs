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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{
    PendingSubmittedTxInfo, QueryId, SubmittedTxInfo, SubmittedTxRecord,
    SubmittedTxStatus,
};

use super::{merge_record, RelayerStorage};

/// InMemoryStore keeps the relayer state in process memory. It mirrors the
/// semantics of the sled store and is mainly useful in tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    query_heights: Arc<RwLock<HashMap<QueryId, u64>>>,
    txs: Arc<RwLock<HashMap<QueryId, BTreeMap<String, SubmittedTxRecord>>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl RelayerStorage for InMemoryStore {
    fn last_query_height(&self, query_id: QueryId) -> crate::Result<Option<u64>> {
        Ok(self.query_heights.read().get(&query_id).copied())
    }

    fn set_last_query_height(
        &self,
        query_id: QueryId,
        height: u64,
    ) -> crate::Result<()> {
        self.query_heights.write().insert(query_id, height);
        Ok(())
    }

    fn tx_exists(&self, query_id: QueryId, tx_hash: &str) -> crate::Result<bool> {
        Ok(self
            .txs
            .read()
            .get(&query_id)
            .map(|txs| txs.contains_key(tx_hash))
            .unwrap_or(false))
    }

    fn set_tx_status(
        &self,
        query_id: QueryId,
        tx_hash: &str,
        host_tx_hash: &str,
        info: SubmittedTxInfo,
    ) -> crate::Result<()> {
        let mut guard = self.txs.write();
        let txs = guard.entry(query_id).or_default();
        let existing = txs.get(tx_hash).cloned();
        if let Some(record) = merge_record(existing, host_tx_hash, info) {
            txs.insert(tx_hash.to_string(), record);
        }
        Ok(())
    }

    fn txs_for_query(
        &self,
        query_id: QueryId,
    ) -> crate::Result<Vec<(String, SubmittedTxRecord)>> {
        Ok(self
            .txs
            .read()
            .get(&query_id)
            .map(|txs| {
                txs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            })
            .unwrap_or_default())
    }

    fn all_pending_txs(&self) -> crate::Result<Vec<PendingSubmittedTxInfo>> {
        let guard = self.txs.read();
        let mut pending = Vec::new();
        for (query_id, txs) in guard.iter() {
            for (hash, record) in txs {
                if record.info.status == SubmittedTxStatus::Submitted {
                    pending.push(PendingSubmittedTxInfo {
                        query_id: *query_id,
                        submitted_tx_hash: hash.clone(),
                        host_tx_hash: record.host_tx_hash.clone(),
                        submitted_at_ms: record.submitted_at_ms,
                    });
                }
            }
        }
        Ok(pending)
    }
}
