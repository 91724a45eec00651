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

use std::path::Path;

use crate::types::{
    PendingSubmittedTxInfo, QueryId, SubmittedTxInfo, SubmittedTxRecord,
    SubmittedTxStatus,
};

use super::{merge_record, RelayerStorage};

const QUERY_HEIGHTS_TREE: &str = "query_heights";
const TXS_TREE_PREFIX: &str = "txs/";

/// SledStore is a store that keeps the relayer state in a
/// [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Create a new SledStore.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledStore.
    pub fn temporary() -> crate::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk.
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn txs_tree(&self, query_id: QueryId) -> crate::Result<sled::Tree> {
        Ok(self.db.open_tree(format!("{TXS_TREE_PREFIX}{query_id}"))?)
    }
}

impl RelayerStorage for SledStore {
    #[tracing::instrument(skip(self))]
    fn last_query_height(&self, query_id: QueryId) -> crate::Result<Option<u64>> {
        let tree = self.db.open_tree(QUERY_HEIGHTS_TREE)?;
        let val = tree.get(query_id.to_le_bytes())?;
        match val {
            Some(v) => {
                let mut output = [0u8; 8];
                output.copy_from_slice(&v);
                Ok(Some(u64::from_le_bytes(output)))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    fn set_last_query_height(
        &self,
        query_id: QueryId,
        height: u64,
    ) -> crate::Result<()> {
        let tree = self.db.open_tree(QUERY_HEIGHTS_TREE)?;
        tree.insert(query_id.to_le_bytes(), &height.to_le_bytes())?;
        tree.flush()?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn tx_exists(&self, query_id: QueryId, tx_hash: &str) -> crate::Result<bool> {
        let tree = self.txs_tree(query_id)?;
        Ok(tree.contains_key(tx_hash.as_bytes())?)
    }

    #[tracing::instrument(skip(self, info))]
    fn set_tx_status(
        &self,
        query_id: QueryId,
        tx_hash: &str,
        host_tx_hash: &str,
        info: SubmittedTxInfo,
    ) -> crate::Result<()> {
        let tree = self.txs_tree(query_id)?;
        let existing = match tree.get(tx_hash.as_bytes())? {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };
        if let Some(record) = merge_record(existing, host_tx_hash, info) {
            tree.insert(tx_hash.as_bytes(), serde_json::to_vec(&record)?)?;
            tree.flush()?;
        }
        Ok(())
    }

    fn txs_for_query(
        &self,
        query_id: QueryId,
    ) -> crate::Result<Vec<(String, SubmittedTxRecord)>> {
        let tree = self.txs_tree(query_id)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let hash = String::from_utf8_lossy(&key).into_owned();
            let record: SubmittedTxRecord = serde_json::from_slice(&value)?;
            out.push((hash, record));
        }
        Ok(out)
    }

    fn all_pending_txs(&self) -> crate::Result<Vec<PendingSubmittedTxInfo>> {
        let mut pending = Vec::new();
        for name in self.db.tree_names() {
            let name = String::from_utf8_lossy(&name).into_owned();
            let Some(query_id) = name
                .strip_prefix(TXS_TREE_PREFIX)
                .and_then(|id| id.parse::<QueryId>().ok())
            else {
                continue;
            };
            for (hash, record) in self.txs_for_query(query_id)? {
                if record.info.status == SubmittedTxStatus::Submitted {
                    pending.push(PendingSubmittedTxInfo {
                        query_id,
                        submitted_tx_hash: hash,
                        host_tx_hash: record.host_tx_hash,
                        submitted_at_ms: record.submitted_at_ms,
                    });
                }
            }
        }
        Ok(pending)
    }
}
