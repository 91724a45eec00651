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

//! Processing of KV queries: read the requested keys at the latest target
//! height with proofs, seal them with a trusted header, submit once.
//!
//! KV queries keep no watermark; every pass submits the whole state at the
//! latest height, and duplicate submissions are tolerated by the host.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::consensus::ConsensusManager;
use crate::metric::Metrics;
use crate::submit::Submitter;
use crate::target_client::TargetClient;
use crate::types::{MessageKv, QueryKind};

/// Proves and submits the result of one KV query.
pub struct KvProcessor<T, C, S> {
    target: Arc<T>,
    consensus: Arc<C>,
    submitter: Arc<S>,
    metrics: Arc<Mutex<Metrics>>,
}

impl<T, C, S> KvProcessor<T, C, S>
where
    T: TargetClient,
    C: ConsensusManager,
    S: Submitter,
{
    /// Creates a processor over the given collaborators.
    pub fn new(
        target: Arc<T>,
        consensus: Arc<C>,
        submitter: Arc<S>,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            target,
            consensus,
            submitter,
            metrics,
        }
    }

    /// Reads every requested key at the latest height, obtains the header at
    /// `height + 1` needed for commit verification, and submits the result.
    pub async fn process_and_submit(&self, msg: &MessageKv) -> crate::Result<()> {
        let height = self.target.latest_height().await?;
        tracing::debug!(
            query_id = msg.query_id,
            height,
            keys = msg.kv_keys.len(),
            "reading KV entries at the latest height"
        );
        let entries = self.target.kv_proofs(height, &msg.kv_keys).await?;
        let header = self
            .consensus
            .header_with_best_trusted_height(height + 1)
            .await?;
        match self
            .submitter
            .submit_kv_proof(msg.query_id, height, &entries, &header)
            .await
        {
            Ok(host_tx_hash) => {
                self.metrics.lock().await.add_success_proof(QueryKind::Kv);
                tracing::info!(
                    query_id = msg.query_id,
                    height,
                    host_tx_hash = %host_tx_hash,
                    "KV proof submitted successfully"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.lock().await.add_failed_proof(QueryKind::Kv);
                Err(e)
            }
        }
    }
}
