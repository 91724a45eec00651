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

//! The dispatcher: single consumer of the tasks channel.
//!
//! Each registered query is routed by kind to the KV or TX processor.
//! Ordinary failures are logged and counted, and the loop continues; a
//! critical proof error is returned upward, which shuts the process down so
//! an operator can investigate.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};

use crate::consensus::ConsensusManager;
use crate::context::Shutdown;
use crate::kv_processor::KvProcessor;
use crate::metric::Metrics;
use crate::store::RelayerStorage;
use crate::submit::Submitter;
use crate::target_client::TargetClient;
use crate::tx_processor::TxProcessor;
use crate::types::{MessageKv, MessageTx, QueryKind, RegisteredQuery};

/// Routes registered queries to their processors and records outcomes.
pub struct Relayer<T, C, S, St> {
    kv_processor: KvProcessor<T, C, S>,
    tx_processor: TxProcessor<T, C, S, St>,
    metrics: Arc<Mutex<Metrics>>,
}

impl<T, C, S, St> Relayer<T, C, S, St>
where
    T: TargetClient,
    C: ConsensusManager,
    S: Submitter,
    St: RelayerStorage,
{
    /// Creates a dispatcher over the two processors.
    pub fn new(
        kv_processor: KvProcessor<T, C, S>,
        tx_processor: TxProcessor<T, C, S, St>,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            kv_processor,
            tx_processor,
            metrics,
        }
    }

    /// Consumes the tasks channel until it closes, shutdown is signalled, or
    /// a critical proof error surfaces.
    pub async fn run(
        self,
        mut tasks: mpsc::Receiver<RegisteredQuery>,
        mut shutdown: Shutdown,
    ) -> crate::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signalled, stopping the dispatcher");
                    return Ok(());
                }
                maybe_query = tasks.recv() => {
                    let Some(query) = maybe_query else {
                        tracing::info!("tasks channel closed, stopping the dispatcher");
                        return Ok(());
                    };
                    let started = Instant::now();
                    self.metrics
                        .lock()
                        .await
                        .task_queue_depth
                        .set(tasks.len() as i64);
                    let outcome = self.process(&query).await;
                    let elapsed = started.elapsed().as_secs_f64();
                    match outcome {
                        Ok(()) => {
                            self.metrics
                                .lock()
                                .await
                                .add_success_request(query.kind, elapsed);
                        }
                        Err(e) if e.is_critical_proof() => {
                            tracing::error!(
                                query_id = query.id,
                                error = %e,
                                "critical proof failure, terminating"
                            );
                            return Err(e);
                        }
                        Err(e) => {
                            tracing::error!(
                                query_id = query.id,
                                error = %e,
                                "could not process query"
                            );
                            self.metrics
                                .lock()
                                .await
                                .add_failed_request(query.kind, elapsed);
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, query: &RegisteredQuery) -> crate::Result<()> {
        match query.kind {
            QueryKind::Kv => {
                tracing::debug!(query_id = query.id, "processing KV query");
                let msg = MessageKv {
                    query_id: query.id,
                    kv_keys: query.kv_keys.clone(),
                };
                self.kv_processor.process_and_submit(&msg).await
            }
            QueryKind::Tx => {
                tracing::debug!(query_id = query.id, "processing TX query");
                let msg = MessageTx {
                    query_id: query.id,
                    transactions_filter: query.transactions_filter.clone(),
                };
                self.tx_processor.process_message_tx(&msg).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::store::InMemoryStore;
    use crate::test_utils::{
        test_metrics, test_shutdown, test_tx, MockConsensus, MockSubmitter,
        MockTargetClient, SubmitCall,
    };
    use crate::types::KvKey;

    fn make_relayer(
        target: Arc<MockTargetClient>,
        submitter: Arc<MockSubmitter>,
        storage: Arc<InMemoryStore>,
    ) -> Relayer<MockTargetClient, MockConsensus, MockSubmitter, InMemoryStore>
    {
        let metrics = test_metrics();
        let (pending_tx, _pending_rx) = queue::unbounded();
        let kv_processor = KvProcessor::new(
            target.clone(),
            Arc::new(MockConsensus),
            submitter.clone(),
            metrics.clone(),
        );
        let tx_processor = TxProcessor::new(
            target,
            Arc::new(MockConsensus),
            submitter,
            storage,
            pending_tx,
            0,
            metrics.clone(),
        );
        Relayer::new(kv_processor, tx_processor, metrics)
    }

    #[tokio::test]
    async fn routes_queries_by_kind_and_continues_after_failures() {
        let target =
            Arc::new(MockTargetClient::new(200, vec![test_tx(150, 1)]));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let relayer = make_relayer(target, submitter.clone(), storage.clone());

        let (tasks_tx, tasks_rx) = mpsc::channel(8);
        let (_signal, shutdown) = test_shutdown();
        tasks_tx
            .send(RegisteredQuery {
                id: 1,
                kind: QueryKind::Kv,
                kv_keys: vec![KvKey {
                    path: "bank".into(),
                    key: b"k".to_vec(),
                }],
                transactions_filter: String::new(),
            })
            .await
            .unwrap();
        // a malformed TX query fails without stopping the dispatcher
        tasks_tx
            .send(RegisteredQuery {
                id: 2,
                kind: QueryKind::Tx,
                kv_keys: vec![],
                transactions_filter: "not json".into(),
            })
            .await
            .unwrap();
        tasks_tx
            .send(RegisteredQuery {
                id: 3,
                kind: QueryKind::Tx,
                kv_keys: vec![],
                transactions_filter: "[]".into(),
            })
            .await
            .unwrap();
        drop(tasks_tx);

        relayer.run(tasks_rx, shutdown).await.unwrap();

        let calls = submitter.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[0], SubmitCall::Kv { query_id: 1, .. }));
        assert!(
            matches!(&calls[1], SubmitCall::Tx { query_id: 3, height, .. } if *height == 150)
        );
        assert_eq!(storage.last_query_height(3).unwrap(), Some(150));
    }

    #[tokio::test]
    async fn critical_proof_error_terminates_the_dispatcher() {
        let target =
            Arc::new(MockTargetClient::new(200, vec![test_tx(150, 1)]));
        let submitter = Arc::new(MockSubmitter::default());
        submitter.fail_next(crate::Error::CriticalProof("bad proof".into()));
        let storage = Arc::new(InMemoryStore::default());
        let relayer = make_relayer(target, submitter, storage);

        let (tasks_tx, tasks_rx) = mpsc::channel(8);
        let (_signal, shutdown) = test_shutdown();
        tasks_tx
            .send(RegisteredQuery {
                id: 5,
                kind: QueryKind::Tx,
                kv_keys: vec![],
                transactions_filter: "[]".into(),
            })
            .await
            .unwrap();

        let err = relayer.run(tasks_rx, shutdown).await.unwrap_err();
        assert!(err.is_critical_proof());
    }

    #[tokio::test]
    async fn shutdown_stops_the_dispatcher() {
        let target = Arc::new(MockTargetClient::new(10, vec![]));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let relayer = make_relayer(target, submitter, storage);

        let (_tasks_tx, tasks_rx) =
            mpsc::channel::<RegisteredQuery>(1);
        let (signal, shutdown) = test_shutdown();
        let handle = tokio::spawn(relayer.run(tasks_rx, shutdown));
        signal.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
