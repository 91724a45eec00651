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

//! Processing of TX queries: search the target chain above the query's
//! watermark, prove every new match, submit it, and hand the submitted
//! transaction to the checker.
//!
//! The watermark for a height is persisted only once a transaction of a
//! *higher* block arrives (or the stream ends cleanly). The search stream is
//! ordered, so that is the earliest moment the block's match set is known to
//! be complete; persisting earlier could skip same-block transactions on
//! restart. Do not simplify this to persisting on every transaction.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::consensus::ConsensusManager;
use crate::error::Error;
use crate::filter::{self, FilterClause, FilterOp, FilterValue, TX_HEIGHT_FIELD};
use crate::metric::Metrics;
use crate::store::RelayerStorage;
use crate::submit::Submitter;
use crate::target_client::TargetClient;
use crate::types::{
    now_ms, MessageTx, PendingSubmittedTxInfo, ProvenTx, QueryId, QueryKind,
    SubmittedTxInfo, SubmittedTxStatus, Transaction,
};

/// Proves and submits the results of TX queries, maintaining each query's
/// watermark and the per-transaction submission records.
pub struct TxProcessor<T, C, S, St> {
    target: Arc<T>,
    consensus: Arc<C>,
    submitter: Arc<S>,
    storage: Arc<St>,
    /// Enqueue half of the unbounded FIFO towards the submit checker.
    pending: mpsc::Sender<PendingSubmittedTxInfo>,
    initial_tx_search_offset: u64,
    metrics: Arc<Mutex<Metrics>>,
}

impl<T, C, S, St> TxProcessor<T, C, S, St>
where
    T: TargetClient,
    C: ConsensusManager,
    S: Submitter,
    St: RelayerStorage,
{
    /// Creates a processor over the given collaborators.
    pub fn new(
        target: Arc<T>,
        consensus: Arc<C>,
        submitter: Arc<S>,
        storage: Arc<St>,
        pending: mpsc::Sender<PendingSubmittedTxInfo>,
        initial_tx_search_offset: u64,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Self {
        Self {
            target,
            consensus,
            submitter,
            storage,
            pending,
            initial_tx_search_offset,
            metrics,
        }
    }

    /// Runs one search-and-submit pass for a TX query.
    pub async fn process_message_tx(&self, msg: &MessageTx) -> crate::Result<()> {
        let query = self.build_search_query(msg).await?;
        tracing::debug!(
            target: crate::probe::TARGET,
            kind = %crate::probe::Kind::TxSearch,
            query_id = msg.query_id,
            query = %query,
            "searching transactions"
        );

        let mut search = self.target.search_transactions(&query).await?;
        let mut last_processed_height = 0u64;
        while let Some(tx) = search.txs.recv().await {
            if tx.height > last_processed_height && last_processed_height > 0 {
                // the previous block is complete now that a higher one arrived
                self.storage
                    .set_last_query_height(msg.query_id, last_processed_height)?;
                tracing::debug!(
                    query_id = msg.query_id,
                    processed_height = last_processed_height,
                    next_height_to_process = tx.height,
                    "block completely processed"
                );
            }
            last_processed_height = tx.height;

            let hash = tx.hash();
            if self.storage.tx_exists(msg.query_id, &hash)? {
                tracing::debug!(
                    query_id = msg.query_id,
                    hash = %hash,
                    height = tx.height,
                    "transaction already submitted"
                );
                continue;
            }
            self.process_and_submit(msg.query_id, &tx).await?;
        }

        match search.done.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::SearchInterrupted),
        }

        if last_processed_height > 0 {
            self.storage
                .set_last_query_height(msg.query_id, last_processed_height)?;
            tracing::debug!(
                query_id = msg.query_id,
                processed_height = last_processed_height,
                "the final block completely processed"
            );
        } else {
            tracing::debug!(
                query_id = msg.query_id,
                "no results found for the query"
            );
        }
        Ok(())
    }

    /// Proves one matched transaction and submits it, recording the outcome.
    /// Skips transactions that already carry a record, which guards against
    /// races with an earlier pass that failed before persisting its status.
    pub async fn process_and_submit(
        &self,
        query_id: QueryId,
        tx: &Transaction,
    ) -> crate::Result<()> {
        let hash = tx.hash();
        if self.storage.tx_exists(query_id, &hash)? {
            tracing::debug!(
                query_id,
                hash = %hash,
                "transaction already submitted"
            );
            return Ok(());
        }
        let proven_tx = self.prepare_headers(tx).await?;
        self.submit_tx_with_proof(query_id, &hash, &proven_tx).await
    }

    /// Fetches the two headers proof verification needs: one attesting the
    /// transaction's height and one attesting the next height, whose last
    /// commit validates the first. Neither may be omitted.
    async fn prepare_headers(&self, tx: &Transaction) -> crate::Result<ProvenTx> {
        let header = self
            .consensus
            .header_with_best_trusted_height(tx.height)
            .await?;
        let next_header = self
            .consensus
            .header_with_best_trusted_height(tx.height + 1)
            .await?;
        Ok(ProvenTx {
            header,
            next_header,
            tx: tx.clone(),
        })
    }

    async fn submit_tx_with_proof(
        &self,
        query_id: QueryId,
        hash: &str,
        proven_tx: &ProvenTx,
    ) -> crate::Result<()> {
        match self.submitter.submit_tx_proof(query_id, proven_tx).await {
            Err(e) => {
                self.metrics.lock().await.add_failed_proof(QueryKind::Tx);
                self.storage.set_tx_status(
                    query_id,
                    hash,
                    "",
                    SubmittedTxInfo {
                        status: SubmittedTxStatus::ErrorOnSubmit,
                        message: e.to_string(),
                    },
                )?;
                Err(e)
            }
            Ok(host_tx_hash) => {
                self.metrics.lock().await.add_success_proof(QueryKind::Tx);
                self.storage.set_tx_status(
                    query_id,
                    hash,
                    &host_tx_hash,
                    SubmittedTxInfo {
                        status: SubmittedTxStatus::Submitted,
                        message: String::new(),
                    },
                )?;
                // the FIFO grows without bound, so this send cannot wedge the
                // processor behind a slow checker
                if self
                    .pending
                    .send(PendingSubmittedTxInfo {
                        query_id,
                        submitted_tx_hash: hash.to_string(),
                        host_tx_hash,
                        submitted_at_ms: now_ms(),
                    })
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        query_id,
                        "submit checker queue is closed, dropping notification"
                    );
                }
                tracing::info!(query_id, "proof submitted successfully");
                Ok(())
            }
        }
    }

    /// Renders the search query: the decoded filter plus the always-appended
    /// `tx.height > watermark` clause. The filter is decoded before the
    /// watermark is touched, so an invalid query mutates no state.
    async fn build_search_query(&self, msg: &MessageTx) -> crate::Result<String> {
        let mut clauses = filter::parse_filter(&msg.transactions_filter)?;
        let watermark = self.last_query_height_or_init(msg.query_id).await?;
        clauses.push(FilterClause {
            field: TX_HEIGHT_FIELD.to_string(),
            op: FilterOp::Gt,
            value: FilterValue::Number(watermark),
        });
        Ok(filter::render_query(&clauses))
    }

    /// Returns the query's watermark, initializing a never-seen query to zero
    /// or, when an initial offset is configured, to `latest - offset` if that
    /// difference is positive.
    async fn last_query_height_or_init(
        &self,
        query_id: QueryId,
    ) -> crate::Result<u64> {
        if let Some(height) = self.storage.last_query_height(query_id)? {
            return Ok(height);
        }
        let mut height = 0u64;
        if self.initial_tx_search_offset != 0 {
            let latest = self.target.latest_height().await?;
            if latest > self.initial_tx_search_offset {
                height = latest - self.initial_tx_search_offset;
            }
            tracing::debug!(
                query_id,
                initial_height = height,
                offset = self.initial_tx_search_offset,
                "set initial height"
            );
        }
        self.storage.set_last_query_height(query_id, height)?;
        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue;
    use crate::store::InMemoryStore;
    use crate::test_utils::{
        test_metrics, test_tx, MockConsensus, MockSubmitter, MockTargetClient,
        SubmitCall,
    };

    fn make_processor(
        target: Arc<MockTargetClient>,
        submitter: Arc<MockSubmitter>,
        storage: Arc<InMemoryStore>,
        offset: u64,
    ) -> (
        TxProcessor<MockTargetClient, MockConsensus, MockSubmitter, InMemoryStore>,
        mpsc::Receiver<PendingSubmittedTxInfo>,
    ) {
        let (pending_tx, pending_rx) = queue::unbounded();
        let processor = TxProcessor::new(
            target,
            Arc::new(MockConsensus),
            submitter,
            storage,
            pending_tx,
            offset,
            test_metrics(),
        );
        (processor, pending_rx)
    }

    fn msg(query_id: QueryId) -> MessageTx {
        MessageTx {
            query_id,
            transactions_filter:
                r#"[{"field":"transfer.recipient","op":"eq","value":"alice"}]"#
                    .into(),
        }
    }

    #[tokio::test]
    async fn two_matches_submit_in_order_and_advance_watermark() {
        let target = Arc::new(MockTargetClient::new(
            101,
            vec![test_tx(100, 1), test_tx(101, 2)],
        ));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let (processor, mut pending_rx) =
            make_processor(target.clone(), submitter.clone(), storage.clone(), 0);

        processor.process_message_tx(&msg(1)).await.unwrap();

        assert_eq!(
            target.searches(),
            vec!["transfer.recipient='alice' AND tx.height>0".to_string()]
        );
        let calls = submitter.calls();
        assert_eq!(calls.len(), 2);
        assert!(
            matches!(&calls[0], SubmitCall::Tx { height, .. } if *height == 100)
        );
        assert!(
            matches!(&calls[1], SubmitCall::Tx { height, .. } if *height == 101)
        );
        assert_eq!(storage.last_query_height(1).unwrap(), Some(101));

        // both records exist in Submitted state and were handed to the checker
        for tx in [test_tx(100, 1), test_tx(101, 2)] {
            let hash = tx.hash();
            assert!(storage.tx_exists(1, &hash).unwrap());
            let item = pending_rx.recv().await.unwrap();
            assert_eq!(item.submitted_tx_hash, hash);
        }
    }

    #[tokio::test]
    async fn restart_mid_pass_dedups_and_catches_up() {
        let txs = vec![test_tx(100, 1), test_tx(101, 2)];
        let storage = Arc::new(InMemoryStore::default());

        // first pass dies after submitting tx@100, before tx@101 is even
        // observed: height 100 was never complete, so the watermark stays 0
        let crashing = Arc::new(MockTargetClient::new(101, txs.clone()));
        crashing.fail_search_after(1, crate::Error::Generic("connection reset"));
        let submitter = Arc::new(MockSubmitter::default());
        let (processor, _pending) =
            make_processor(crashing, submitter.clone(), storage.clone(), 0);
        processor.process_message_tx(&msg(1)).await.unwrap_err();
        assert_eq!(submitter.calls().len(), 1);
        assert_eq!(storage.last_query_height(1).unwrap(), Some(0));
        assert!(storage.tx_exists(1, &txs[0].hash()).unwrap());

        // the retry pass searches from scratch, skips tx@100 via its record,
        // submits tx@101, and retires both heights
        let target = Arc::new(MockTargetClient::new(101, txs.clone()));
        let submitter2 = Arc::new(MockSubmitter::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter2.clone(), storage.clone(), 0);
        processor.process_message_tx(&msg(1)).await.unwrap();

        assert_eq!(
            target.searches(),
            vec!["transfer.recipient='alice' AND tx.height>0".to_string()]
        );
        let calls = submitter2.calls();
        assert_eq!(calls.len(), 1);
        assert!(
            matches!(&calls[0], SubmitCall::Tx { height, .. } if *height == 101)
        );
        assert_eq!(storage.last_query_height(1).unwrap(), Some(101));
    }

    #[tokio::test]
    async fn critical_proof_error_stops_the_pass_and_keeps_prior_records() {
        let target = Arc::new(MockTargetClient::new(
            101,
            vec![test_tx(100, 1), test_tx(101, 2)],
        ));
        let submitter = Arc::new(MockSubmitter::default());
        submitter
            .fail_nth(1, crate::Error::CriticalProof("inconsistent proof".into()));
        let storage = Arc::new(InMemoryStore::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter.clone(), storage.clone(), 0);

        let err = processor.process_message_tx(&msg(4)).await.unwrap_err();
        assert!(err.is_critical_proof());

        // the first submission's record is intact
        let first_hash = test_tx(100, 1).hash();
        let txs = storage.txs_for_query(4).unwrap();
        let first = txs.iter().find(|(h, _)| *h == first_hash).unwrap();
        assert_eq!(first.1.info.status, SubmittedTxStatus::Submitted);
    }

    #[tokio::test]
    async fn offset_initializes_fresh_watermark_below_tip() {
        let target = Arc::new(MockTargetClient::new(1_000, vec![]));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter, storage.clone(), 100);

        processor.process_message_tx(&msg(6)).await.unwrap();

        assert_eq!(storage.last_query_height(6).unwrap(), Some(900));
        assert_eq!(
            target.searches(),
            vec!["transfer.recipient='alice' AND tx.height>900".to_string()]
        );
    }

    #[tokio::test]
    async fn offset_larger_than_tip_starts_at_zero() {
        let target = Arc::new(MockTargetClient::new(50, vec![]));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter, storage.clone(), 100);

        processor.process_message_tx(&msg(6)).await.unwrap();
        assert_eq!(storage.last_query_height(6).unwrap(), Some(0));
    }

    #[tokio::test]
    async fn empty_search_leaves_watermark_unchanged() {
        let target = Arc::new(MockTargetClient::new(500, vec![]));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        storage.set_last_query_height(2, 123).unwrap();
        let (processor, _pending) =
            make_processor(target.clone(), submitter, storage.clone(), 0);

        processor.process_message_tx(&msg(2)).await.unwrap();
        assert_eq!(storage.last_query_height(2).unwrap(), Some(123));
        assert_eq!(
            target.searches(),
            vec!["transfer.recipient='alice' AND tx.height>123".to_string()]
        );
    }

    #[tokio::test]
    async fn stream_error_keeps_watermark_at_last_complete_height() {
        // three matches across two blocks; the stream breaks after the second
        let target = Arc::new(MockTargetClient::new(
            102,
            vec![test_tx(100, 1), test_tx(101, 2), test_tx(102, 3)],
        ));
        target.fail_search_after(2, crate::Error::Generic("stream reset"));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter.clone(), storage.clone(), 0);

        processor.process_message_tx(&msg(3)).await.unwrap_err();

        // only height 100 was retired; 101 was still in flight
        assert_eq!(storage.last_query_height(3).unwrap(), Some(100));
        assert_eq!(submitter.calls().len(), 2);
    }

    #[tokio::test]
    async fn same_block_matches_are_all_processed_before_retiring_it() {
        let target = Arc::new(MockTargetClient::new(
            100,
            vec![test_tx(100, 1), test_tx(100, 2), test_tx(100, 3)],
        ));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter.clone(), storage.clone(), 0);

        processor.process_message_tx(&msg(9)).await.unwrap();
        assert_eq!(submitter.calls().len(), 3);
        assert_eq!(storage.last_query_height(9).unwrap(), Some(100));
    }

    #[tokio::test]
    async fn malformed_filter_is_rejected_without_state_change() {
        let target = Arc::new(MockTargetClient::new(100, vec![]));
        let submitter = Arc::new(MockSubmitter::default());
        let storage = Arc::new(InMemoryStore::default());
        let (processor, _pending) =
            make_processor(target.clone(), submitter.clone(), storage.clone(), 0);

        let bad = MessageTx {
            query_id: 8,
            transactions_filter: r#"[{"field":"a","op":"between","value":1}]"#
                .into(),
        };
        let err = processor.process_message_tx(&bad).await.unwrap_err();
        assert!(matches!(err, Error::MalformedFilter(_)));
        assert!(target.searches().is_empty());
        assert!(submitter.calls().is_empty());
        // not even the watermark was initialized
        assert_eq!(storage.last_query_height(8).unwrap(), None);
    }
}
