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

//! Subscription to `registered-interchain-query` events on the host chain.
//!
//! The subscriber is the producer side of the pipeline: it decodes each
//! event into a [`RegisteredQuery`] and pushes it onto the bounded tasks
//! channel. When the channel is full the push blocks, which is the intended
//! admission control. A subscription failure ends the subscriber and, via
//! the service wiring, shuts the whole process down.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::config::HostChainConfig;
use crate::context::Shutdown;
use crate::error::Error;
use crate::metric::Metrics;
use crate::rpc::JsonRpcClient;
use crate::types::{KvKey, QueryKind, RegisteredQuery};

/// A `registered-interchain-query` event as delivered by the host chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryRegistrationEvent {
    /// The query id assigned by the host chain.
    pub id: u64,
    /// The query kind, `kv` or `tx`.
    pub kind: String,
    /// Requested storage keys, present on KV registrations.
    #[serde(default)]
    pub kv_keys: Vec<KvKey>,
    /// Raw JSON transactions filter, present on TX registrations.
    #[serde(default)]
    pub transactions_filter: String,
}

/// A long-lived feed of query registration events.
#[async_trait]
pub trait EventSource: Send {
    /// The next event. `Ok(None)` means the feed ended cleanly; an error
    /// means the subscription broke and the relayer should shut down.
    async fn next_event(&mut self) -> crate::Result<Option<QueryRegistrationEvent>>;
}

#[derive(Serialize)]
struct RegistrationsParams {
    after: u64,
}

#[derive(Deserialize)]
struct RegistrationsResult {
    events: Vec<QueryRegistrationEvent>,
    next_cursor: u64,
}

/// An [`EventSource`] that polls the host node's registration feed with a
/// monotone cursor.
#[derive(Debug)]
pub struct HttpEventSource {
    rpc: JsonRpcClient,
    cursor: u64,
    poll_interval: Duration,
    buffered: VecDeque<QueryRegistrationEvent>,
}

impl HttpEventSource {
    /// Creates a source from the host chain configuration, starting at the
    /// current end of the feed.
    pub fn new(config: &HostChainConfig) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.rpc_endpoint.clone(),
                config.rpc_timeout(),
            )?,
            cursor: 0,
            poll_interval: config.events_poll_interval(),
            buffered: VecDeque::new(),
        })
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn next_event(&mut self) -> crate::Result<Option<QueryRegistrationEvent>> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(Some(event));
            }
            let result: RegistrationsResult = self
                .rpc
                .call(
                    "registered_queries",
                    &RegistrationsParams { after: self.cursor },
                )
                .await?;
            self.cursor = result.next_cursor;
            if result.events.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }
            self.buffered.extend(result.events);
        }
    }
}

/// Streams registered queries from the host chain into the tasks channel.
pub struct Subscriber<E> {
    source: E,
}

impl<E: EventSource> Subscriber<E> {
    /// Creates a subscriber over the given event source.
    pub fn new(source: E) -> Self {
        Self { source }
    }

    /// Runs until the source ends, the subscription fails, or shutdown is
    /// signalled.
    pub async fn run(
        mut self,
        tasks: mpsc::Sender<RegisteredQuery>,
        mut shutdown: Shutdown,
        metrics: Arc<Mutex<Metrics>>,
    ) -> crate::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signalled, closing the event subscription");
                    return Ok(());
                }
                event = self.source.next_event() => match event? {
                    None => {
                        tracing::info!("host event feed ended");
                        return Ok(());
                    }
                    Some(event) => {
                        let query = match decode_event(event) {
                            Ok(query) => query,
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping undecodable query registration");
                                metrics.lock().await.failed_decodes.inc();
                                continue;
                            }
                        };
                        tracing::debug!(
                            query_id = query.id,
                            kind = %query.kind,
                            "registered query received"
                        );
                        if tasks.send(query).await.is_err() {
                            return Err(Error::Generic("tasks channel closed"));
                        }
                    }
                }
            }
        }
    }
}

/// Builds the typed query out of a raw registration event.
fn decode_event(
    event: QueryRegistrationEvent,
) -> crate::Result<RegisteredQuery> {
    let kind = match event.kind.to_lowercase().as_str() {
        "kv" => QueryKind::Kv,
        "tx" => QueryKind::Tx,
        other => return Err(Error::UnknownQueryKind(other.to_string())),
    };
    Ok(RegisteredQuery {
        id: event.id,
        kind,
        kv_keys: event.kv_keys,
        transactions_filter: event.transactions_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_metrics, test_shutdown};

    struct ScriptedSource {
        events: VecDeque<QueryRegistrationEvent>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_event(
            &mut self,
        ) -> crate::Result<Option<QueryRegistrationEvent>> {
            Ok(self.events.pop_front())
        }
    }

    fn kv_event(id: u64) -> QueryRegistrationEvent {
        QueryRegistrationEvent {
            id,
            kind: "kv".into(),
            kv_keys: vec![KvKey {
                path: "bank".into(),
                key: b"balances/alice".to_vec(),
            }],
            transactions_filter: String::new(),
        }
    }

    #[tokio::test]
    async fn forwards_decoded_queries_in_order() {
        let events = VecDeque::from(vec![
            kv_event(1),
            QueryRegistrationEvent {
                id: 2,
                kind: "TX".into(),
                kv_keys: vec![],
                transactions_filter: "[]".into(),
            },
        ]);
        let subscriber = Subscriber::new(ScriptedSource { events });
        let (tasks_tx, mut tasks_rx) = mpsc::channel(8);
        let (_signal, shutdown) = test_shutdown();

        subscriber
            .run(tasks_tx, shutdown, test_metrics())
            .await
            .unwrap();

        let first = tasks_rx.recv().await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.kind, QueryKind::Kv);
        assert_eq!(first.kv_keys[0].path, "bank");
        let second = tasks_rx.recv().await.unwrap();
        assert_eq!(second.id, 2);
        assert_eq!(second.kind, QueryKind::Tx);
        assert!(tasks_rx.recv().await.is_none());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn skips_unknown_kinds_and_keeps_going() {
        let events = VecDeque::from(vec![
            QueryRegistrationEvent {
                id: 9,
                kind: "proof".into(),
                kv_keys: vec![],
                transactions_filter: String::new(),
            },
            kv_event(10),
        ]);
        let subscriber = Subscriber::new(ScriptedSource { events });
        let (tasks_tx, mut tasks_rx) = mpsc::channel(8);
        let (_signal, shutdown) = test_shutdown();

        subscriber
            .run(tasks_tx, shutdown, test_metrics())
            .await
            .unwrap();

        assert_eq!(tasks_rx.recv().await.unwrap().id, 10);
        assert!(tasks_rx.recv().await.is_none());
        assert!(logs_contain("skipping undecodable query registration"));
    }
}
