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

//! Wiring of the long-running services and the two operator endpoints: the
//! Prometheus scrape endpoint and the storage-backed status REST endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::mpsc;

use crate::consensus::{HttpHeaderUpdater, HttpTrustBasisSource, TrustedHeaderManager};
use crate::context::RelayerContext;
use crate::kv_processor::KvProcessor;
use crate::queue;
use crate::relayer::Relayer;
use crate::store::{RelayerStorage, SledStore};
use crate::subscriber::{HttpEventSource, Subscriber};
use crate::submit::{HostTxSender, RemoteSigner};
use crate::target_client::HttpTargetClient;
use crate::tx_processor::TxProcessor;
use crate::tx_submit_checker::{HttpTxStatusClient, TxSubmitChecker};
use crate::types::{QueryId, SubmittedTxRecord};

/// Starts all background services: subscriber, dispatcher and submit
/// checker. Does not block; each service runs on its own task and triggers a
/// context shutdown when it fails.
pub async fn ignite(
    ctx: &RelayerContext,
    store: Arc<SledStore>,
) -> crate::Result<()> {
    let config = &ctx.config;
    let target = Arc::new(HttpTargetClient::new(&config.target)?);
    let consensus = Arc::new(TrustedHeaderManager::new(
        HttpTrustBasisSource::new(&config.host, &config.target.chain_id)?,
        HttpHeaderUpdater::new(&config.target)?,
    ));
    let submitter = Arc::new(HostTxSender::new(
        &config.host,
        RemoteSigner::new(&config.host)?,
    )?);

    let (tasks_tx, tasks_rx) =
        mpsc::channel(config.queries_task_queue_capacity);
    let (pending_tx, pending_rx) = queue::unbounded();

    let kv_processor = KvProcessor::new(
        target.clone(),
        consensus.clone(),
        submitter.clone(),
        ctx.metrics.clone(),
    );
    let tx_processor = TxProcessor::new(
        target,
        consensus,
        submitter,
        store.clone(),
        pending_tx,
        config.initial_tx_search_offset,
        ctx.metrics.clone(),
    );
    let relayer = Relayer::new(kv_processor, tx_processor, ctx.metrics.clone());
    let subscriber =
        Subscriber::new(HttpEventSource::new(&config.host)?);
    let checker = TxSubmitChecker::new(
        Arc::new(HttpTxStatusClient::new(&config.host)?),
        store,
        &config.submit_checker,
        ctx.metrics.clone(),
    );

    let subscriber_ctx = ctx.clone();
    let shutdown = ctx.shutdown_signal();
    let metrics = ctx.metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = subscriber.run(tasks_tx, shutdown, metrics).await {
            tracing::error!(error = %e, "subscriber exited with an error");
            subscriber_ctx.shutdown();
        }
    });

    let relayer_ctx = ctx.clone();
    let shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        if let Err(e) = relayer.run(tasks_rx, shutdown).await {
            tracing::error!(error = %e, "relayer exited with an error");
            relayer_ctx.shutdown();
        }
    });

    let checker_ctx = ctx.clone();
    let shutdown = ctx.shutdown_signal();
    tokio::spawn(async move {
        if let Err(e) = checker.run(pending_rx, shutdown).await {
            tracing::error!(error = %e, "submit checker exited with an error");
            checker_ctx.shutdown();
        }
    });

    Ok(())
}

/// Error type for HTTP handlers
pub struct HandlerError(
    /// HTTP status code for response
    pub StatusCode,
    /// Response message
    pub String,
);

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

impl From<crate::Error> for HandlerError {
    fn from(value: crate::Error) -> Self {
        HandlerError(StatusCode::INTERNAL_SERVER_ERROR, value.to_string())
    }
}

/// Serves the Prometheus scrape endpoint until shutdown.
pub async fn serve_metrics(ctx: RelayerContext) -> crate::Result<()> {
    let addr: SocketAddr =
        format!("0.0.0.0:{}", ctx.config.prometheus_port).parse()?;
    let router = Router::new()
        .route("/metrics", get(handle_metrics))
        .with_state(ctx.clone());
    tracing::info!("Starting the metrics server on {}", addr);
    let mut shutdown = ctx.shutdown_signal();
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

async fn handle_metrics(
    State(ctx): State<RelayerContext>,
) -> Result<String, HandlerError> {
    Ok(ctx.metrics.lock().await.gather()?)
}

/// Serves the storage-backed status REST endpoint until shutdown.
pub async fn serve_status<S>(
    ctx: RelayerContext,
    store: Arc<S>,
) -> crate::Result<()>
where
    S: RelayerStorage + 'static,
{
    let addr: SocketAddr =
        format!("0.0.0.0:{}", ctx.config.webserver_port).parse()?;
    let router = Router::new()
        .route("/api/v1/queries/:id/txs", get(handle_query_txs::<S>))
        .route("/api/v1/txs/pending", get(handle_pending_txs::<S>))
        .with_state(store);
    tracing::info!("Starting the status server on {}", addr);
    let mut shutdown = ctx.shutdown_signal();
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

#[derive(serde::Serialize)]
struct QueryTxEntry {
    tx_hash: String,
    #[serde(flatten)]
    record: SubmittedTxRecord,
}

async fn handle_query_txs<S: RelayerStorage>(
    State(store): State<Arc<S>>,
    Path(query_id): Path<QueryId>,
) -> Result<impl IntoResponse, HandlerError> {
    let txs = store.txs_for_query(query_id)?;
    let entries: Vec<QueryTxEntry> = txs
        .into_iter()
        .map(|(tx_hash, record)| QueryTxEntry { tx_hash, record })
        .collect();
    Ok(Json(entries))
}

async fn handle_pending_txs<S: RelayerStorage>(
    State(store): State<Arc<S>>,
) -> Result<impl IntoResponse, HandlerError> {
    Ok(Json(store.all_pending_txs()?))
}
