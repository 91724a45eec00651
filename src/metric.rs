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

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::types::QueryKind;

/// A struct definition for collecting metrics in the relayer.
///
/// Counters live on a per-instance registry so that the operator endpoint
/// serves exactly this relayer's numbers.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Queries processed successfully, labelled by query kind.
    pub success_requests: IntCounterVec,
    /// Queries that failed processing, labelled by query kind.
    pub failed_requests: IntCounterVec,
    /// Wall time spent processing a query, labelled by kind and outcome.
    pub request_duration_seconds: HistogramVec,
    /// Proofs submitted successfully, labelled by query kind.
    pub success_proofs: IntCounterVec,
    /// Proof submissions rejected by the host, labelled by query kind.
    pub failed_proofs: IntCounterVec,
    /// Registration events that could not be decoded into a query.
    pub failed_decodes: IntCounter,
    /// Number of registered queries waiting in the tasks channel.
    pub task_queue_depth: IntGauge,
    /// Submitted transactions the host chain committed successfully.
    pub verified_txs: IntCounter,
    /// Submitted transactions the host chain committed with an error.
    pub commit_failed_txs: IntCounter,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

impl Metrics {
    /// Instantiates the various metrics and their counters, also creates a
    /// registry for the counters and registers the counters.
    pub fn new() -> crate::Result<Self> {
        let registry = Registry::new();

        let success_requests = IntCounterVec::new(
            Opts::new(
                "success_requests",
                "The total number of queries processed successfully",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(success_requests.clone()))?;

        let failed_requests = IntCounterVec::new(
            Opts::new(
                "failed_requests",
                "The total number of queries that failed processing",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(failed_requests.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_duration_seconds",
                "Time spent processing one registered query",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let success_proofs = IntCounterVec::new(
            Opts::new(
                "success_proofs",
                "The total number of proofs submitted to the host chain",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(success_proofs.clone()))?;

        let failed_proofs = IntCounterVec::new(
            Opts::new(
                "failed_proofs",
                "The total number of proof submissions the host refused",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(failed_proofs.clone()))?;

        let failed_decodes = IntCounter::new(
            "failed_decodes",
            "Registration events that could not be decoded into a query",
        )?;
        registry.register(Box::new(failed_decodes.clone()))?;

        let task_queue_depth = IntGauge::new(
            "task_queue_depth",
            "Registered queries currently waiting in the tasks channel",
        )?;
        registry.register(Box::new(task_queue_depth.clone()))?;

        let verified_txs = IntCounter::new(
            "verified_txs",
            "Submitted transactions committed successfully on the host",
        )?;
        registry.register(Box::new(verified_txs.clone()))?;

        let commit_failed_txs = IntCounter::new(
            "commit_failed_txs",
            "Submitted transactions that failed on commit on the host",
        )?;
        registry.register(Box::new(commit_failed_txs.clone()))?;

        Ok(Self {
            registry,
            success_requests,
            failed_requests,
            request_duration_seconds,
            success_proofs,
            failed_proofs,
            failed_decodes,
            task_queue_depth,
            verified_txs,
            commit_failed_txs,
        })
    }

    /// Records one successfully processed query and its duration.
    pub fn add_success_request(&self, kind: QueryKind, seconds: f64) {
        self.success_requests.with_label_values(&[kind.as_str()]).inc();
        self.request_duration_seconds
            .with_label_values(&[kind.as_str(), "success"])
            .observe(seconds);
    }

    /// Records one failed query and its duration.
    pub fn add_failed_request(&self, kind: QueryKind, seconds: f64) {
        self.failed_requests.with_label_values(&[kind.as_str()]).inc();
        self.request_duration_seconds
            .with_label_values(&[kind.as_str(), "failure"])
            .observe(seconds);
    }

    /// Records one accepted proof submission.
    pub fn add_success_proof(&self, kind: QueryKind) {
        self.success_proofs.with_label_values(&[kind.as_str()]).inc();
    }

    /// Records one refused proof submission.
    pub fn add_failed_proof(&self, kind: QueryKind) {
        self.failed_proofs.with_label_values(&[kind.as_str()]).inc();
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> crate::Result<String> {
        let mut buffer = vec![];
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
