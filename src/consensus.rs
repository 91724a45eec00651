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

//! Locating a target-chain header the host light client will accept.
//!
//! Proofs submitted to the host are verified against its on-chain light
//! client, so every header we attach must be anchored on a height the light
//! client already trusts. The manager picks the trust basis with the
//! smallest gap to the wanted height and delegates the actual client-update
//! assembly to the [`HeaderUpdater`] primitive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::config::TargetChainConfig;
use crate::error::Error;
use crate::rpc::JsonRpcClient;
use crate::types::TrustedHeader;

/// Produces a header of the target chain at a given height, packaged so the
/// host light client will accept it.
#[async_trait]
pub trait ConsensusManager: Send + Sync {
    /// Returns a header attesting `height`, anchored on the best available
    /// trusted height.
    async fn header_with_best_trusted_height(
        &self,
        height: u64,
    ) -> crate::Result<TrustedHeader>;
}

/// The trust-updating primitive: assembles a client update for
/// `target_height` anchored on the already-trusted `trusted_height`.
#[async_trait]
pub trait HeaderUpdater: Send + Sync {
    /// Builds the update payload, or fails if the anchor cannot verify it.
    async fn build_update(
        &self,
        trusted_height: u64,
        target_height: u64,
    ) -> crate::Result<TrustedHeader>;
}

/// Read access to the heights the host light client already trusts.
#[async_trait]
pub trait TrustBasisSource: Send + Sync {
    /// The consensus-state heights currently accepted on the host.
    async fn trusted_heights(&self) -> crate::Result<Vec<u64>>;
}

/// A [`ConsensusManager`] that tries trust anchors in order of increasing
/// trust gap until one verifies.
#[derive(Debug, Clone)]
pub struct TrustedHeaderManager<B, U> {
    basis: B,
    updater: U,
}

impl<B, U> TrustedHeaderManager<B, U> {
    /// Creates a manager over the given trust basis and updater primitive.
    pub fn new(basis: B, updater: U) -> Self {
        Self { basis, updater }
    }
}

/// Orders candidate anchors by their distance to `height`: the heights at or
/// above it first (closest down), then the ones below (closest up). An
/// anchor above the wanted height verifies directly; anchors below need the
/// updater to walk forward, so they come last.
fn ordered_candidates(mut heights: Vec<u64>, height: u64) -> Vec<u64> {
    heights.sort_unstable();
    heights.dedup();
    let split = heights.partition_point(|&h| h < height);
    let (below, above) = heights.split_at(split);
    above
        .iter()
        .copied()
        .chain(below.iter().rev().copied())
        .collect()
}

#[async_trait]
impl<B, U> ConsensusManager for TrustedHeaderManager<B, U>
where
    B: TrustBasisSource,
    U: HeaderUpdater,
{
    async fn header_with_best_trusted_height(
        &self,
        height: u64,
    ) -> crate::Result<TrustedHeader> {
        let heights = self.basis.trusted_heights().await?;
        let mut last_err = Error::NoTrustBasis;
        for candidate in ordered_candidates(heights, height) {
            match self.updater.build_update(candidate, height).await {
                Ok(header) => return Ok(header),
                Err(e) => {
                    tracing::debug!(
                        trusted_height = candidate,
                        target_height = height,
                        error = %e,
                        "trust anchor did not verify, trying the next one"
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[derive(Serialize)]
struct HeightParams {
    height: u64,
}

/// A [`HeaderUpdater`] that assembles the update payload from target-node
/// RPC data: the signed header of the wanted height, its validator set, and
/// the validator set the anchor already trusts. Signature verification of
/// the payload happens on the host, not here.
#[derive(Debug, Clone)]
pub struct HttpHeaderUpdater {
    rpc: JsonRpcClient,
}

impl HttpHeaderUpdater {
    /// Creates an updater from the target chain configuration.
    pub fn new(config: &TargetChainConfig) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.rpc_endpoint.clone(),
                config.rpc_timeout(),
            )?,
        })
    }
}

#[async_trait]
impl HeaderUpdater for HttpHeaderUpdater {
    async fn build_update(
        &self,
        trusted_height: u64,
        target_height: u64,
    ) -> crate::Result<TrustedHeader> {
        let signed_header: Box<RawValue> = self
            .rpc
            .call("commit", &HeightParams {
                height: target_height,
            })
            .await?;
        let validator_set: Box<RawValue> = self
            .rpc
            .call("validators", &HeightParams {
                height: target_height,
            })
            .await?;
        // the host verifies the update against the validators it trusted at
        // trusted_height + 1
        let trusted_validators: Box<RawValue> = self
            .rpc
            .call("validators", &HeightParams {
                height: trusted_height + 1,
            })
            .await?;
        let payload = serde_json::to_vec(&serde_json::json!({
            "signed_header": signed_header,
            "validator_set": validator_set,
            "trusted_height": trusted_height,
            "trusted_validators": trusted_validators,
        }))?;
        Ok(TrustedHeader {
            height: target_height,
            trusted_height,
            payload,
        })
    }
}

#[derive(Serialize)]
struct TrustedHeightsParams<'a> {
    chain_id: &'a str,
}

#[derive(Deserialize)]
struct TrustedHeightsResult {
    heights: Vec<u64>,
}

/// A [`TrustBasisSource`] that reads the host light client's consensus-state
/// heights over RPC.
#[derive(Debug, Clone)]
pub struct HttpTrustBasisSource {
    rpc: JsonRpcClient,
    target_chain_id: String,
}

impl HttpTrustBasisSource {
    /// Creates a source for the light client tracking `target_chain_id` on
    /// the host configured by `config`.
    pub fn new(
        config: &crate::config::HostChainConfig,
        target_chain_id: &str,
    ) -> crate::Result<Self> {
        Ok(Self {
            rpc: JsonRpcClient::new(
                config.rpc_endpoint.clone(),
                config.rpc_timeout(),
            )?,
            target_chain_id: target_chain_id.to_string(),
        })
    }
}

#[async_trait]
impl TrustBasisSource for HttpTrustBasisSource {
    async fn trusted_heights(&self) -> crate::Result<Vec<u64>> {
        let result: TrustedHeightsResult = self
            .rpc
            .call(
                "light_client_heights",
                &TrustedHeightsParams {
                    chain_id: &self.target_chain_id,
                },
            )
            .await?;
        Ok(result.heights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FixedBasis(Vec<u64>);

    #[async_trait]
    impl TrustBasisSource for FixedBasis {
        async fn trusted_heights(&self) -> crate::Result<Vec<u64>> {
            Ok(self.0.clone())
        }
    }

    struct RecordingUpdater {
        attempts: Mutex<Vec<u64>>,
        fail_first: usize,
    }

    #[async_trait]
    impl HeaderUpdater for RecordingUpdater {
        async fn build_update(
            &self,
            trusted_height: u64,
            target_height: u64,
        ) -> crate::Result<TrustedHeader> {
            let mut attempts = self.attempts.lock();
            attempts.push(trusted_height);
            if attempts.len() <= self.fail_first {
                return Err(Error::Generic("anchor rejected"));
            }
            Ok(TrustedHeader {
                height: target_height,
                trusted_height,
                payload: vec![],
            })
        }
    }

    #[test]
    fn candidates_prefer_smallest_gap_above() {
        assert_eq!(
            ordered_candidates(vec![90, 150, 110, 300], 100),
            vec![110, 150, 300, 90]
        );
        assert_eq!(ordered_candidates(vec![5, 7], 100), vec![7, 5]);
        assert_eq!(ordered_candidates(vec![], 100), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn falls_back_to_the_next_anchor() {
        let manager = TrustedHeaderManager::new(
            FixedBasis(vec![90, 110, 150]),
            RecordingUpdater {
                attempts: Mutex::new(vec![]),
                fail_first: 1,
            },
        );
        let header =
            manager.header_with_best_trusted_height(100).await.unwrap();
        assert_eq!(header.trusted_height, 150);
        assert_eq!(header.height, 100);
        assert_eq!(*manager.updater.attempts.lock(), vec![110, 150]);
    }

    #[tokio::test]
    async fn empty_basis_is_an_error() {
        let manager = TrustedHeaderManager::new(
            FixedBasis(vec![]),
            RecordingUpdater {
                attempts: Mutex::new(vec![]),
                fail_first: 0,
            },
        );
        let err = manager
            .header_with_best_trusted_height(100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoTrustBasis));
    }
}
