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
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Interchain Query Relayer 🕸️
//!
//! A relayer for interchain queries: the host chain registers declarative
//! queries against a target chain, and the relayer proves the requested state
//! back to the host so contracts can react to it.
//!
//! ## Overview
//!
//! The host chain emits `registered-interchain-query` events. Each registered
//! query is either:
//!
//!   1. a **KV query**: a set of storage keys to be read from the target
//!      chain at a proven height, or
//!   2. a **TX query**: a transaction filter; every matching target-chain
//!      transaction is delivered with an inclusion proof and the two
//!      consensus headers the host light client needs to verify it.
//!
//! The relayer subscribes to those events, fetches data and proofs from the
//! target chain, and submits proof-bearing transactions back to the host.
//! Submitted transactions are tracked until the host commits or rejects them.
//!
//! The pipeline is: subscriber → bounded task queue → dispatcher → KV/TX
//! processors → submitter, with an unbounded FIFO hand-off from the TX
//! processor to the asynchronous submit checker.

/// A module for configuring the relayer.
pub mod config;
/// A module for locating trusted consensus headers for proof verification.
pub mod consensus;
/// A module for managing the context of the relayer.
pub mod context;
/// Crate-wide error type.
pub mod error;
/// Transaction filter model and search query rendering.
pub mod filter;
/// A module for proving and submitting KV query results.
pub mod kv_processor;
/// Metrics functionality
pub mod metric;
/// A module used for debugging relayer lifecycle, sync state, or other relayer state.
pub mod probe;
/// The unbounded FIFO used to hand submitted transactions to the checker.
pub mod queue;
/// The dispatcher that routes registered queries to their processors.
pub mod relayer;
/// Retry functionality
pub mod retry;
/// A thin JSON-RPC client shared by the chain-facing modules.
pub mod rpc;
/// A module for starting long-running tasks and the operator endpoints.
pub mod service;
/// A module for managing the storage of the relayer.
pub mod store;
/// A module that subscribes to registered-query events on the host chain.
pub mod subscriber;
/// A module for building and broadcasting proof-bearing host transactions.
pub mod submit;
/// Read-side client for the target chain.
pub mod target_client;
/// A module for proving and submitting TX query results.
pub mod tx_processor;
/// A module that finalizes the status of submitted host transactions.
pub mod tx_submit_checker;
/// Core data model shared across the relayer.
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, Result};
