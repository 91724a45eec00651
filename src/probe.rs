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

use derive_more::Display;

/// Target for logger
pub const TARGET: &str = "icq_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the Relayer changes, like starting or shutting down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// The host chain event subscription.
    #[display(fmt = "subscriber")]
    Subscriber,
    /// The registered-query dispatcher.
    #[display(fmt = "dispatcher")]
    Dispatcher,
    /// The submitted transaction checker.
    #[display(fmt = "submit_checker")]
    SubmitChecker,
    /// A transaction search pass against the target chain.
    #[display(fmt = "tx_search")]
    TxSearch,
}
