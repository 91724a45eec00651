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

/// An enum of all possible errors that could be encountered during the
/// execution of the relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying HTTP client.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Error in the underlying HTTP server.
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Prometheus error.
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    /// Error while decoding hex-encoded bytes.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// Error while parsing a socket address.
    #[error(transparent)]
    AddrParse(#[from] std::net::AddrParseError),
    /// The remote RPC endpoint answered with an error object.
    #[error("RPC error {}: {}", code, message)]
    Rpc {
        /// The JSON-RPC error code.
        code: i64,
        /// The JSON-RPC error message.
        message: String,
    },
    /// A transactions filter uses an operator outside {eq, gt, gte, lt, lte}.
    #[error("unsupported filter operator: {}", _0)]
    UnsupportedOperator(String),
    /// A transactions filter could not be decoded.
    #[error("malformed transactions filter: {}", _0)]
    MalformedFilter(String),
    /// A registered query carried a kind other than `kv` or `tx`.
    #[error("unknown query kind: {}", _0)]
    UnknownQueryKind(String),
    /// The host mempool refused the broadcast transaction.
    #[error("broadcast rejected by the host mempool with code {}: {}", code, log)]
    MempoolRejection {
        /// The CheckTx result code.
        code: u32,
        /// The host-reported log line.
        log: String,
    },
    /// A proof was rejected deterministically; retrying cannot fix it and the
    /// process must stop so an operator can investigate.
    #[error("critical proof failure: {}", _0)]
    CriticalProof(String),
    /// The host light client has no consensus state to anchor an update on.
    #[error("no trusted height available on the host light client")]
    NoTrustBasis,
    /// The transaction search stream ended without delivering its terminal
    /// result.
    #[error("transaction search ended without a terminal result")]
    SearchInterrupted,
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

impl Error {
    /// Whether this error is a deterministic proof rejection that must
    /// terminate the process rather than be retried.
    pub fn is_critical_proof(&self) -> bool {
        matches!(self, Error::CriticalProof(_))
    }
}

/// A type alias for the result of the relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
