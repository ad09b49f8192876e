// Copyright (C) 2019-2023 Aleo Systems Inc.
// This file is part of the snarkOS library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

/// Failures loading or querying the precomputed preimage table (spec.md §4.1).
#[derive(Debug, Error)]
pub enum PreimageError {
    #[error("couldn't read the preimage file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed preimage row {0:?}")]
    MalformedRow(String),

    #[error("preimage table doesn't cover cpl {0}")]
    MissingCpl(u8),

    #[error("preimage table depth {depth} is below the required minimum of {min}")]
    InsufficientDepth { depth: u8, min: u8 },
}

/// The error taxonomy for one `CrawlPeer` invocation (spec.md §7).
///
/// A harvest that learned at least one peer is reported as a success even when one of
/// these errors terminates the loop early; see `NeighbourHarvester::crawl_peer`.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("all addresses for the peer are local or unroutable")]
    NoRoutableAddress,

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("couldn't open a DHT stream: {0}")]
    StreamFailed(String),

    #[error("protocol I/O error: {0}")]
    ProtocolIo(#[from] std::io::Error),

    #[error("message decode error: {0}")]
    Decode(String),

    #[error("reached the preimage table's cpl ceiling with the loop still progressing")]
    PrefixLimitReached,

    #[error("the harvest's context deadline expired")]
    ContextDeadline,

    #[error("the harvest was cancelled")]
    Cancelled,

    #[error(transparent)]
    Preimage(#[from] PreimageError),
}

impl From<tokio::time::error::Elapsed> for HarvestError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        HarvestError::ContextDeadline
    }
}
