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

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod harvester;
pub mod metrics;
pub mod peer;
pub mod preimage;
pub mod reporter;
pub mod tcp_transport;
pub mod transport;

pub use config::Config;
pub use dispatcher::CrawlManager;
pub use error::{HarvestError, PreimageError};
pub use harvester::NeighbourHarvester;
pub use peer::{AddrInfo, Multiaddr, PeerId};
pub use preimage::PreimageTable;
pub use reporter::{local_now, CrawlOutput, Reporter};
pub use tcp_transport::TcpTransport;
pub use transport::{DhtStream, Transport};
