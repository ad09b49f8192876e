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

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::{
    error::HarvestError,
    metrics::names as metric_names,
    peer::{AddrInfo, PeerId},
    preimage::{PreimageTable, MAX_CPL},
    reporter::local_now,
    transport::{DhtStream, Message, Transport},
};

/// The minimum number of `FullNeighbourCrawl` iterations, guaranteeing the lower buckets
/// are probed even when early iterations come back empty (spec.md §4.3).
pub const MIN_CPL_ITERATIONS: u8 = 4;

/// Per-worker tunables (spec.md §6, `worker.*` keys).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_back_off_time: Duration,
    pub connect_timeout: Duration,
    pub protocol_strings: Vec<String>,
    #[allow(dead_code)] // carried for parity with spec.md §6; not yet consulted by any handshake.
    pub user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_back_off_time: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(45),
            protocol_strings: vec!["/ipfs/kad/1.0.0".into(), "/ipfs/kad/2.0.0".into()],
            user_agent: String::new(),
        }
    }
}

/// Result of harvesting one peer (spec.md §3): its advertised neighbours and identity info.
#[derive(Debug, Clone)]
pub struct NodeKnows {
    pub id: PeerId,
    /// Discovery-ordered, duplicate-free sequence of neighbours.
    pub knows: Vec<AddrInfo>,
    pub info: BTreeMap<String, String>,
}

/// A partial `FullNeighbourCrawl` result paired with the error that cut it short.
struct PartialHarvest {
    peers: Vec<AddrInfo>,
    error: HarvestError,
}

/// Owns one local p2p host and executes the per-peer full-neighbour-crawl protocol
/// (spec.md §4.3). Holding `Transport` as a type parameter rather than a trait object
/// keeps harvesters as plain values indexed by worker id, per the capability-set
/// re-architecture note in spec.md §9.
pub struct NeighbourHarvester<T: Transport> {
    transport: Arc<T>,
    preimages: Arc<PreimageTable>,
    config: WorkerConfig,
    capacity: usize,
}

impl<T: Transport> NeighbourHarvester<T> {
    pub fn new(transport: Arc<T>, preimages: Arc<PreimageTable>, config: WorkerConfig, capacity: usize) -> Self {
        Self {
            transport,
            preimages,
            config,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `CrawlPeer` (spec.md §4.3).
    #[instrument(skip(self, target), fields(peer = %target.id))]
    pub async fn crawl_peer(&self, target: &AddrInfo) -> Result<NodeKnows, HarvestError> {
        let stripped = target.stripped();
        if !stripped.has_routable_address() {
            return Err(HarvestError::NoRoutableAddress);
        }

        let jitter_bound = self.config.max_back_off_time.as_millis().max(1) as u64;
        let jitter = rand::thread_rng().gen_range(0..jitter_bound);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let deadline = Instant::now() + self.config.connect_timeout;

        let dial_started = Instant::now();
        tokio::time::timeout_at(deadline, self.transport.connect(&stripped))
            .await
            .map_err(|_| HarvestError::DialFailed("dial timed out".into()))?
            .map_err(|e| HarvestError::DialFailed(e.to_string()))?;
        metrics::histogram!(metric_names::WORKER_CONNECT_DURATION_SECONDS).record(dial_started.elapsed().as_secs_f64());

        let mut stream = tokio::time::timeout_at(deadline, self.transport.open_stream(&target.id, &self.config.protocol_strings))
            .await
            .map_err(|_| HarvestError::StreamFailed("stream open timed out".into()))?
            .map_err(|e| HarvestError::StreamFailed(e.to_string()))?;

        let protocol = stream.protocol().to_owned();

        let crawl_result = self.full_neighbour_crawl(&mut stream, deadline).await;
        stream.close().await;

        let peers = match crawl_result {
            Ok(peers) => peers,
            Err(partial) if !partial.peers.is_empty() => {
                debug!("harvest ended early ({}) after learning {} peer(s)", partial.error, partial.peers.len());
                partial.peers
            }
            Err(partial) => return Err(partial.error),
        };

        let version = self.transport.agent_version(&target.id).await;

        info!(addrs = ?stripped.addrs, "connected");

        metrics::histogram!(metric_names::WORKER_RAW_OBTAINED_IDS_PER_PEER).record(peers.len() as f64);

        let mut info = BTreeMap::new();
        info.insert("version".to_string(), version);
        info.insert("protocol".to_string(), protocol);
        info.insert(
            "knows_timestamp".to_string(),
            local_now()
                .format(&time::format_description::well_known::Iso8601::DEFAULT)
                .unwrap_or_default(),
        );

        Ok(NodeKnows {
            id: target.id.clone(),
            knows: peers,
            info,
        })
    }

    /// `FullNeighbourCrawl` (spec.md §4.3): iterates common-prefix-lengths against the
    /// remote's routing table until the minimum/termination/ceiling rule fires.
    async fn full_neighbour_crawl(&self, stream: &mut T::Stream, deadline: Instant) -> Result<Vec<AddrInfo>, PartialHarvest> {
        let mut seen = HashSet::new();
        let mut peers = Vec::new();
        let mut newly_learned_last = usize::MAX;
        let mut cpl: u8 = 0;

        loop {
            if cpl == MAX_CPL {
                return Err(PartialHarvest {
                    peers,
                    error: HarvestError::PrefixLimitReached,
                });
            }
            if cpl >= MIN_CPL_ITERATIONS && newly_learned_last == 0 {
                return Ok(peers);
            }

            let target_key = self
                .preimages
                .find_preimage_for_cpl(cpl)
                .map_err(|e| PartialHarvest { peers: peers.clone(), error: e.into() })?
                .to_vec();

            let request = Message::FindNode { key: target_key, cluster_level: 0 };

            match tokio::time::timeout_at(deadline, stream.write_msg(&request)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(PartialHarvest { peers, error: HarvestError::ProtocolIo(e) }),
                Err(_) => return Err(PartialHarvest { peers, error: HarvestError::ContextDeadline }),
            }

            let response = match tokio::time::timeout_at(deadline, stream.read_msg()).await {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => return Err(PartialHarvest { peers, error: HarvestError::ProtocolIo(e) }),
                Err(_) => return Err(PartialHarvest { peers, error: HarvestError::ContextDeadline }),
            };

            let closer_peers = match response {
                Message::Response { closer_peers } => closer_peers,
                _ => {
                    return Err(PartialHarvest {
                        peers,
                        error: HarvestError::Decode("unexpected message kind in FIND_NODE response".into()),
                    })
                }
            };

            newly_learned_last = 0;
            for wire_peer in &closer_peers {
                let addr_info: AddrInfo = wire_peer.into();
                if seen.insert(addr_info.id.clone()) {
                    peers.push(addr_info);
                    newly_learned_last += 1;
                }
            }

            cpl += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::transport::mock::{MockNetwork, MockTransport, ScriptedPeer};

    fn flat_preimage_table() -> Arc<PreimageTable> {
        let csv: String = (0..=MAX_CPL).map(|cpl| format!("{},{}\n", cpl, hex::encode(vec![cpl; 4]))).collect();
        Arc::new(PreimageTable::parse(csv.as_bytes()).unwrap())
    }

    fn harvester(network: Arc<MockNetwork>) -> NeighbourHarvester<MockTransport> {
        NeighbourHarvester::new(
            Arc::new(MockTransport::new(network)),
            flat_preimage_table(),
            WorkerConfig {
                max_back_off_time: Duration::from_millis(1),
                ..Default::default()
            },
            1,
        )
    }

    #[tokio::test]
    async fn terminates_after_four_empty_iterations() {
        let network = MockNetwork::new();
        let target_id = PeerId::new(vec![1]);
        network.script(&target_id, ScriptedPeer::default());

        let result = harvester(network)
            .crawl_peer(&AddrInfo::new(target_id.clone(), [crate::peer::Multiaddr::new("/ip4/198.51.100.1/tcp/4001")]))
            .await
            .unwrap();

        assert_eq!(result.id, target_id);
        assert!(result.knows.is_empty());
    }

    #[tokio::test]
    async fn exhausts_prefix_ceiling_as_a_success() {
        let network = MockNetwork::new();
        let target_id = PeerId::new(vec![2]);

        let responses = (0..MAX_CPL)
            .map(|cpl| {
                (cpl, vec![crate::transport::WireAddrInfo {
                    id: vec![100 + cpl],
                    addrs: vec!["/ip4/198.51.100.9/tcp/4001".into()],
                    connection: 1,
                }])
            })
            .collect();
        network.script(&target_id, ScriptedPeer { responses, ..Default::default() });

        let result = harvester(network)
            .crawl_peer(&AddrInfo::new(target_id, [crate::peer::Multiaddr::new("/ip4/198.51.100.2/tcp/4001")]))
            .await
            .unwrap();

        assert_eq!(result.knows.len(), MAX_CPL as usize);
    }

    #[tokio::test]
    async fn partial_harvest_on_mid_stream_close_is_still_a_success() {
        let network = MockNetwork::new();
        let target_id = PeerId::new(vec![3]);

        let mut responses = std::collections::HashMap::new();
        for cpl in 0..3u8 {
            responses.insert(cpl, vec![crate::transport::WireAddrInfo {
                id: vec![50 + cpl],
                addrs: vec!["/ip4/198.51.100.9/tcp/4001".into()],
                connection: 1,
            }]);
        }
        network.script(&target_id, ScriptedPeer {
            responses,
            closes_after_cpl: Some(3),
            ..Default::default()
        });

        let result = harvester(network)
            .crawl_peer(&AddrInfo::new(target_id, [crate::peer::Multiaddr::new("/ip4/198.51.100.2/tcp/4001")]))
            .await
            .unwrap();

        assert_eq!(result.knows.len(), 3);
    }

    #[tokio::test]
    async fn local_only_address_is_rejected_without_dialling() {
        let network = MockNetwork::new();
        let target_id = PeerId::new(vec![4]);

        let err = harvester(network)
            .crawl_peer(&AddrInfo::new(target_id, [crate::peer::Multiaddr::new("/ip4/127.0.0.1/tcp/4001")]))
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::NoRoutableAddress));
    }
}
