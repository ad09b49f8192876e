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

use std::{collections::HashMap, sync::Arc, time::Duration};

use kad_crawler::{
    dispatcher::CrawlManager,
    harvester::{NeighbourHarvester, WorkerConfig},
    peer::{AddrInfo, Multiaddr, PeerId},
    preimage::{PreimageTable, MAX_CPL},
    transport::{
        mock::{MockNetwork, MockTransport, ScriptedPeer},
        WireAddrInfo,
    },
};

fn flat_preimage_table() -> Arc<PreimageTable> {
    let csv: String = (0..=MAX_CPL).map(|cpl| format!("{cpl},{}\n", hex::encode(vec![cpl; 4]))).collect();
    Arc::new(PreimageTable::parse(csv.as_bytes()).unwrap())
}

fn worker(network: Arc<MockNetwork>, capacity: usize) -> NeighbourHarvester<MockTransport> {
    NeighbourHarvester::new(
        Arc::new(MockTransport::new(network)),
        flat_preimage_table(),
        WorkerConfig {
            max_back_off_time: Duration::from_millis(1),
            ..Default::default()
        },
        capacity,
    )
}

fn addr(id: u8, addr: &str) -> AddrInfo {
    AddrInfo::new(PeerId::new(vec![id]), [Multiaddr::new(addr.to_string())])
}

/// A fan-out topology wide enough to exercise a multi-worker token bucket: one bootstrap
/// that advertises several neighbours, each reachable and neighbour-less, crawled across
/// more capacity than there are peers.
#[tokio::test]
async fn fan_out_is_fully_drained_with_spare_capacity() {
    let network = MockNetwork::new();
    let root = PeerId::new(vec![0]);

    let leaves: Vec<PeerId> = (1..=5u8).map(|i| PeerId::new(vec![i])).collect();
    let mut root_responses = HashMap::new();
    root_responses.insert(
        0,
        leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| WireAddrInfo {
                id: leaf.0.clone(),
                addrs: vec![format!("/ip4/198.51.100.{}/tcp/4001", 20 + i)],
                connection: 1,
            })
            .collect(),
    );
    network.script(&root, ScriptedPeer { responses: root_responses, ..Default::default() });
    for leaf in &leaves {
        network.script(leaf, ScriptedPeer::default());
    }

    let workers = vec![worker(network.clone(), 2), worker(network.clone(), 3)];
    let manager = CrawlManager::new(workers, 32);

    let output = manager.crawl_network(vec![addr(0, "/ip4/198.51.100.1/tcp/4001")]).await;

    assert_eq!(output.nodes.len(), 6);
    assert!(output.nodes.values().all(|n| n.reachable));
}

/// A peer at the prefix ceiling is still reported, with every discovered neighbour present
/// and duplicate-free even though several cpl iterations advertise overlapping ids.
#[tokio::test]
async fn prefix_ceiling_peer_has_duplicate_free_neighbours() {
    let network = MockNetwork::new();
    let target = PeerId::new(vec![9]);

    let mut responses = HashMap::new();
    for cpl in 0..MAX_CPL {
        // Every iteration re-advertises peer `100` alongside a fresh one; only the fresh
        // ones should survive dedup.
        responses.insert(
            cpl,
            vec![
                WireAddrInfo { id: vec![100], addrs: vec!["/ip4/198.51.100.50/tcp/4001".into()], connection: 1 },
                WireAddrInfo { id: vec![100 + cpl + 1], addrs: vec!["/ip4/198.51.100.60/tcp/4001".into()], connection: 1 },
            ],
        );
    }
    network.script(&target, ScriptedPeer { responses, ..Default::default() });
    network.script(&PeerId::new(vec![100]), ScriptedPeer::default());
    for cpl in 0..MAX_CPL {
        network.script(&PeerId::new(vec![100 + cpl + 1]), ScriptedPeer::default());
    }

    let manager = CrawlManager::new(vec![worker(network, 4)], 64);
    let output = manager.crawl_network(vec![addr(9, "/ip4/198.51.100.2/tcp/4001")]).await;

    let target_node = &output.nodes[&target.to_string()];
    assert_eq!(target_node.neighbours.len(), MAX_CPL as usize + 1);

    let mut unique = target_node.neighbours.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), target_node.neighbours.len());
}

/// Running the same mocked network through two independent crawls yields identical node
/// sets and neighbour sets, modulo timestamps and `knows` ordering (spec.md §8).
#[tokio::test]
async fn running_the_crawl_twice_against_a_static_network_yields_identical_snapshots() {
    let network = MockNetwork::new();
    let root = PeerId::new(vec![0]);
    let leaf = PeerId::new(vec![1]);

    let mut root_responses = HashMap::new();
    root_responses.insert(
        0,
        vec![WireAddrInfo {
            id: leaf.0.clone(),
            addrs: vec!["/ip4/198.51.100.21/tcp/4001".into()],
            connection: 1,
        }],
    );
    network.script(&root, ScriptedPeer { responses: root_responses, ..Default::default() });
    network.script(&leaf, ScriptedPeer::default());

    let first = CrawlManager::new(vec![worker(network.clone(), 2)], 16)
        .crawl_network(vec![addr(0, "/ip4/198.51.100.1/tcp/4001")])
        .await;
    let second = CrawlManager::new(vec![worker(network.clone(), 2)], 16)
        .crawl_network(vec![addr(0, "/ip4/198.51.100.1/tcp/4001")])
        .await;

    fn summarize(output: &kad_crawler::CrawlOutput) -> Vec<(String, bool, Vec<String>)> {
        let mut rows: Vec<_> = output
            .nodes
            .values()
            .map(|n| {
                let mut neighbours = n.neighbours.clone();
                neighbours.sort();
                (n.id.clone(), n.reachable, neighbours)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    assert_eq!(summarize(&first), summarize(&second));
}

/// `CrawlOutput` round-trips through JSON without losing any reported peer.
#[tokio::test]
async fn snapshot_is_idempotent_across_a_json_round_trip() {
    let network = MockNetwork::new();
    let a = PeerId::new(vec![1]);
    network.script(&a, ScriptedPeer::default());

    let manager = CrawlManager::new(vec![worker(network, 1)], 8);
    let output = manager.crawl_network(vec![addr(1, "/ip4/198.51.100.1/tcp/4001")]).await;

    let json = serde_json::to_string(&output).unwrap();
    let restored: kad_crawler::CrawlOutput = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.nodes.len(), output.nodes.len());
    for (id, node) in &output.nodes {
        assert_eq!(restored.nodes[id].reachable, node.reachable);
    }
}
