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
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use tokio::{sync::mpsc, time::Instant};
use tracing::{info, warn};

use crate::{
    error::HarvestError,
    harvester::NeighbourHarvester,
    metrics::names as metric_names,
    peer::{AddrInfo, Multiaddr, PeerId},
    reporter::{local_now, Reporter},
    transport::Transport,
};

/// 60 seconds with no report implies the network is exhausted or unreachable (spec.md §4.4).
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Human-readable status log cadence.
const INFO_TICKER_INTERVAL: Duration = Duration::from_secs(20);
/// Gauge refresh cadence.
const PROM_TICKER_INTERVAL: Duration = Duration::from_secs(1);

/// Per-PeerID state maintained by the dispatcher alone (spec.md §3). Never exposed to
/// workers — they only ever see a target `AddrInfo` and return a `NodeKnows`.
#[derive(Debug, Clone, Default)]
pub struct CrawledState {
    pub addrs: BTreeSet<Multiaddr>,
    pub reachable: bool,
    pub neighbours: Vec<PeerId>,
    pub info: BTreeMap<String, String>,
}

struct CrawlReport {
    node: AddrInfo,
    result: Result<crate::harvester::NodeKnows, HarvestError>,
}

/// Event loop mediating the frontier, token bucket, result intake, dedup, and
/// idle-timeout termination (spec.md §4.4). Owns `crawled`/the frontier exclusively;
/// per-harvest tasks only ever talk back through `reports`/`token_bucket`.
pub struct CrawlManager<T: Transport> {
    workers: Arc<Vec<NeighbourHarvester<T>>>,
    capacity: usize,
    frontier: VecDeque<AddrInfo>,
    crawled: HashMap<PeerId, CrawledState>,
    token_tx: mpsc::Sender<usize>,
    token_rx: mpsc::Receiver<usize>,
    reports_tx: mpsc::Sender<CrawlReport>,
    reports_rx: mpsc::Receiver<CrawlReport>,
    in_flight: usize,
}

impl<T: Transport + 'static> CrawlManager<T> {
    pub fn new(workers: Vec<NeighbourHarvester<T>>, report_queue_size: usize) -> Self {
        let capacities: Vec<usize> = workers.iter().map(NeighbourHarvester::capacity).collect();
        let capacity: usize = capacities.iter().sum();

        let (token_tx, token_rx) = mpsc::channel(capacity.max(1));
        seed_token_bucket(&token_tx, &capacities);

        let (reports_tx, reports_rx) = mpsc::channel(report_queue_size.max(1));

        Self {
            workers: Arc::new(workers),
            capacity,
            frontier: VecDeque::new(),
            crawled: HashMap::new(),
            token_tx,
            token_rx,
            reports_tx,
            reports_rx,
            in_flight: 0,
        }
    }

    /// `CrawlNetwork` (spec.md §4.4).
    pub async fn crawl_network(mut self, bootstraps: Vec<AddrInfo>) -> crate::reporter::CrawlOutput {
        let start = local_now();

        for bootstrap in bootstraps {
            self.handle_input(bootstrap);
        }

        let mut info_ticker = tokio::time::interval(INFO_TICKER_INTERVAL);
        let mut prom_ticker = tokio::time::interval(PROM_TICKER_INTERVAL);
        let mut last_activity = Instant::now();

        loop {
            // Termination: the frontier, the in-flight set, and the report queue are all empty.
            // `in_flight == 0` already implies the report queue is empty: it's decremented only
            // when a report is drained, one-for-one with every harvest that was ever spawned.
            if self.in_flight == 0 && self.frontier.is_empty() {
                break;
            }

            let idle_deadline = last_activity + IDLE_TIMEOUT;

            tokio::select! {
                Some(report) = self.reports_rx.recv() => {
                    self.in_flight -= 1;
                    last_activity = Instant::now();
                    self.handle_report(report);
                }
                Some(worker_id) = self.token_rx.recv(), if !self.frontier.is_empty() => {
                    // If the frontier were empty this branch is disabled above, which is
                    // equivalent to "push the token back" without an explicit re-send.
                    let node = self.frontier.pop_front().expect("frontier checked non-empty above");
                    self.in_flight += 1;
                    self.spawn_harvest(node, worker_id);
                }
                _ = info_ticker.tick() => {
                    self.log_status();
                }
                _ = prom_ticker.tick() => {
                    self.update_gauges();
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    warn!("idle timeout reached with no report in {:?}; terminating the crawl", IDLE_TIMEOUT);
                    break;
                }
            }
        }

        let end = local_now();
        Reporter::build(start, end, self.crawled)
    }

    fn spawn_harvest(&self, node: AddrInfo, worker_id: usize) {
        let workers = self.workers.clone();
        let reports_tx = self.reports_tx.clone();
        let token_tx = self.token_tx.clone();

        tokio::task::spawn(async move {
            let result = workers[worker_id].crawl_peer(&node).await;
            // The token is returned on every exit path, preserving the capacity invariant
            // even when the harvest itself failed.
            let _ = reports_tx.send(CrawlReport { node, result }).await;
            let _ = token_tx.send(worker_id).await;
        });
    }

    /// `HandleInput` (spec.md §4.4). Returns `true` if `p` was previously unseen.
    fn handle_input(&mut self, p: AddrInfo) -> bool {
        let stripped = p.stripped();

        match self.crawled.get_mut(&stripped.id) {
            Some(state) if state.reachable => false,
            Some(state) => {
                let new_addrs: BTreeSet<Multiaddr> = stripped.addrs.difference(&state.addrs).cloned().collect();
                if new_addrs.is_empty() {
                    return false;
                }
                state.addrs.extend(new_addrs.iter().cloned());
                self.frontier.push_back(AddrInfo {
                    id: stripped.id,
                    addrs: new_addrs,
                });
                false
            }
            None => {
                self.crawled.insert(
                    stripped.id.clone(),
                    CrawledState {
                        addrs: stripped.addrs.clone(),
                        reachable: false,
                        neighbours: Vec::new(),
                        info: BTreeMap::new(),
                    },
                );
                self.frontier.push_back(stripped);
                true
            }
        }
    }

    fn handle_report(&mut self, report: CrawlReport) {
        match report.result {
            Ok(node_knows) => {
                let was_reachable = self.crawled.get(&node_knows.id).map(|s| s.reachable).unwrap_or(false);

                let state = self.crawled.entry(node_knows.id.clone()).or_default();
                state.reachable = true;
                state.neighbours = node_knows.knows.iter().map(|a| a.id.clone()).collect();
                // Last-writer-wins: `info` is overwritten, not merged, on re-crawl (spec.md §9).
                state.info = node_knows.info.clone();

                let mut newly_seen = 0u64;
                for addr_info in node_knows.knows {
                    if self.handle_input(addr_info) {
                        newly_seen += 1;
                    }
                }

                metrics::counter!(metric_names::CMANAGER_NUMBER_NEW_IDS, "reachable" => "all").increment(newly_seen);
                if !was_reachable {
                    metrics::counter!(metric_names::CMANAGER_NUMBER_NEW_IDS, "reachable" => "reachable").increment(1);
                }
            }
            Err(error) => {
                warn!(peer = %report.node.id, %error, "harvest failed");
            }
        }
    }

    fn log_status(&self) {
        let reachable = self.crawled.values().filter(|s| s.reachable).count();
        info!(
            known = self.crawled.len(),
            reachable,
            frontier = self.frontier.len(),
            in_flight = self.in_flight,
            "crawl status"
        );
    }

    fn update_gauges(&self) {
        metrics::gauge!(metric_names::CMANAGER_WAITING_FOR_REQUEST_QUEUE_LENGTH).set(self.frontier.len() as f64);
        metrics::gauge!(metric_names::CMANAGER_TOKEN_BUCKET_FREE_CAPACITY).set((self.capacity - self.in_flight) as f64);
    }
}

/// Seeds the token bucket via round-robin interleaving (spec.md §4.4) so heterogeneous
/// worker capacities are drained fairly rather than one worker monopolising early tokens.
///
/// The reference's seeding condition is `capacity >= iter`, which over-seeds the bucket by
/// one token per worker (see DESIGN.md's Open Questions). This uses the corrected `>`
/// condition, which seeds exactly `sum(capacities)` tokens — the bucket is sized to that
/// exact total, so the off-by-one variant would deadlock this implementation outright.
fn seed_token_bucket(tx: &mpsc::Sender<usize>, capacities: &[usize]) {
    let max_capacity = capacities.iter().copied().max().unwrap_or(0);
    for iter in 0..max_capacity {
        for (worker_id, &capacity) in capacities.iter().enumerate() {
            if capacity > iter {
                tx.try_send(worker_id).expect("token bucket sized to the sum of worker capacities");
            }
        }
    }
}
