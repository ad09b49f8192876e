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

use std::net::SocketAddr;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// Metric name constants (spec.md §6), mirrored the way `snarkos-node-metrics::names`
/// exposes its own metric names alongside a `register_*` helper per kind.
pub mod names {
    pub const WORKER_CONNECT_DURATION_SECONDS: &str = "crawler_worker_connect_duration_seconds";
    pub const WORKER_RAW_OBTAINED_IDS_PER_PEER: &str = "crawler_worker_raw_obtained_IDs_per_peer";
    pub const CMANAGER_WAITING_FOR_REQUEST_QUEUE_LENGTH: &str = "crawler_cmanager_waiting_for_request_queue_length";
    pub const CMANAGER_NUMBER_NEW_IDS: &str = "crawler_cmanager_number_new_IDs";
    pub const CMANAGER_TOKEN_BUCKET_FREE_CAPACITY: &str = "crawler_cmanager_token_bucket_free_capacity";
}

/// Initialises the global metrics recorder and starts the Prometheus exporter task.
///
/// Returns the exporter's task handle so it can be tracked alongside the crawl's other
/// long-running tasks, the same way `snarkos_node_metrics::initialize_metrics` does.
pub fn initialize_metrics(listen_addr: SocketAddr) -> tokio::task::JoinHandle<()> {
    // Linear 0-45s, step 3s (spec.md §6: "linear buckets 0-45s").
    let connect_duration_buckets: Vec<f64> = (1..=15).map(|i| i as f64 * 3.0).collect();
    // Linear, step 300, 10 buckets (spec.md §6).
    let raw_ids_buckets: Vec<f64> = (1..=10).map(|i| i as f64 * 300.0).collect();

    let builder = PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .set_buckets_for_metric(Matcher::Full(names::WORKER_CONNECT_DURATION_SECONDS.to_string()), &connect_duration_buckets)
        .expect("static bucket layout is always valid")
        .set_buckets_for_metric(Matcher::Full(names::WORKER_RAW_OBTAINED_IDS_PER_PEER.to_string()), &raw_ids_buckets)
        .expect("static bucket layout is always valid");
    let (recorder, exporter) = builder.build().expect("can't build the prometheus exporter");
    metrics::set_global_recorder(recorder).expect("can't install the prometheus recorder");

    metrics::describe_histogram!(names::WORKER_CONNECT_DURATION_SECONDS, "DHT dial duration in seconds");
    metrics::describe_histogram!(names::WORKER_RAW_OBTAINED_IDS_PER_PEER, "raw peer ids obtained per harvested peer");
    metrics::describe_gauge!(
        names::CMANAGER_WAITING_FOR_REQUEST_QUEUE_LENGTH,
        "length of the dispatcher's to-crawl frontier"
    );
    metrics::describe_counter!(names::CMANAGER_NUMBER_NEW_IDS, "newly discovered peer ids, labelled by reachable/all");
    metrics::describe_gauge!(
        names::CMANAGER_TOKEN_BUCKET_FREE_CAPACITY,
        "free token-bucket capacity (capacity - in-flight harvests)"
    );

    tokio::task::spawn(async move {
        exporter.await.expect("can't await the prometheus exporter");
    })
}
