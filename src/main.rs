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

use std::{collections::BTreeMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kad_crawler::{
    config::{Config, ConfigFile, Opts},
    dispatcher::CrawlManager,
    harvester::{NeighbourHarvester, WorkerConfig},
    metrics,
    peer::{AddrInfo, Multiaddr, PeerId},
    preimage::PreimageTable,
    reporter::{local_now, Reporter},
    tcp_transport::TcpTransport,
};

/// The number of concurrent workers spun up to share the harvest capacity, mirroring
/// `snarkos-crawler`'s fixed worker-pool sizing rather than spec.md §4.4's abstract
/// per-worker `c_i` (each worker here is simply given an equal slice of `config.queue_size`).
const WORKER_COUNT: usize = 8;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Parses a bootstrap file: non-empty, non-`#`-prefixed lines of `<hex-peer-id> <multiaddr>`.
/// Multiple lines sharing a peer id accumulate into one `AddrInfo`.
fn load_bootstraps(path: &Path) -> Result<Vec<AddrInfo>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("couldn't read bootstrap file {path:?}"))?;

    let mut by_id: BTreeMap<Vec<u8>, AddrInfo> = BTreeMap::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let hex_id = parts.next().with_context(|| format!("bootstrap file line {}: missing peer id", lineno + 1))?;
        let addr = parts
            .next()
            .map(str::trim)
            .with_context(|| format!("bootstrap file line {}: missing multiaddr", lineno + 1))?;

        let id = hex::decode(hex_id).with_context(|| format!("bootstrap file line {}: invalid hex peer id", lineno + 1))?;

        by_id
            .entry(id.clone())
            .or_insert_with(|| AddrInfo::new(PeerId::new(id), []))
            .addrs
            .insert(Multiaddr::new(addr.to_string()));
    }

    Ok(by_id.into_values().collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let opts = Opts::parse();

    let config_file = opts.config.as_deref().map(ConfigFile::load).transpose()?;
    let config = Config::from_file(config_file);

    let preimages = Arc::new(PreimageTable::load(&opts.preimage_file).context("couldn't load the preimage table")?);
    let bootstraps = load_bootstraps(&opts.bootstrap_file)?;
    info!(count = bootstraps.len(), "loaded bootstrap peers");

    let metrics_task = metrics::initialize_metrics(opts.metrics_addr);
    info!(addr = %opts.metrics_addr, "serving prometheus metrics");

    let transport = TcpTransport::new();
    let worker_config = WorkerConfig {
        max_back_off_time: config.max_back_off_time,
        connect_timeout: config.connect_timeout,
        protocol_strings: config.protocol_strings.clone(),
        user_agent: config.user_agent.clone(),
    };

    // Split the configured total capacity evenly across the fixed worker pool; the last
    // worker absorbs the remainder so the sum always equals `config.queue_size`.
    let per_worker = config.queue_size / WORKER_COUNT;
    let workers: Vec<_> = (0..WORKER_COUNT)
        .map(|i| {
            let capacity = if i == WORKER_COUNT - 1 {
                config.queue_size - per_worker * (WORKER_COUNT - 1)
            } else {
                per_worker
            };
            NeighbourHarvester::new(transport.clone(), preimages.clone(), worker_config.clone(), capacity.max(1))
        })
        .collect();

    let manager = CrawlManager::new(workers, config.queue_size);
    let output = manager.crawl_network(bootstraps).await;

    info!(nodes = output.nodes.len(), "crawl finished");

    if config.data_output_enabled {
        if let Some(outpath) = &config.outpath {
            Reporter::write_to_file(&output, outpath, &config.filename_time_format, local_now())
                .context("couldn't write the crawl snapshot")?;
        }
    }

    metrics_task.abort();
    Ok(())
}
