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

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use time::{format_description, OffsetDateTime};

use crate::{dispatcher::CrawledState, peer::PeerId};

/// One peer's entry in a `CrawlOutput` snapshot (spec.md §6's "output file" shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledNode {
    pub id: String,
    pub addrs: Vec<String>,
    pub reachable: bool,
    pub agent_version: String,
    /// Neighbours as last reported; empty for peers that were never successfully harvested.
    pub neighbours: Vec<String>,
    pub timestamp: String,
}

/// The full crawl snapshot serialized to disk (spec.md §6): `{startDate, endDate, nodes}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOutput {
    pub start_date: String,
    pub end_date: String,
    pub nodes: HashMap<String, CrawledNode>,
}

/// Builds and persists `CrawlOutput` snapshots from the dispatcher's final `crawled` map.
pub struct Reporter;

impl Reporter {
    pub fn build(start: OffsetDateTime, end: OffsetDateTime, crawled: HashMap<PeerId, CrawledState>) -> CrawlOutput {
        let nodes = crawled
            .into_iter()
            .map(|(id, state)| {
                let key = id.to_string();
                let node = CrawledNode {
                    id: key.clone(),
                    addrs: state.addrs.iter().map(ToString::to_string).collect(),
                    reachable: state.reachable,
                    agent_version: state.info.get("version").cloned().unwrap_or_default(),
                    neighbours: state.neighbours.iter().map(ToString::to_string).collect(),
                    timestamp: state.info.get("knows_timestamp").cloned().unwrap_or_default(),
                };
                (key, node)
            })
            .collect();

        CrawlOutput {
            start_date: iso(start),
            end_date: iso(end),
            nodes,
        }
    }

    /// Writes `output` as pretty JSON under `outpath`, named via `filename_time_format`
    /// (a `time` format description, evaluated against `end`) — spec.md §6's
    /// `crawloptions.dataOutput.*` keys.
    pub fn write_to_file(output: &CrawlOutput, outpath: &Path, filename_time_format: &str, end: OffsetDateTime) -> anyhow::Result<()> {
        std::fs::create_dir_all(outpath)?;

        let description = format_description::parse(filename_time_format)?;
        let filename = format!("{}.json", end.format(&description)?);

        let path = outpath.join(filename);
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, output)?;
        Ok(())
    }
}

fn iso(t: OffsetDateTime) -> String {
    t.format(&format_description::well_known::Iso8601::DEFAULT).unwrap_or_default()
}

/// ISO-8601 local time (spec.md §3's `knows_timestamp`/`startDate`/`endDate` contract),
/// falling back to UTC when the local offset can't be determined — `now_local()` depends
/// on OS support that isn't guaranteed to be present everywhere this binary runs.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
