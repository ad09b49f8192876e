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

use std::{collections::HashMap, io::Read, path::Path};

use flate2::read::GzDecoder;

use crate::error::PreimageError;

/// The maximum common-prefix-length the table is expected to cover (spec.md §4.1/§4.3).
pub const MAX_CPL: u8 = 24;

/// Maps `(targetPeerId, cpl)` to a key whose hash shares exactly `cpl` leading bits
/// with the target's hash.
///
/// Per spec.md §4.1, the *precomputation* behind this table is a separate batch tool
/// and out of scope here; this type only loads the resulting CSV and serves O(1) lookups
/// by bucket number. Because CPL buckets partition XOR-distance space independently of
/// which peer is being targeted, the same preimage bytes are reused verbatim for every
/// target peer id (go-libp2p-kad-dht does the same: the preimage only has to share a
/// prefix with the *target*'s hash, and the crawler picks a fixed, precomputed witness
/// for each prefix length rather than searching for one per peer).
#[derive(Debug, Clone)]
pub struct PreimageTable {
    by_cpl: HashMap<u8, Vec<u8>>,
}

impl PreimageTable {
    /// Loads a gzip-compressed CSV of `(cpl, hex_or_base64_preimage)` rows.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreimageError> {
        let mut raw = Vec::new();
        GzDecoder::new(std::fs::File::open(path)?).read_to_end(&mut raw)?;
        Self::parse(&raw)
    }

    /// Parses the decompressed CSV body. Split out from `load` so it's testable without
    /// a file on disk.
    pub fn parse(csv_bytes: &[u8]) -> Result<Self, PreimageError> {
        let mut by_cpl = HashMap::new();
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(csv_bytes);

        for result in reader.records() {
            let record = result.map_err(|e| PreimageError::MalformedRow(e.to_string()))?;
            let raw_row = record.iter().collect::<Vec<_>>().join(",");

            if record.len() != 2 {
                return Err(PreimageError::MalformedRow(raw_row));
            }

            let cpl: u8 = record[0].trim().parse().map_err(|_| PreimageError::MalformedRow(raw_row.clone()))?;
            let preimage = decode_preimage(record[1].trim()).ok_or_else(|| PreimageError::MalformedRow(raw_row.clone()))?;

            by_cpl.insert(cpl, preimage);
        }

        let depth = by_cpl.keys().copied().max().map(|m| m + 1).unwrap_or(0);
        if depth <= MAX_CPL {
            return Err(PreimageError::InsufficientDepth { depth, min: MAX_CPL + 1 });
        }

        Ok(Self { by_cpl })
    }

    /// `FindPreImageForCPL` (spec.md §4.1): returns the preimage bytes for the given cpl.
    ///
    /// A lookup for a cpl beyond the table's depth is a hard error — harvesters must not
    /// attempt cpls past `MAX_CPL`.
    pub fn find_preimage_for_cpl(&self, cpl: u8) -> Result<&[u8], PreimageError> {
        self.by_cpl.get(&cpl).map(Vec::as_slice).ok_or(PreimageError::MissingCpl(cpl))
    }

    pub fn depth(&self) -> u8 {
        self.by_cpl.keys().copied().max().map(|m| m + 1).unwrap_or(0)
    }
}

/// Accepts either hex or standard base64 — the CSV format doesn't tag which.
fn decode_preimage(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(s) {
            return Some(bytes);
        }
    }
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, s).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_csv() -> String {
        (0..=MAX_CPL)
            .map(|cpl| format!("{},{}\n", cpl, hex::encode(vec![cpl; 4])))
            .collect()
    }

    #[test]
    fn parses_well_formed_table() {
        let table = PreimageTable::parse(sample_csv().as_bytes()).unwrap();
        assert_eq!(table.depth(), MAX_CPL + 1);
        assert_eq!(table.find_preimage_for_cpl(0).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(table.find_preimage_for_cpl(MAX_CPL).unwrap(), &vec![MAX_CPL; 4]);
    }

    #[test]
    fn lookup_beyond_depth_is_an_error() {
        let table = PreimageTable::parse(sample_csv().as_bytes()).unwrap();
        assert!(matches!(table.find_preimage_for_cpl(MAX_CPL + 1), Err(PreimageError::MissingCpl(_))));
    }

    #[test]
    fn shallow_table_is_rejected() {
        let shallow: String = (0..10).map(|cpl| format!("{},{}\n", cpl, hex::encode(vec![cpl; 2]))).collect();
        assert!(matches!(
            PreimageTable::parse(shallow.as_bytes()),
            Err(PreimageError::InsufficientDepth { .. })
        ));
    }

    #[test]
    fn malformed_row_is_rejected() {
        assert!(matches!(PreimageTable::parse(b"not,a,valid,row\n"), Err(PreimageError::MalformedRow(_))));
    }

    #[test]
    fn base64_preimages_decode() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode([7, 8, 9]);
        let mut csv = sample_csv();
        csv.push_str(&format!("{},{}\n", MAX_CPL + 1, encoded));
        // Re-derive with cpl 0 replaced so depth stays > MAX_CPL but row 0 now base64-encoded.
        let csv = csv.replacen(&format!("0,{}\n", hex::encode([0u8; 4])), &format!("0,{}\n", encoded), 1);
        let table = PreimageTable::parse(csv.as_bytes()).unwrap();
        assert_eq!(table.find_preimage_for_cpl(0).unwrap(), &[7, 8, 9]);
    }
}
