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
    collections::BTreeSet,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An opaque identifier for a remote DHT peer, typically a multihash of its public key.
///
/// Equality is byte equality; ordering is lexicographic, matching the data model in spec.md §3.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The DHT hash used for XOR-distance / common-prefix-length computations.
    ///
    /// Mirrors go-libp2p-kad-dht's `convertPeerID`: a SHA-256 digest of the raw id bytes.
    pub fn dht_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.0);
        hasher.finalize().into()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A multiaddress, kept as its wire string form plus enough parsed structure to
/// classify it as local/loopback/link-local for the filtering step in spec.md §4.3.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Multiaddr(pub String);

impl Multiaddr {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the embedded IP address, if this multiaddr carries one in an
    /// `/ip4/.../...` or `/ip6/.../...` prefix.
    fn embedded_ip(&self) -> Option<IpAddr> {
        let mut parts = self.0.split('/').filter(|s| !s.is_empty());
        match parts.next()? {
            "ip4" => parts.next()?.parse::<Ipv4Addr>().ok().map(IpAddr::V4),
            "ip6" => parts.next()?.parse::<Ipv6Addr>().ok().map(IpAddr::V6),
            _ => None,
        }
    }

    /// True for loopback, link-local, and other non-routable addresses that the
    /// harvester must strip before dialling (spec.md §4.3 step 1).
    pub fn is_local(&self) -> bool {
        match self.embedded_ip() {
            Some(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_link_local() || ip.is_unspecified() || ip.is_private(),
            Some(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified() || (ip.segments()[0] & 0xffc0) == 0xfe80,
            None => false,
        }
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(PeerId, set<Multiaddr>)`, per spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrInfo {
    pub id: PeerId,
    pub addrs: BTreeSet<Multiaddr>,
}

impl AddrInfo {
    pub fn new(id: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) -> Self {
        Self {
            id,
            addrs: addrs.into_iter().collect(),
        }
    }

    /// Returns a copy of this `AddrInfo` with local/loopback/link-local addresses removed.
    pub fn stripped(&self) -> Self {
        Self {
            id: self.id.clone(),
            addrs: self.addrs.iter().filter(|a| !a.is_local()).cloned().collect(),
        }
    }

    pub fn has_routable_address(&self) -> bool {
        self.addrs.iter().any(|a| !a.is_local())
    }
}
