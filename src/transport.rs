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

use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::peer::{AddrInfo, Multiaddr, PeerId};

/// The Kademlia DHT RPC kinds used over a stream (spec.md §6): a `FIND_NODE` request and
/// its `closer_peers` response. Encoding/framing (length-prefixing, protobuf vs. another
/// wire format) is the transport's concern, not this type's — `Transport::Stream` deals
/// in whole decoded messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    FindNode { key: Vec<u8>, cluster_level: u8 },
    Response { closer_peers: Vec<WireAddrInfo> },
}

/// The wire shape of a `closer_peers` entry: `{id, addrs[], connection}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireAddrInfo {
    pub id: Vec<u8>,
    pub addrs: Vec<String>,
    pub connection: u8,
}

impl From<&WireAddrInfo> for AddrInfo {
    fn from(w: &WireAddrInfo) -> Self {
        AddrInfo::new(PeerId::new(w.id.clone()), w.addrs.iter().map(|a| Multiaddr::new(a.clone())))
    }
}

/// One negotiated, bidirectional DHT stream to a remote peer.
///
/// Within a stream, message delivery is FIFO (spec.md §4.2); there are no ordering
/// guarantees across distinct streams.
#[async_trait]
pub trait DhtStream: Send {
    async fn write_msg(&mut self, msg: &Message) -> io::Result<()>;

    async fn read_msg(&mut self) -> io::Result<Message>;

    fn protocol(&self) -> &str;

    async fn close(&mut self);
}

/// The library boundary the crawler dials through: connection establishment, DHT stream
/// negotiation, and a best-effort peerstore lookup for a remote's agent string.
///
/// Per spec.md §1/§4.2 the concrete transport (connection multiplexing, length-prefixed
/// protobuf messaging over a real libp2p/go-libp2p-equivalent stack) is an external
/// collaborator; this crate only depends on the trait.
#[async_trait]
pub trait Transport: Send + Sync {
    type Stream: DhtStream;

    /// Dials every address in `target`, racing them; returns once the first accepts.
    async fn connect(&self, target: &AddrInfo) -> io::Result<()>;

    /// Negotiates the first protocol id in `protocol_ids` that the remote also supports.
    async fn open_stream(&self, peer: &PeerId, protocol_ids: &[String]) -> io::Result<Self::Stream>;

    /// Best-effort; an empty string means the remote's agent version is unknown.
    async fn agent_version(&self, peer: &PeerId) -> String;
}

/// An in-memory `Transport` used by the dispatcher/harvester test suite (spec.md §8's
/// "mocked transport" scenarios). Not a production transport — the real one is supplied
/// by the embedding application.
pub mod mock {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use super::*;

    #[derive(Default, Clone)]
    pub struct ScriptedPeer {
        /// `closer_peers` to return for each cpl iteration, indexed by cpl.
        pub responses: HashMap<u8, Vec<WireAddrInfo>>,
        pub agent_version: String,
        pub dial_fails: bool,
        pub protocol: String,
        /// If set, the stream is closed (read error) once this cpl is reached.
        pub closes_after_cpl: Option<u8>,
    }

    #[derive(Default)]
    pub struct MockNetwork {
        peers: Mutex<HashMap<Vec<u8>, ScriptedPeer>>,
    }

    impl MockNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn script(&self, id: &PeerId, peer: ScriptedPeer) {
            self.peers.lock().unwrap().insert(id.0.clone(), peer);
        }
    }

    pub struct MockTransport {
        network: Arc<MockNetwork>,
    }

    impl MockTransport {
        pub fn new(network: Arc<MockNetwork>) -> Self {
            Self { network }
        }
    }

    pub struct MockStream {
        script: ScriptedPeer,
        cpl_cursor: Option<u8>,
    }

    #[async_trait]
    impl DhtStream for MockStream {
        async fn write_msg(&mut self, _msg: &Message) -> io::Result<()> {
            // The requested cpl travels implicitly via call order in this mock: each
            // write/read pair corresponds to one `FullNeighbourCrawl` iteration.
            Ok(())
        }

        async fn read_msg(&mut self) -> io::Result<Message> {
            let cpl = self.cpl_cursor.map(|c| c + 1).unwrap_or(0);
            self.cpl_cursor = Some(cpl);

            if self.script.closes_after_cpl == Some(cpl) {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }

            let closer_peers = self.script.responses.get(&cpl).cloned().unwrap_or_default();
            Ok(Message::Response { closer_peers })
        }

        fn protocol(&self) -> &str {
            &self.script.protocol
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Transport for MockTransport {
        type Stream = MockStream;

        async fn connect(&self, target: &AddrInfo) -> io::Result<()> {
            let peers = self.network.peers.lock().unwrap();
            match peers.get(&target.id.0) {
                Some(script) if script.dial_fails => Err(io::ErrorKind::ConnectionRefused.into()),
                Some(_) => Ok(()),
                None => Err(io::ErrorKind::NotFound.into()),
            }
        }

        async fn open_stream(&self, peer: &PeerId, protocol_ids: &[String]) -> io::Result<Self::Stream> {
            let peers = self.network.peers.lock().unwrap();
            let script = peers.get(&peer.0).cloned().ok_or(io::ErrorKind::NotFound)?;
            let protocol = if script.protocol.is_empty() {
                protocol_ids.first().cloned().unwrap_or_default()
            } else {
                script.protocol.clone()
            };
            Ok(MockStream {
                script: ScriptedPeer { protocol, ..script },
                cpl_cursor: None,
            })
        }

        async fn agent_version(&self, peer: &PeerId) -> String {
            self.network
                .peers
                .lock()
                .unwrap()
                .get(&peer.0)
                .map(|s| s.agent_version.clone())
                .unwrap_or_default()
        }
    }
}
