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

//! A plain TCP `Transport` (spec.md §4.2/§9's external transport boundary).
//!
//! The wire format here is a length-delimited JSON encoding of [`Message`], framed with
//! the same [`LengthDelimitedCodec`] the rest of the corpus uses for its own event codecs
//! (see `node/bft/events/src/helpers/codec.rs`). It does not speak multistream-select or
//! the real `/ipfs/kad/*` protobuf wire format — the precise on-the-wire encoding is an
//! external collaborator's concern per spec.md §1, and this is the concrete stand-in
//! shipped so the binary in `main.rs` has a real, non-mock `Transport` to run against.

use std::{collections::HashMap, io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::Mutex,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{
    peer::{AddrInfo, PeerId},
    transport::{DhtStream, Message, Transport},
};

const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

fn socket_addr(addr: &crate::peer::Multiaddr) -> Option<SocketAddr> {
    let mut parts = addr.0.split('/').filter(|s| !s.is_empty());
    let family = parts.next()?;
    let host = parts.next()?;
    if parts.next()? != "tcp" {
        return None;
    }
    let port: u16 = parts.next()?.parse().ok()?;

    match family {
        "ip4" => format!("{host}:{port}").parse().ok(),
        // IPv6 hosts need bracketing or `SocketAddr::parse` rejects the ambiguous
        // "host:port" form (too many colons to tell address from port).
        "ip6" => format!("[{host}]:{port}").parse().ok(),
        _ => None,
    }
}

pub struct TcpStream_ {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    protocol: String,
}

#[async_trait]
impl DhtStream for TcpStream_ {
    async fn write_msg(&mut self, msg: &Message) -> io::Result<()> {
        let bytes = serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.framed.send(bytes.into()).await
    }

    async fn read_msg(&mut self) -> io::Result<Message> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))??;
        serde_json::from_slice(&frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn protocol(&self) -> &str {
        &self.protocol
    }

    async fn close(&mut self) {
        let _ = self.framed.close().await;
    }
}

/// Dials plain TCP sockets embedded in each candidate's multiaddrs, racing them and
/// keeping the first that connects (spec.md §4.2).
#[derive(Default)]
pub struct TcpTransport {
    /// The winning connection per peer, held between `connect()` and `open_stream()` so
    /// the DHT stream reuses the socket already established rather than dialling again.
    connections: Mutex<HashMap<Vec<u8>, TcpStream>>,
}

impl TcpTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream_;

    async fn connect(&self, target: &AddrInfo) -> io::Result<()> {
        let candidates: Vec<SocketAddr> = target.addrs.iter().filter_map(socket_addr).collect();
        if candidates.is_empty() {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no dialable tcp address"));
        }

        let (stream, _remaining) = futures_util::future::select_ok(
            candidates.into_iter().map(|addr| Box::pin(async move { TcpStream::connect(addr).await })),
        )
        .await?;

        self.connections.lock().await.insert(target.id.0.clone(), stream);
        Ok(())
    }

    async fn open_stream(&self, peer: &PeerId, protocol_ids: &[String]) -> io::Result<Self::Stream> {
        let stream = self
            .connections
            .lock()
            .await
            .remove(&peer.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connect() must precede open_stream()"))?;

        let codec = LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_LENGTH).new_codec();

        Ok(TcpStream_ {
            framed: Framed::new(stream, codec),
            protocol: protocol_ids.first().cloned().unwrap_or_default(),
        })
    }

    async fn agent_version(&self, _peer: &PeerId) -> String {
        // No out-of-band identify exchange is implemented over this plain codec.
        String::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::peer::Multiaddr;

    #[test]
    fn parses_ip4_multiaddr() {
        let addr = socket_addr(&Multiaddr::new("/ip4/198.51.100.2/tcp/4001")).unwrap();
        assert_eq!(addr, "198.51.100.2:4001".parse().unwrap());
    }

    #[test]
    fn parses_ip6_multiaddr() {
        let addr = socket_addr(&Multiaddr::new("/ip6/::1/tcp/4001")).unwrap();
        assert_eq!(addr, "[::1]:4001".parse().unwrap());
    }

    #[test]
    fn rejects_unknown_family() {
        assert!(socket_addr(&Multiaddr::new("/dns4/example.com/tcp/4001")).is_none());
    }
}
