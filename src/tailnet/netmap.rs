//! Collaborator types for the virtual-network (tailnet) client SDK (§1:
//! "assume it streams network-map snapshots; we define how we consume
//! them"), reduced to the fields the directory's filter rules actually
//! need.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

/// One peer (or the local node) as seen in a netmap snapshot.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// The node's already-computed short hostname.
    pub hostname: String,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub tags: Vec<String>,
    /// Mullvad-style exit node, reachable only via WireGuard.
    pub wireguard_only: bool,
    /// Shared nodes don't have a hostname unique within this tailnet.
    pub shared: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkMap {
    pub nodes: Vec<Node>,
}

pub type NetmapStream = Pin<Box<dyn Stream<Item = NetworkMap> + Send>>;

/// The streaming event bus the Tailnet Directory subscribes to. A real
/// implementation wraps a virtual-network client SDK's IPN/watch bus; the
/// directory itself only depends on this trait.
#[async_trait::async_trait]
pub trait NetmapSource: Send + Sync {
    async fn subscribe(&self) -> Result<NetmapStream>;
}
