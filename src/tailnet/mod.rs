//! Eventually-consistent map of tailnet peer -> (hostname, addresses,
//! CNAME tags), built from periodic "netmap" events (§4.C). Lives for the
//! process lifetime once created (§3 Lifecycle), lazily started on the
//! first configuration that enables tailnet integration.
//!
//! Filter rules: wireguard-only (exit) nodes and shared nodes contribute
//! nothing; `tag:cname-<label>` tags populate the CNAME map.

pub mod netmap;

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::RwLock;

use netmap::{NetmapSource, NetworkMap, Node};

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineEntry {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CNameEntry {
    pub name: String,
    pub target_hostnames: Vec<String>,
}

#[derive(Default)]
struct Maps {
    machines: HashMap<String, MachineEntry>,
    cnames: HashMap<String, CNameEntry>,
}

pub struct Directory {
    maps: RwLock<Maps>,
}

impl Directory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            maps: RwLock::new(Maps::default()),
        })
    }

    pub async fn find_machine(&self, hostname: &str) -> Option<MachineEntry> {
        self.maps.read().await.machines.get(hostname).cloned()
    }

    pub async fn find_cname(&self, tag: &str) -> Option<CNameEntry> {
        self.maps.read().await.cnames.get(tag).cloned()
    }

    /// Runs forever, rebuilding and atomically swapping in the machine and
    /// CNAME maps on every snapshot. Never returns; intended to be spawned
    /// as a background task. Subscribe failures retry after a 60s
    /// backoff; a stream that ends mid-connection is resubscribed to
    /// immediately.
    pub async fn run(self: Arc<Self>, source: Arc<dyn NetmapSource>) {
        loop {
            let mut stream = match source.subscribe().await {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!(target: "tailnet", "failed to subscribe to netmap bus: {}, retrying in 60s", e);
                    tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                    continue;
                }
            };

            while let Some(snapshot) = stream.next().await {
                let (machines, cnames) = build_maps(&snapshot);
                let mut maps = self.maps.write().await;
                maps.machines = machines;
                maps.cnames = cnames;
                log::debug!(target: "tailnet", "updated {} machine entries, {} cname entries", maps.machines.len(), maps.cnames.len());
            }

            log::info!(target: "tailnet", "netmap stream ended, resubscribing");
        }
    }
}

fn build_maps(snapshot: &NetworkMap) -> (HashMap<String, MachineEntry>, HashMap<String, CNameEntry>) {
    let mut machines: HashMap<String, MachineEntry> = HashMap::new();
    let mut cnames: HashMap<String, CNameEntry> = HashMap::new();

    for node in &snapshot.nodes {
        if node.wireguard_only || node.shared {
            continue;
        }

        let entry = machines.entry(node.hostname.clone()).or_default();
        entry.ipv4.extend(node.ipv4.iter().copied());
        entry.ipv6.extend(node.ipv6.iter().copied());

        for tag in &node.tags {
            if let Some(label) = tag.strip_prefix("tag:cname-") {
                let cname = cnames.entry(label.to_string()).or_insert_with(|| CNameEntry {
                    name: label.to_string(),
                    target_hostnames: Vec::new(),
                });
                cname.target_hostnames.push(node.hostname.clone());
            }
        }
    }

    (machines, cnames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(hostname: &str) -> Node {
        Node {
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    /// Wireguard-only nodes and shared nodes contribute zero entries.
    #[test]
    fn filters_wireguard_only_and_shared_nodes() {
        let snapshot = NetworkMap {
            nodes: vec![
                Node {
                    wireguard_only: true,
                    ..node("exit-node")
                },
                Node {
                    shared: true,
                    ..node("shared-node")
                },
                node("laptop"),
            ],
        };

        let (machines, _) = build_maps(&snapshot);
        assert!(!machines.contains_key("exit-node"));
        assert!(!machines.contains_key("shared-node"));
        assert!(machines.contains_key("laptop"));
    }

    #[test]
    fn collects_addresses_per_hostname() {
        let snapshot = NetworkMap {
            nodes: vec![Node {
                ipv4: vec!["100.64.0.1".parse().unwrap()],
                ipv6: vec!["fd7a::1".parse().unwrap()],
                ..node("laptop")
            }],
        };

        let (machines, _) = build_maps(&snapshot);
        let entry = machines.get("laptop").unwrap();
        assert_eq!(entry.ipv4, vec!["100.64.0.1".parse::<Ipv4Addr>().unwrap()]);
        assert_eq!(entry.ipv6, vec!["fd7a::1".parse::<Ipv6Addr>().unwrap()]);
    }

    #[test]
    fn cname_tags_group_by_label() {
        let snapshot = NetworkMap {
            nodes: vec![
                Node {
                    tags: vec!["tag:cname-web".to_string()],
                    ..node("laptop")
                },
                Node {
                    tags: vec!["tag:cname-web".to_string()],
                    ..node("desktop")
                },
            ],
        };

        let (_, cnames) = build_maps(&snapshot);
        let entry = cnames.get("web").unwrap();
        assert_eq!(entry.target_hostnames, vec!["laptop", "desktop"]);
    }

    #[tokio::test]
    async fn find_machine_and_cname_read_latest_swap() {
        let dir = Directory::new();
        {
            let mut maps = dir.maps.write().await;
            maps.machines.insert(
                "laptop".to_string(),
                MachineEntry {
                    ipv4: vec!["100.64.0.1".parse().unwrap()],
                    ipv6: vec![],
                },
            );
        }

        assert!(dir.find_machine("laptop").await.is_some());
        assert!(dir.find_machine("nope").await.is_none());
    }
}
