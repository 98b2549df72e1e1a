//! Real recursive resolution via `hickory-resolver`. No maintained Rust
//! libunbound binding exists, so this backend is built on
//! `hickory-resolver`'s own resolver instead (see DESIGN.md Open
//! Questions).

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use domain::base::iana::Rcode;
use hickory_resolver::config::{Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

use super::Recursor;
use crate::rr::{self, StoredName};
use crate::zone::responder::{Answer, QType, Question, Transport};

/// Two resolvers, not one, so the recursive path honors the inbound
/// transport the way the forwarder does: a TCP query recurses over TCP
/// end to end instead of silently switching the client to UDP.
pub struct HickoryRecursor {
    udp: TokioAsyncResolver,
    tcp: TokioAsyncResolver,
}

impl HickoryRecursor {
    pub fn new() -> Self {
        let mut udp_config = ResolverConfig::new();
        let mut tcp_config = ResolverConfig::new();
        for ns in ResolverConfig::cloudflare().name_servers() {
            let mut udp_ns = ns.clone();
            udp_ns.protocol = Protocol::Udp;
            udp_config.add_name_server(udp_ns);

            let mut tcp_ns = ns.clone();
            tcp_ns.protocol = Protocol::Tcp;
            tcp_config.add_name_server(tcp_ns);
        }

        Self {
            udp: TokioAsyncResolver::tokio(udp_config, ResolverOpts::default()),
            tcp: TokioAsyncResolver::tokio(tcp_config, ResolverOpts::default()),
        }
    }

    fn resolver(&self, transport: Transport) -> &TokioAsyncResolver {
        match transport {
            Transport::Udp => &self.udp,
            Transport::Tcp => &self.tcp,
        }
    }
}

impl Default for HickoryRecursor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Recursor for HickoryRecursor {
    async fn handle_recursive(&self, question: &Question, transport: Transport) -> (Option<Answer>, bool) {
        let owner = match StoredName::from_str(&question.name) {
            Ok(name) => name,
            Err(_) => return (None, false),
        };
        let resolver = self.resolver(transport);

        let result = match question.qtype {
            QType::A => Self::lookup_a(resolver, &question.name, &owner).await,
            QType::Aaaa => Self::lookup_aaaa(resolver, &question.name, &owner).await,
            QType::Cname => Self::lookup_cname(resolver, &question.name, &owner).await,
            _ => return (None, false),
        };

        match result {
            Ok(records) => (
                Some(Answer {
                    rcode: Rcode::NOERROR,
                    records,
                    authoritative: false,
                }),
                true,
            ),
            Err(kind) if kind.is_nxdomain() => (
                Some(Answer {
                    rcode: Rcode::NXDOMAIN,
                    records: Vec::new(),
                    authoritative: false,
                }),
                true,
            ),
            Err(_) => (None, false),
        }
    }
}

struct LookupFailure {
    nxdomain: bool,
}

impl LookupFailure {
    fn is_nxdomain(&self) -> bool {
        self.nxdomain
    }
}

fn classify(error: &hickory_resolver::error::ResolveError) -> LookupFailure {
    LookupFailure {
        nxdomain: matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. }),
    }
}

/// Recursively-resolved answers carry whatever TTL the upstream hierarchy
/// gave them; `hickory-resolver`'s typed lookups erase that down to a
/// cache expiry rather than a per-record TTL, so answers from this
/// backend are republished at a conservative fixed TTL instead of trying
/// to recover the original one.
const RECURSIVE_TTL: u32 = 300;

impl HickoryRecursor {
    async fn lookup_a(
        resolver: &TokioAsyncResolver,
        name: &str,
        owner: &StoredName,
    ) -> Result<Vec<rr::Rr>, LookupFailure> {
        match resolver.ipv4_lookup(name).await {
            Ok(lookup) => {
                let addrs: Vec<Ipv4Addr> = lookup.iter().map(|a| a.0).collect();
                Ok(rr::a_records(owner, &addrs, RECURSIVE_TTL))
            }
            Err(e) => Err(classify(&e)),
        }
    }

    async fn lookup_aaaa(
        resolver: &TokioAsyncResolver,
        name: &str,
        owner: &StoredName,
    ) -> Result<Vec<rr::Rr>, LookupFailure> {
        match resolver.ipv6_lookup(name).await {
            Ok(lookup) => {
                let addrs: Vec<Ipv6Addr> = lookup.iter().map(|a| a.0).collect();
                Ok(rr::aaaa_records(owner, &addrs, RECURSIVE_TTL))
            }
            Err(e) => Err(classify(&e)),
        }
    }

    async fn lookup_cname(
        resolver: &TokioAsyncResolver,
        name: &str,
        owner: &StoredName,
    ) -> Result<Vec<rr::Rr>, LookupFailure> {
        match resolver.lookup(name, hickory_resolver::proto::rr::RecordType::CNAME).await {
            Ok(lookup) => {
                let targets: Vec<StoredName> = lookup
                    .record_iter()
                    .filter_map(|r| r.data().and_then(|d| d.as_cname()))
                    .filter_map(|cname| StoredName::from_str(&cname.0.to_utf8()).ok())
                    .collect();
                Ok(rr::cname_records(owner, &targets, RECURSIVE_TTL))
            }
            Err(e) => Err(classify(&e)),
        }
    }
}
