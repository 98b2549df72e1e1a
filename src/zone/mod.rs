//! A Zone Instance: one authoritative/forwarding DNS zone and everything
//! it needs to answer a query (§4.D). Held by the server's Zone Registry
//! behind an `Arc`; a config reload that re-declares the same zone name
//! mutates the fields of the existing instance in place rather than
//! replacing it (§3 Lifecycle), so in-flight `serve_dns` calls either see
//! the old generation consistently or the new one, never a half-updated
//! mix, and a zone's identity (and any background tasks keyed on it)
//! survives reloads.

pub mod responder;
pub mod static_records;

use std::sync::Arc;
use std::time::Instant;

use domain::base::iana::Rcode;
use tokio::sync::RwLock;

use crate::config::ZoneConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::forward::UpstreamClient;
use crate::metrics::Metrics;
use crate::recursor::Recursor;
use crate::roundrobin::RoundRobin;
use crate::tailnet::Directory;

pub use responder::{Answer, QType, Question, Responder, Transport};

/// Zone-level tailnet wiring: the subdomain/ttl knobs from config plus the
/// resolved Directory handle, kept separate from `config::TailnetConfig`
/// so the responder never has to reach back into the config tree.
pub struct ZoneTailnet {
    pub machine_subdomain: String,
    pub cname_subdomain: String,
    pub machine_ttl: u32,
    pub cname_ttl: u32,
}

/// Fields the responder chain reads are behind a `RwLock` because
/// `initialize` replaces them wholesale on reload while `serve_dns` may be
/// running concurrently on another task; everything else (`name`,
/// `metrics`, `upstream_client`) is immutable for the life of the
/// instance.
struct Generation {
    static_records: static_records::StaticRecords,
    tailnet: Option<ZoneTailnet>,
    directory: Option<Arc<Directory>>,
    forward_enabled: bool,
    round_robin: Option<RoundRobin<String>>,
    recursion_enabled: bool,
    recursor: Option<Arc<dyn Recursor>>,
}

pub struct ZoneInstance {
    pub name: String,
    generation: RwLock<Generation>,
    metrics: Arc<dyn Metrics>,
    upstream_client: Arc<dyn UpstreamClient>,
}

/// A read-locked view of the current generation, borrowed for the
/// duration of one `serve_dns` call. Exists so `responder.rs` can read
/// `zone.static_records`, `zone.tailnet`, etc. through simple field
/// access instead of every responder function taking the lock guard
/// itself.
pub struct ZoneView<'a> {
    pub name: &'a str,
    pub static_records: &'a static_records::StaticRecords,
    pub tailnet: Option<&'a ZoneTailnet>,
    pub directory: Option<&'a Arc<Directory>>,
    pub forward_enabled: bool,
    pub round_robin: Option<&'a RoundRobin<String>>,
    pub recursion_enabled: bool,
    pub recursor: Option<&'a Arc<dyn Recursor>>,
    pub upstream_client: &'a Arc<dyn UpstreamClient>,
}

impl ZoneInstance {
    /// Builds a fresh instance for `name`, wiring in a Directory handle
    /// only if `config.tailnet` is set (the shared Directory itself is
    /// created lazily by the caller the first time any zone needs it,
    /// attaches/detaches the shared Directory handle at that point).
    pub fn new(
        name: String,
        config: &ZoneConfig,
        directory: Option<Arc<Directory>>,
        recursor: Option<Arc<dyn Recursor>>,
        metrics: Arc<dyn Metrics>,
        upstream_client: Arc<dyn UpstreamClient>,
    ) -> Result<Self> {
        let generation = build_generation(config, directory, recursor)?;
        Ok(Self {
            name,
            generation: RwLock::new(generation),
            metrics,
            upstream_client,
        })
    }

    /// Reinitializes this instance in place from a new config generation,
    /// per §3 Lifecycle. Rejects the new generation -- leaving the
    /// previous one serving -- if it fails validation (`ConfigReload`);
    /// the caller is responsible for having already run
    /// `Config::validate` over the surrounding document, so failures here
    /// are limited to wiring concerns like a missing Directory handle.
    pub async fn initialize(
        &self,
        config: &ZoneConfig,
        directory: Option<Arc<Directory>>,
        recursor: Option<Arc<dyn Recursor>>,
    ) -> Result<()> {
        let generation = build_generation(config, directory, recursor)?;
        *self.generation.write().await = generation;
        Ok(())
    }

    /// The full responder-chain pipeline: RECV -> TRY_STATIC ->
    /// TRY_TAILNET -> TRY_FORWARD -> TRY_RECURSE -> REPLIED. Logs once at
    /// entry, once per branch that produces an answer, once if no branch
    /// does, and once at the end with elapsed time and a responder label;
    /// always increments `count_query` exactly once regardless of
    /// outcome.
    pub async fn serve_dns(&self, question: Question, transport: Transport) -> Answer {
        let started = Instant::now();
        self.metrics.log_event(
            log::Level::Info,
            "zone",
            &format!(
                "zone {:?}: received {} {} query",
                self.name,
                question.qtype.as_str(),
                question.name
            ),
        );

        let generation = self.generation.read().await;
        let view = ZoneView {
            name: &self.name,
            static_records: &generation.static_records,
            tailnet: generation.tailnet.as_ref(),
            directory: generation.directory.as_ref(),
            forward_enabled: generation.forward_enabled,
            round_robin: generation.round_robin.as_ref(),
            recursion_enabled: generation.recursion_enabled,
            recursor: generation.recursor.as_ref(),
            upstream_client: &self.upstream_client,
        };

        const CHAIN: [Responder; 4] = [
            Responder::Static,
            Responder::Tailnet,
            Responder::Forward,
            Responder::Recurse,
        ];

        let mut outcome: Option<(Responder, Answer)> = None;
        for responder in CHAIN {
            if let Some(answer) = responder.respond(&view, &question, transport).await {
                self.metrics.log_event(
                    log::Level::Info,
                    "zone",
                    &format!(
                        "zone {:?}: {} answered {} {}",
                        self.name,
                        responder.label(),
                        question.qtype.as_str(),
                        question.name
                    ),
                );
                outcome = Some((responder, answer));
                break;
            }
        }
        drop(generation);

        let (label, answer) = match outcome {
            Some((responder, answer)) => (responder.label(), answer),
            None => {
                self.metrics.log_event(
                    log::Level::Warn,
                    "zone",
                    &format!(
                        "zone {:?}: no responder handled {} {}",
                        self.name,
                        question.qtype.as_str(),
                        question.name
                    ),
                );
                ("fail", servfail())
            }
        };

        self.metrics.count_query(&self.name, question.qtype.as_str(), label);
        self.metrics.log_event(
            log::Level::Info,
            "zone",
            &format!(
                "zone {:?}: {} {} served by {} in {:?}",
                self.name,
                question.qtype.as_str(),
                question.name,
                label,
                started.elapsed()
            ),
        );

        answer
    }
}

fn servfail() -> Answer {
    Answer {
        rcode: Rcode::SERVFAIL,
        records: Vec::new(),
        authoritative: false,
    }
}

fn build_generation(
    config: &ZoneConfig,
    directory: Option<Arc<Directory>>,
    recursor: Option<Arc<dyn Recursor>>,
) -> Result<Generation> {
    let static_records = static_records::StaticRecords::build(&config.static_records);

    let tailnet = match &config.tailnet {
        Some(t) => {
            if directory.is_none() {
                return Err(Error::new(
                    ErrorKind::ConfigReload,
                    "zone declares tailnet integration but no directory handle was supplied",
                ));
            }
            Some(ZoneTailnet {
                machine_subdomain: t.machine_subdomain.clone(),
                cname_subdomain: t.cname_subdomain.clone(),
                machine_ttl: t.machine_ttl,
                cname_ttl: t.cname_ttl,
            })
        }
        None => None,
    };

    let round_robin = if config.forward_enabled {
        Some(RoundRobin::new(config.forward_addresses.clone())?)
    } else {
        None
    };

    if config.recursion_enabled && recursor.is_none() {
        return Err(Error::new(
            ErrorKind::RecursionUnsupported,
            "zone enables recursion but no recursor backend is available",
        ));
    }

    Ok(Generation {
        static_records,
        tailnet,
        directory: if config.tailnet.is_some() { directory } else { None },
        forward_enabled: config.forward_enabled,
        round_robin,
        recursion_enabled: config.recursion_enabled,
        recursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::FakeUpstreamClient;
    use crate::metrics::FakeMetrics;
    use crate::recursor::stub::StubRecursor;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    fn zone_config_with_static(subdomain: &str, addr: Ipv4Addr) -> ZoneConfig {
        let yaml = format!(
            "static_records:\n  A:\n    {}:\n      - address: \"{}\"\n        ttl: 60\n",
            subdomain, addr
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn make_zone(config: &ZoneConfig) -> ZoneInstance {
        ZoneInstance::new(
            "example.com.".to_string(),
            config,
            None,
            Some(Arc::new(StubRecursor::new())),
            Arc::new(FakeMetrics::new()),
            Arc::new(FakeUpstreamClient::new()),
        )
        .unwrap()
    }

    /// The static responder wins when it has an answer, before
    /// forward/recurse are ever consulted.
    #[tokio::test]
    async fn static_responder_short_circuits_the_chain() {
        let config = zone_config_with_static("www", "1.2.3.4".parse().unwrap());
        let zone = make_zone(&config);

        let question = Question::new("www.example.com.", QType::A, true);
        let answer = zone.serve_dns(question, Transport::Udp).await;

        assert_eq!(answer.rcode, Rcode::NOERROR);
        assert_eq!(answer.records.len(), 1);
        assert!(answer.authoritative);
    }

    /// When no responder in the chain handles the query, the final
    /// answer is SERVFAIL, not a panic or an empty NOERROR.
    #[tokio::test]
    async fn no_responder_match_yields_servfail() {
        let config: ZoneConfig = serde_yaml::from_str("static_records: {}\n").unwrap();
        let zone = make_zone(&config);

        let question = Question::new("nothing.example.com.", QType::A, true);
        let answer = zone.serve_dns(question, Transport::Udp).await;

        assert_eq!(answer.rcode, Rcode::SERVFAIL);
        assert!(answer.records.is_empty());
    }

    #[tokio::test]
    async fn count_query_is_incremented_exactly_once_per_call() {
        let config = zone_config_with_static("www", "1.2.3.4".parse().unwrap());
        let metrics = Arc::new(FakeMetrics::new());
        let zone = ZoneInstance::new(
            "example.com.".to_string(),
            &config,
            None,
            Some(Arc::new(StubRecursor::new())),
            metrics.clone(),
            Arc::new(FakeUpstreamClient::new()),
        )
        .unwrap();

        zone.serve_dns(Question::new("www.example.com.", QType::A, true), Transport::Udp)
            .await;
        zone.serve_dns(Question::new("www.example.com.", QType::A, true), Transport::Udp)
            .await;

        assert_eq!(metrics.get("example.com.", "A", "records"), 2);
    }

    /// A reload swaps the whole generation atomically -- a query
    /// issued after `initialize` returns never sees a mix of old and new
    /// static records.
    #[tokio::test]
    async fn reload_replaces_generation_atomically() {
        let config = zone_config_with_static("www", "1.2.3.4".parse().unwrap());
        let zone = make_zone(&config);

        let new_config = zone_config_with_static("www", "9.9.9.9".parse().unwrap());
        zone.initialize(&new_config, None, Some(Arc::new(StubRecursor::new())))
            .await
            .unwrap();

        let answer = zone
            .serve_dns(Question::new("www.example.com.", QType::A, true), Transport::Udp)
            .await;

        match &answer.records[0].data() {
            domain::rdata::ZoneRecordData::A(a) => {
                assert_eq!(a.addr(), "9.9.9.9".parse::<Ipv4Addr>().unwrap())
            }
            _ => panic!("expected A record"),
        }
    }

    /// Scenario: the first two upstreams fail (timeout, SERVFAIL)
    /// and the third answers NOERROR -- the client gets that reply and
    /// exactly three attempts were made, none of them skipped or retried
    /// out of order.
    #[tokio::test]
    async fn forward_failover_stops_at_first_noerror() {
        let yaml = "static_records: {}\nforward_enabled: true\nforward_addresses:\n  - \"10.0.0.1\"\n  - \"10.0.0.2\"\n  - \"10.0.0.3\"\n";
        let config: ZoneConfig = serde_yaml::from_str(yaml).unwrap();

        let upstream_client = Arc::new(FakeUpstreamClient::new());
        upstream_client.set(
            "10.0.0.1",
            Err(crate::error::Error::new(crate::error::ErrorKind::UpstreamFailure, "timed out")),
        );
        upstream_client.set(
            "10.0.0.2",
            Ok(Answer {
                rcode: Rcode::SERVFAIL,
                records: Vec::new(),
                authoritative: false,
            }),
        );
        let owner = crate::rr::StoredName::from_str("unknown.example.com.").unwrap();
        upstream_client.set(
            "10.0.0.3",
            Ok(Answer {
                rcode: Rcode::NOERROR,
                records: crate::rr::a_records(&owner, &["5.5.5.5".parse().unwrap()], 60),
                authoritative: false,
            }),
        );

        let zone = ZoneInstance::new(
            "example.com.".to_string(),
            &config,
            None,
            Some(Arc::new(StubRecursor::new())),
            Arc::new(FakeMetrics::new()),
            upstream_client.clone(),
        )
        .unwrap();

        let answer = zone
            .serve_dns(Question::new("unknown.example.com.", QType::A, true), Transport::Udp)
            .await;

        assert_eq!(answer.rcode, Rcode::NOERROR);
        assert_eq!(answer.records.len(), 1);
        assert_eq!(upstream_client.attempt_count(), 3);
    }

    /// Scenario 4: every upstream fails, the reply degrades to SERVFAIL
    /// and the query still counts once, labeled "fail".
    #[tokio::test]
    async fn forward_failover_exhausted_yields_servfail() {
        let yaml = "static_records: {}\nforward_enabled: true\nforward_addresses:\n  - \"10.0.0.1\"\n  - \"10.0.0.2\"\n";
        let config: ZoneConfig = serde_yaml::from_str(yaml).unwrap();

        let upstream_client = Arc::new(FakeUpstreamClient::new());
        upstream_client.set(
            "10.0.0.1",
            Ok(Answer {
                rcode: Rcode::SERVFAIL,
                records: Vec::new(),
                authoritative: false,
            }),
        );
        upstream_client.set(
            "10.0.0.2",
            Ok(Answer {
                rcode: Rcode::SERVFAIL,
                records: Vec::new(),
                authoritative: false,
            }),
        );

        let metrics = Arc::new(FakeMetrics::new());
        let zone = ZoneInstance::new(
            "example.com.".to_string(),
            &config,
            None,
            Some(Arc::new(StubRecursor::new())),
            metrics.clone(),
            upstream_client.clone(),
        )
        .unwrap();

        let answer = zone
            .serve_dns(Question::new("unknown.example.com.", QType::A, true), Transport::Udp)
            .await;

        assert_eq!(answer.rcode, Rcode::SERVFAIL);
        assert_eq!(upstream_client.attempt_count(), 2);
        assert_eq!(metrics.get("example.com.", "A", "fail"), 1);
    }

    #[tokio::test]
    async fn recursion_enabled_without_backend_is_rejected() {
        let yaml = "static_records: {}\nrecursion_enabled: true\n";
        let config: ZoneConfig = serde_yaml::from_str(yaml).unwrap();

        let err = ZoneInstance::new(
            "example.com.".to_string(),
            &config,
            None,
            None,
            Arc::new(FakeMetrics::new()),
            Arc::new(FakeUpstreamClient::new()),
        )
        .unwrap_err();

        assert_eq!(err.kind, ErrorKind::RecursionUnsupported);
    }
}
