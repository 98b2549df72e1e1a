//! Zone Registry and `domain::net::server::service::Service` boundary
//! (§4.G). Owns every `ZoneInstance`, dispatches an inbound request to
//! the longest-suffix-matching zone, and converts between `domain`'s
//! wire-format `Request`/`Message` and the crate's local `Question`/
//! `Answer` types so the resolution pipeline itself never touches wire
//! bytes. `start()` binds one socket per available core, generalized to
//! `SO_REUSEPORT` sockets per §6.

use core::future::{ready, Future};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use domain::base::iana::{Rcode, Rtype};
use domain::net::server::buf::VecBufSource;
use domain::net::server::dgram::DgramServer;
use domain::net::server::message::Request;
use domain::net::server::middleware::edns::EdnsMiddlewareSvc;
use domain::net::server::middleware::mandatory::MandatoryMiddlewareSvc;
use domain::net::server::service::{CallResult, Service, ServiceError, ServiceResult};
use domain::net::server::stream::StreamServer;
use domain::net::server::util::mk_builder_for_target;
use futures::stream::{once, Stream};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::forward::UpstreamClient;
use crate::metrics::Metrics;
use crate::recursor::Recursor;
use crate::tailnet::netmap::NetmapSource;
use crate::tailnet::Directory;
use crate::zone::{Answer as LocalAnswer, QType, Question, Transport, ZoneInstance};

/// How long `stop()` waits for in-flight handlers to drain before giving
/// up and returning anyway.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

type WireService = MandatoryMiddlewareSvc<EdnsMiddlewareSvc<Server>>;

/// Abstracts over `DgramServer`/`StreamServer`'s shutdown call so `start()`
/// can keep one homogeneous list of listeners regardless of transport.
trait Listener: Send + Sync {
    fn shutdown(&self, timeout: Duration) -> Result<()>;
}

impl Listener for DgramServer<Arc<UdpSocket>, VecBufSource, WireService> {
    fn shutdown(&self, timeout: Duration) -> Result<()> {
        DgramServer::shutdown(self, Some(timeout))
            .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
    }
}

impl Listener for StreamServer<TcpListener, VecBufSource, WireService> {
    fn shutdown(&self, timeout: Duration) -> Result<()> {
        StreamServer::shutdown(self, Some(timeout))
            .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))
    }
}

/// Cloning a `Server` clones only `Arc` handles: `domain`'s `Service`
/// trait requires the service type to be cloned into every spawned
/// connection task.
#[derive(Clone)]
pub struct Server {
    bind: String,
    port: u16,
    zones: Arc<RwLock<HashMap<String, Arc<ZoneInstance>>>>,
    directory: Arc<Mutex<Option<Arc<Directory>>>>,
    metrics: Arc<dyn Metrics>,
    upstream_client: Arc<dyn UpstreamClient>,
    recursor: Option<Arc<dyn Recursor>>,
    listeners: Arc<Mutex<Vec<(Arc<dyn Listener>, JoinHandle<()>)>>>,
}

impl Server {
    pub fn new(
        bind: String,
        port: u16,
        metrics: Arc<dyn Metrics>,
        upstream_client: Arc<dyn UpstreamClient>,
        recursor: Option<Arc<dyn Recursor>>,
    ) -> Self {
        Self {
            bind,
            port,
            zones: Arc::new(RwLock::new(HashMap::new())),
            directory: Arc::new(Mutex::new(None)),
            metrics,
            upstream_client,
            recursor,
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Applies a new config generation: zones present in both the old and
    /// new set are reinitialized in place (§3 Lifecycle), zones new to
    /// this generation are created, and zones absent from the new
    /// generation are torn down. The shared Tailnet Directory is created
    /// lazily on the first zone that declares `tailnet`, and its
    /// background task is started at most once per process lifetime.
    pub async fn reload(&self, config: &Config, netmap_source: Option<Arc<dyn NetmapSource>>) -> Result<()> {
        let directory = if config.zones.values().any(|z| z.tailnet.is_some()) {
            Some(self.directory_handle(netmap_source).await?)
        } else {
            None
        };

        let mut zones = self.zones.write().await;
        let mut seen = Vec::with_capacity(config.zones.len());

        for (name, zone_config) in &config.zones {
            seen.push(name.clone());

            let zone_directory = if zone_config.tailnet.is_some() {
                directory.clone()
            } else {
                None
            };

            if let Some(existing) = zones.get(name) {
                existing
                    .initialize(zone_config, zone_directory, self.recursor.clone())
                    .await?;
            } else {
                let instance = ZoneInstance::new(
                    name.clone(),
                    zone_config,
                    zone_directory,
                    self.recursor.clone(),
                    self.metrics.clone(),
                    self.upstream_client.clone(),
                )?;
                zones.insert(name.clone(), Arc::new(instance));
            }
        }

        zones.retain(|name, _| seen.contains(name));

        log::info!(target: "server", "reloaded {} zone(s)", zones.len());
        Ok(())
    }

    async fn directory_handle(&self, netmap_source: Option<Arc<dyn NetmapSource>>) -> Result<Arc<Directory>> {
        let mut guard = self.directory.lock().await;
        if let Some(directory) = guard.as_ref() {
            return Ok(directory.clone());
        }

        let directory = Directory::new();
        if let Some(source) = netmap_source {
            let background = directory.clone();
            tokio::spawn(async move { background.run(source).await });
        }
        *guard = Some(directory.clone());
        Ok(directory)
    }

    /// Longest-suffix match over configured zone names, case-insensitive
    /// (a query for `WWW.Example.COM.` matches a zone configured as
    /// `example.com.`).
    pub async fn find_zone(&self, qname: &str) -> Option<Arc<ZoneInstance>> {
        let qname = qname.to_ascii_lowercase();
        let zones = self.zones.read().await;

        zones
            .iter()
            .filter(|(name, _)| name.as_str() == "." || qname.ends_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, zone)| zone.clone())
    }

    async fn resolve(&self, question: Question, transport: Transport) -> LocalAnswer {
        match self.find_zone(&question.name).await {
            Some(zone) => zone.serve_dns(question, transport).await,
            None => {
                self.metrics.log_event(
                    log::Level::Warn,
                    "server",
                    &format!("no zone configured to answer {}", question.name),
                );
                LocalAnswer {
                    rcode: Rcode::SERVFAIL,
                    records: Vec::new(),
                    authoritative: false,
                }
            }
        }
    }

    /// Binds `SO_REUSEPORT` UDP and TCP sockets -- one per available
    /// core -- each driving its own `DgramServer`/`StreamServer` over the
    /// shared dispatcher.
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| Error::new(ErrorKind::ConfigValidation, format!("invalid bind address: {}", e)))?;

        let svc = EdnsMiddlewareSvc::new(self.clone());
        let svc = MandatoryMiddlewareSvc::new(svc);

        let num_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut listeners = self.listeners.lock().await;

        for _ in 0..num_cores {
            let sock = Arc::new(bind_reuseport_udp(addr)?);
            let udp_srv = Arc::new(DgramServer::new(sock, VecBufSource, svc.clone()));
            let run_srv = udp_srv.clone();
            let handle = tokio::spawn(async move { run_srv.run().await });
            listeners.push((udp_srv as Arc<dyn Listener>, handle));
        }

        for _ in 0..num_cores {
            let listener = bind_reuseport_tcp(addr)?;
            let tcp_srv = Arc::new(StreamServer::new(listener, VecBufSource, svc.clone()));
            let run_srv = tcp_srv.clone();
            let handle = tokio::spawn(async move { run_srv.run().await });
            listeners.push((tcp_srv as Arc<dyn Listener>, handle));
        }

        log::info!(target: "server", "listening on {} ({} cores)", addr, num_cores);
        Ok(())
    }

    /// Signals every listener to stop accepting new connections and waits
    /// up to 10s for in-flight handlers to finish before returning, per
    /// the drain deadline in the shutdown design.
    pub async fn stop(&self) {
        let mut listeners = self.listeners.lock().await;

        for (listener, _) in listeners.iter() {
            if let Err(e) = listener.shutdown(SHUTDOWN_DRAIN) {
                log::warn!(target: "server", "failed to signal listener shutdown: {}", e);
            }
        }

        for (_, handle) in listeners.drain(..) {
            match tokio::time::timeout(SHUTDOWN_DRAIN, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!(target: "server", "listener task panicked during shutdown: {}", e),
                Err(_) => log::warn!(target: "server", "listener did not drain within {:?}", SHUTDOWN_DRAIN),
            }
        }
    }
}

fn bind_reuseport_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(SockProtocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into()).map_err(Error::from)
}

fn bind_reuseport_tcp(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(SockProtocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into()).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ZoneConfig};
    use crate::forward::FakeUpstreamClient;
    use crate::metrics::FakeMetrics;
    use crate::recursor::stub::StubRecursor;
    use std::collections::HashMap;

    fn test_server() -> Server {
        Server::new(
            "0.0.0.0".to_string(),
            53,
            Arc::new(FakeMetrics::new()),
            Arc::new(FakeUpstreamClient::new()),
            Some(Arc::new(StubRecursor::new())),
        )
    }

    fn config_with_zones(names: &[&str]) -> Config {
        let mut zones = HashMap::new();
        for name in names {
            zones.insert(name.to_string(), ZoneConfig::default());
        }
        Config {
            zones,
            default_port: 53,
            bind: "0.0.0.0".to_string(),
            log: Default::default(),
        }
    }

    /// Scenario 5: a query for a name under the more specific zone routes
    /// there, not to the broader parent zone that also matches as a
    /// suffix.
    #[tokio::test]
    async fn find_zone_prefers_longest_matching_suffix() {
        let server = test_server();
        let config = config_with_zones(&["example.com.", "dev.example.com."]);
        server.reload(&config, None).await.unwrap();

        let zone = server.find_zone("api.dev.example.com.").await.unwrap();
        assert_eq!(zone.name, "dev.example.com.");

        let zone = server.find_zone("api.example.com.").await.unwrap();
        assert_eq!(zone.name, "example.com.");
    }

    #[tokio::test]
    async fn find_zone_is_case_insensitive() {
        let server = test_server();
        let config = config_with_zones(&["example.com."]);
        server.reload(&config, None).await.unwrap();

        assert!(server.find_zone("WWW.Example.COM.").await.is_some());
    }

    #[tokio::test]
    async fn reload_drops_zones_no_longer_present() {
        let server = test_server();
        server.reload(&config_with_zones(&["a.", "b."]), None).await.unwrap();
        assert!(server.find_zone("a.").await.is_some());
        assert!(server.find_zone("b.").await.is_some());

        server.reload(&config_with_zones(&["b."]), None).await.unwrap();
        assert!(server.find_zone("a.").await.is_none());
        assert!(server.find_zone("b.").await.is_some());
    }

    /// Scenario 6 (reduced): a burst of concurrent resolves racing a
    /// reload that drops the only zone they target never panics and
    /// always finishes, settling on either the old answer or SERVFAIL.
    #[tokio::test]
    async fn concurrent_resolve_survives_zone_removal() {
        let server = test_server();
        server.reload(&config_with_zones(&["a."]), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                server
                    .resolve(Question::new("a.", QType::A, true), Transport::Udp)
                    .await
            }));
        }

        let reload_server = server.clone();
        let reloader = tokio::spawn(async move {
            reload_server.reload(&config_with_zones(&["b."]), None).await.unwrap();
        });

        for handle in handles {
            let answer = handle.await.unwrap();
            assert!(matches!(answer.rcode, Rcode::NOERROR | Rcode::SERVFAIL));
        }
        reloader.await.unwrap();
    }
}

fn rtype_to_qtype(rtype: Rtype) -> QType {
    match rtype {
        Rtype::A => QType::A,
        Rtype::AAAA => QType::Aaaa,
        Rtype::CNAME => QType::Cname,
        Rtype::TXT => QType::Txt,
        Rtype::MX => QType::Mx,
        _ => QType::Other,
    }
}

impl Service<Vec<u8>> for Server {
    type Target = Vec<u8>;
    type Stream = Pin<Box<dyn Stream<Item = ServiceResult<Self::Target>> + Send>>;
    type Future = Pin<Box<dyn Future<Output = Self::Stream> + Send>>;

    fn call(&self, request: Request<Vec<u8>>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            let result = server.answer(request).await;
            Box::pin(once(ready(result))) as Self::Stream
        })
    }
}

impl Server {
    async fn answer(&self, request: Request<Vec<u8>>) -> ServiceResult<Vec<u8>> {
        let question = match request.message().sole_question() {
            Ok(q) => q,
            Err(_) => return Err(ServiceError::Refused),
        };

        let local_question = Question::new(
            &question.qname().to_string(),
            rtype_to_qtype(question.qtype()),
            request.message().header().rd(),
        );
        let transport = if request.transport_ctx().is_udp() {
            Transport::Udp
        } else {
            Transport::Tcp
        };

        let answer = self.resolve(local_question, transport).await;

        let builder = mk_builder_for_target();
        let mut answer_builder = builder
            .start_answer(request.message(), answer.rcode)
            .map_err(|_| ServiceError::Refused)?;
        answer_builder.header_mut().set_aa(answer.authoritative);

        for rr in &answer.records {
            let _ = answer_builder.push((rr.owner().clone(), rr.ttl(), rr.data().clone()));
        }

        Ok(CallResult::new(answer_builder.additional()))
    }
}
