//! Upstream exchange for the forward responder (§4.E). A fresh client is
//! used per exchange -- no connection pooling (see DESIGN.md Open
//! Questions). Each upstream is dialed as `host:53` over the same
//! transport (UDP/TCP) as the inbound request, with a 5s timeout per
//! attempt (enforced by the caller in `zone::responder::respond_forward`,
//! not here, so retries never share a deadline).

use std::net::SocketAddr;
use std::time::Duration;

use domain::base::iana::Rcode;
use domain::base::{Message, MessageBuilder, ParsedName, Rtype, ToName};
use domain::rdata::AllRecordData;

use crate::error::{Error, ErrorKind, Result};
use crate::rr;
use crate::zone::responder::{Answer, QType, Question, Transport};

const DNS_PORT: u16 = 53;

#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn exchange(
        &self,
        upstream: &str,
        question: &Question,
        transport: Transport,
        timeout: Duration,
    ) -> Result<Answer>;
}

/// Real exchange over `domain`'s client transport.
pub struct DomainUpstreamClient;

impl DomainUpstreamClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DomainUpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

fn qtype_to_rtype(qtype: QType) -> Rtype {
    match qtype {
        QType::A => Rtype::A,
        QType::Aaaa => Rtype::AAAA,
        QType::Cname => Rtype::CNAME,
        QType::Txt => Rtype::TXT,
        QType::Mx => Rtype::MX,
        QType::Other => Rtype::ANY,
    }
}

fn build_query(question: &Question) -> Result<Message<Vec<u8>>> {
    use domain::base::name::Name;
    use std::str::FromStr;

    let name = Name::<Vec<u8>>::from_str(&question.name)
        .map_err(|e| Error::new(ErrorKind::DomainName, e.to_string()))?;

    let mut builder = MessageBuilder::new_vec().question();
    builder.header_mut().set_rd(question.recursion_desired);
    builder
        .push((name, qtype_to_rtype(question.qtype)))
        .map_err(|e| Error::new(ErrorKind::Io, e.to_string()))?;
    Ok(builder.into_message())
}

#[async_trait::async_trait]
impl UpstreamClient for DomainUpstreamClient {
    async fn exchange(
        &self,
        upstream: &str,
        question: &Question,
        transport: Transport,
        timeout: Duration,
    ) -> Result<Answer> {
        let addr: SocketAddr = format!("{}:{}", upstream, DNS_PORT)
            .parse()
            .map_err(|e| Error::new(ErrorKind::UpstreamFailure, format!("{}", e)))?;

        let query = build_query(question)?;

        let fut = async {
            match transport {
                Transport::Udp => exchange_udp(addr, &query).await,
                Transport::Tcp => exchange_tcp(addr, &query).await,
            }
        };

        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorKind::UpstreamFailure,
                format!("timed out after {:?} waiting on {}", timeout, upstream),
            )),
        }
    }
}

async fn exchange_udp(addr: SocketAddr, query: &Message<Vec<u8>>) -> Result<Answer> {
    use tokio::net::UdpSocket;

    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    socket.send(query.as_slice()).await?;

    let mut buf = vec![0u8; 4096];
    let n = socket.recv(&mut buf).await?;
    buf.truncate(n);

    parse_reply(buf)
}

async fn exchange_tcp(addr: SocketAddr, query: &Message<Vec<u8>>) -> Result<Answer> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let mut stream = TcpStream::connect(addr).await?;
    let len = query.as_slice().len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(query.as_slice()).await?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let reply_len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; reply_len];
    stream.read_exact(&mut buf).await?;

    parse_reply(buf)
}

fn parse_reply(buf: Vec<u8>) -> Result<Answer> {
    let message = Message::from_octets(buf).map_err(|e| {
        Error::new(ErrorKind::UpstreamFailure, format!("malformed reply: {}", e))
    })?;
    let rcode = message.header().rcode();
    let records = answer_records(&message);
    Ok(Answer {
        rcode,
        records,
        authoritative: false,
    })
}

/// Materializes the answer section into the zone's own record type. Only
/// A/AAAA/CNAME are understood downstream, so anything else (NS glue,
/// OPT, ...) is dropped; a record that fails to parse is skipped rather
/// than failing the whole reply.
fn answer_records(message: &Message<Vec<u8>>) -> Vec<rr::Rr> {
    let answer = match message.answer() {
        Ok(answer) => answer,
        Err(_) => return Vec::new(),
    };

    answer
        .filter_map(|item| item.ok())
        .filter_map(|parsed| {
            parsed
                .to_record::<AllRecordData<Vec<u8>, ParsedName<Vec<u8>>>>()
                .ok()
                .flatten()
        })
        .filter_map(|record| {
            let owner = record.owner().to_bytes();
            let ttl = record.ttl().as_secs();
            match record.data() {
                AllRecordData::A(a) => Some(rr::a_record(&owner, a.addr(), ttl)),
                AllRecordData::Aaaa(aaaa) => Some(rr::aaaa_record(&owner, aaaa.addr(), ttl)),
                AllRecordData::Cname(cname) => {
                    Some(rr::cname_record(&owner, &cname.cname().to_bytes(), ttl))
                }
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
pub struct FakeUpstreamClient {
    pub responses: std::sync::Mutex<std::collections::HashMap<String, Result<Answer>>>,
    pub attempts: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl FakeUpstreamClient {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::HashMap::new()),
            attempts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, upstream: &str, result: Result<Answer>) {
        self.responses
            .lock()
            .unwrap()
            .insert(upstream.to_string(), result);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl UpstreamClient for FakeUpstreamClient {
    async fn exchange(
        &self,
        upstream: &str,
        _question: &Question,
        _transport: Transport,
        _timeout: Duration,
    ) -> Result<Answer> {
        self.attempts.lock().unwrap().push(upstream.to_string());
        match self.responses.lock().unwrap().get(upstream) {
            Some(Ok(answer)) => Ok(answer.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Error::new(ErrorKind::UpstreamFailure, "no fake response configured")),
        }
    }
}
