//! The four responders consulted in strict order by a Zone Instance
//! (§4.D). Each is a free function taking `&ZoneInstance` and a
//! `Question`, returning `Option<Answer>` -- the "responder capability"
//! from the design notes: new responders are added as new variants of
//! this enum, never as subclasses.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use domain::base::iana::Rcode;

use crate::rr::{self, StoredName};

use super::ZoneView;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QType {
    A,
    Aaaa,
    Cname,
    Txt,
    Mx,
    Other,
}

impl QType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QType::A => "A",
            QType::Aaaa => "AAAA",
            QType::Cname => "CNAME",
            QType::Txt => "TXT",
            QType::Mx => "MX",
            QType::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// A question as seen by the responder chain: a fully-qualified,
/// lowercased name (the query label is lowercased defensively even
/// though config-time validation already lowercases static-record keys,
/// per the Open Question decision in §9).
#[derive(Debug, Clone)]
pub struct Question {
    pub name: String,
    pub qtype: QType,
    pub recursion_desired: bool,
}

impl Question {
    pub fn new(name: &str, qtype: QType, recursion_desired: bool) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            qtype,
            recursion_desired,
        }
    }

    fn owner(&self) -> StoredName {
        StoredName::from_str(&self.name).expect("question name must already be a valid FQDN")
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub rcode: Rcode,
    pub records: Vec<rr::Rr>,
    /// §9 Open Question: source leaves this to the implementer; we follow
    /// its guidance and set AA=true for static/tailnet answers, false for
    /// forwarded/recursed ones.
    pub authoritative: bool,
}

impl Answer {
    fn noerror(records: Vec<rr::Rr>, authoritative: bool) -> Self {
        Self {
            rcode: Rcode::NOERROR,
            records,
            authoritative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    Static,
    Tailnet,
    Forward,
    Recurse,
}

impl Responder {
    pub fn label(&self) -> &'static str {
        match self {
            Responder::Static => "records",
            Responder::Tailnet => "tailscale",
            Responder::Forward => "forward",
            Responder::Recurse => "recurse",
        }
    }

    pub async fn respond(
        &self,
        zone: &ZoneView<'_>,
        question: &Question,
        transport: Transport,
    ) -> Option<Answer> {
        match self {
            Responder::Static => respond_static(zone, question),
            Responder::Tailnet => respond_tailnet(zone, question).await,
            Responder::Forward => respond_forward(zone, question, transport).await,
            Responder::Recurse => respond_recurse(zone, question, transport).await,
        }
    }
}

/// Strips `"." + zone_name` from `name`, the static responder's suffix
/// rule. The root zone (`"."`) has no leading-dot subdomain boundary, so
/// it strips just the trailing dot instead.
fn strip_static_suffix(name: &str, zone_name: &str) -> Option<String> {
    let suffix = if zone_name == "." {
        ".".to_string()
    } else {
        format!(".{}", zone_name)
    };
    name.strip_suffix(&suffix).map(|s| s.to_string())
}

/// Strips `zone_name` from `name` (no extra leading dot), the tailnet
/// responder's suffix rule -- subdomain configs like `.ts.` already carry
/// their own leading dot.
fn strip_zone_suffix(name: &str, zone_name: &str) -> Option<String> {
    name.strip_suffix(zone_name).map(|s| s.to_string())
}

fn respond_static(zone: &ZoneView<'_>, question: &Question) -> Option<Answer> {
    let subdomain = strip_static_suffix(&question.name, zone.name)?;
    let entries = zone.static_records.lookup(&subdomain)?;
    let owner = question.owner();

    let records = match question.qtype {
        QType::A if !entries.a.is_empty() => entries
            .a
            .iter()
            .map(|(addr, ttl)| rr::a_record(&owner, *addr, *ttl))
            .collect(),
        QType::Aaaa if !entries.aaaa.is_empty() => entries
            .aaaa
            .iter()
            .map(|(addr, ttl)| rr::aaaa_record(&owner, *addr, *ttl))
            .collect(),
        QType::Cname if !entries.cname.is_empty() => entries
            .cname
            .iter()
            .filter_map(|(target, ttl)| {
                StoredName::from_str(target)
                    .ok()
                    .map(|target| rr::cname_record(&owner, &target, *ttl))
            })
            .collect(),
        _ => return None,
    };

    Some(Answer::noerror(records, true))
}

async fn respond_tailnet(zone: &ZoneView<'_>, question: &Question) -> Option<Answer> {
    let tailnet = zone.tailnet?;
    let directory = zone.directory?;

    if !matches!(question.qtype, QType::A | QType::Aaaa | QType::Cname) {
        return None;
    }

    let sub = strip_zone_suffix(&question.name, zone.name)?;
    let owner = question.owner();

    if let Some(host) = sub.strip_suffix(&tailnet.machine_subdomain) {
        let entry = directory.find_machine(host).await?;
        let records = match question.qtype {
            QType::A if !entry.ipv4.is_empty() => {
                entry
                    .ipv4
                    .iter()
                    .map(|addr: &Ipv4Addr| rr::a_record(&owner, *addr, tailnet.machine_ttl))
                    .collect()
            }
            QType::Aaaa if !entry.ipv6.is_empty() => entry
                .ipv6
                .iter()
                .map(|addr: &Ipv6Addr| rr::aaaa_record(&owner, *addr, tailnet.machine_ttl))
                .collect(),
            _ => return None,
        };
        return Some(Answer::noerror(records, true));
    }

    if let Some(tag) = sub.strip_suffix(&tailnet.cname_subdomain) {
        if question.qtype != QType::Cname {
            return None;
        }
        let entry = directory.find_cname(tag).await?;
        let records: Vec<rr::Rr> = entry
            .target_hostnames
            .iter()
            .filter_map(|target| {
                let fqdn = format!("{}{}{}", target, tailnet.machine_subdomain, zone.name);
                StoredName::from_str(&fqdn)
                    .ok()
                    .map(|target_name| rr::cname_record(&owner, &target_name, tailnet.cname_ttl))
            })
            .collect();
        if records.is_empty() {
            return None;
        }
        return Some(Answer::noerror(records, true));
    }

    None
}

async fn respond_forward(
    zone: &ZoneView<'_>,
    question: &Question,
    transport: Transport,
) -> Option<Answer> {
    if !zone.forward_enabled {
        return None;
    }
    let round_robin = zone.round_robin?;

    for _ in 0..round_robin.count() {
        let upstream = round_robin.next();
        match zone
            .upstream_client
            .exchange(upstream, question, transport, FORWARD_TIMEOUT)
            .await
        {
            Ok(answer) if matches!(answer.rcode, Rcode::SERVFAIL | Rcode::FORMERR) => {
                log::warn!(target: "forward", "upstream {} returned {} for {}, trying next", upstream, answer.rcode, question.name);
                continue;
            }
            Ok(answer) => return Some(answer),
            Err(e) => {
                log::warn!(target: "forward", "upstream {} failed for {}: {}, trying next", upstream, question.name, e);
                continue;
            }
        }
    }

    None
}

async fn respond_recurse(
    zone: &ZoneView<'_>,
    question: &Question,
    transport: Transport,
) -> Option<Answer> {
    if !zone.recursion_enabled {
        return None;
    }
    let recursor = zone.recursor?;
    let (answer, found) = recursor.handle_recursive(question, transport).await;
    if found {
        answer
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_dotted_suffix_for_static() {
        assert_eq!(
            strip_static_suffix("www.example.com.", "example.com."),
            Some("www".to_string())
        );
        assert_eq!(strip_static_suffix("example.com.", "example.com."), None);
    }

    #[test]
    fn strips_bare_suffix_for_tailnet() {
        assert_eq!(
            strip_zone_suffix("laptop.ts.example.com.", "example.com."),
            Some("laptop.ts.".to_string())
        );
    }
}
