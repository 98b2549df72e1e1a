//! Precomputed, read-only-for-a-generation lookup table built from
//! `config::records::RecordsCollection` at zone (re-)initialization. Only
//! A/AAAA/CNAME participate in the static responder; the config schema
//! also carries TXT/MX entries, which are parsed but never served (see
//! DESIGN.md).

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::config::records::RecordsCollection;

#[derive(Debug, Clone, Default)]
pub struct SubdomainRecords {
    pub a: Vec<(Ipv4Addr, u32)>,
    pub aaaa: Vec<(Ipv6Addr, u32)>,
    pub cname: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticRecords {
    by_subdomain: HashMap<String, SubdomainRecords>,
}

impl StaticRecords {
    pub fn build(records: &RecordsCollection) -> Self {
        let mut by_subdomain: HashMap<String, SubdomainRecords> = HashMap::new();

        for (subdomain, entries) in &records.a {
            let target = &mut by_subdomain.entry(subdomain.clone()).or_default().a;
            target.extend(entries.iter().map(|r| (r.address, r.ttl)));
        }
        for (subdomain, entries) in &records.aaaa {
            let target = &mut by_subdomain.entry(subdomain.clone()).or_default().aaaa;
            target.extend(entries.iter().map(|r| (r.address, r.ttl)));
        }
        for (subdomain, entries) in &records.cname {
            let target = &mut by_subdomain.entry(subdomain.clone()).or_default().cname;
            target.extend(entries.iter().map(|r| (r.target.clone(), r.ttl)));
        }

        Self { by_subdomain }
    }

    pub fn lookup(&self, subdomain: &str) -> Option<&SubdomainRecords> {
        self.by_subdomain.get(subdomain)
    }
}
