//! Static record schema: per-type maps from subdomain to a list of
//! {address or target, ttl} entries. Default TTL is 3600 when a record
//! omits one.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::Deserialize;

fn default_ttl() -> u32 {
    3600
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordsCollection {
    #[serde(rename = "A")]
    pub a: HashMap<String, Vec<ARecord>>,
    #[serde(rename = "AAAA")]
    pub aaaa: HashMap<String, Vec<AaaaRecord>>,
    #[serde(rename = "CNAME")]
    pub cname: HashMap<String, Vec<CnameRecord>>,
    #[serde(rename = "TXT")]
    pub txt: HashMap<String, Vec<TxtRecord>>,
    #[serde(rename = "MX")]
    pub mx: HashMap<String, Vec<MxRecord>>,
}

impl RecordsCollection {
    /// Subdomain keys across all per-type maps, for invariant checking.
    pub fn subdomains(&self) -> impl Iterator<Item = &str> {
        self.a
            .keys()
            .chain(self.aaaa.keys())
            .chain(self.cname.keys())
            .chain(self.txt.keys())
            .chain(self.mx.keys())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ARecord {
    pub address: Ipv4Addr,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AaaaRecord {
    pub address: Ipv6Addr,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CnameRecord {
    pub target: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxtRecord {
    pub content: String,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MxRecord {
    pub target: String,
    pub preference: u16,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde(default)]
    pub comment: String,
}
