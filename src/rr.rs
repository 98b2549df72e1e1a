//! Pure functions building DNS A/AAAA/CNAME resource records from an
//! address or target plus a TTL. Always class INTERNET. No owner-name
//! validation is performed here: callers supply an already fully-qualified
//! name (see `config::records` for where that name gets assembled).

use std::net::{Ipv4Addr, Ipv6Addr};

use domain::base::iana::Class;
use domain::base::{Name, Record, Ttl};
use domain::rdata::{Aaaa, Cname, ZoneRecordData};
use octseq::OctetsInto;

pub type StoredName = Name<bytes::Bytes>;
pub type Rr = Record<StoredName, ZoneRecordData<bytes::Bytes, StoredName>>;

pub fn a_record(owner: &StoredName, addr: Ipv4Addr, ttl: u32) -> Rr {
    Record::new(
        owner.clone(),
        Class::IN,
        Ttl::from_secs(ttl),
        ZoneRecordData::A(addr.into()),
    )
}

pub fn a_records(owner: &StoredName, addrs: &[Ipv4Addr], ttl: u32) -> Vec<Rr> {
    addrs.iter().map(|addr| a_record(owner, *addr, ttl)).collect()
}

pub fn aaaa_record(owner: &StoredName, addr: Ipv6Addr, ttl: u32) -> Rr {
    Record::new(
        owner.clone(),
        Class::IN,
        Ttl::from_secs(ttl),
        ZoneRecordData::Aaaa(Aaaa::new(addr)),
    )
}

pub fn aaaa_records(owner: &StoredName, addrs: &[Ipv6Addr], ttl: u32) -> Vec<Rr> {
    addrs
        .iter()
        .map(|addr| aaaa_record(owner, *addr, ttl))
        .collect()
}

pub fn cname_record(owner: &StoredName, target: &StoredName, ttl: u32) -> Rr {
    Record::new(
        owner.clone(),
        Class::IN,
        Ttl::from_secs(ttl),
        ZoneRecordData::Cname(Cname::new(target.clone().octets_into())),
    )
}

pub fn cname_records(owner: &StoredName, targets: &[StoredName], ttl: u32) -> Vec<Rr> {
    targets
        .iter()
        .map(|target| cname_record(owner, target, ttl))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn name(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    #[test]
    fn a_record_list_preserves_order() {
        let owner = name("www.example.com.");
        let addrs = [
            "1.2.3.4".parse().unwrap(),
            "5.6.7.8".parse().unwrap(),
        ];
        let rrs = a_records(&owner, &addrs, 300);
        assert_eq!(rrs.len(), 2);
        assert_eq!(rrs[0].ttl(), Ttl::from_secs(300));
        assert_eq!(rrs[0].class(), Class::IN);
        match rrs[1].data() {
            ZoneRecordData::A(a) => assert_eq!(a.addr(), addrs[1]),
            _ => panic!("expected A record"),
        }
    }

    #[test]
    fn cname_record_targets_preserve_order() {
        let owner = name("web.ts.example.com.");
        let targets = [name("laptop.ts.example.com.")];
        let rrs = cname_records(&owner, &targets, 3600);
        assert_eq!(rrs.len(), 1);
        assert_eq!(rrs[0].owner(), &owner);
    }
}
