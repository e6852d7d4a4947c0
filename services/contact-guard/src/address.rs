// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Network address handling.
//!
//! - Parsing of client addresses (IPv4 and IPv6, mapped addresses unwrapped)
//! - Blocklist targets: a single address or a CIDR range
//! - Prefix-masked containment tests
//! - Lossy anonymization and one-way hashing for retention

use crate::error::ValidationError;
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Replacement for the dropped low-order part of an anonymized address.
pub const ANONYMIZED_SENTINEL: &str = "XXX";

/// Stand-in for addresses that could not be parsed at anonymization time.
pub const UNKNOWN_ANONYMIZED: &str = "XXX.XXX.XXX.XXX";

/// Parse a textual client address.
pub fn parse_address(input: &str) -> Result<IpAddr, ValidationError> {
    input
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical())
        .map_err(|_| ValidationError::InvalidAddress(input.to_string()))
}

/// A contiguous address range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrRange {
    network: IpAddr,
    prefix: u8,
}

impl CidrRange {
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self, ValidationError> {
        let max = max_prefix(&network);
        if prefix > max {
            return Err(ValidationError::InvalidPrefix {
                target: network.to_string(),
                prefix: prefix as u32,
                max,
            });
        }
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    /// True when the top `prefix` bits of `addr` equal those of the network.
    ///
    /// Addresses of the other family never match.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CidrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

/// What a blocklist or whitelist entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressTarget {
    Single(IpAddr),
    Range(CidrRange),
}

impl AddressTarget {
    /// Whether `addr` is this address or falls inside this range.
    pub fn matches(&self, addr: IpAddr) -> bool {
        match self {
            Self::Single(ip) => *ip == addr.to_canonical(),
            Self::Range(range) => range.contains(addr),
        }
    }

    /// The address a range starts from, or the single address itself.
    pub fn base_address(&self) -> IpAddr {
        match self {
            Self::Single(ip) => *ip,
            Self::Range(range) => range.network(),
        }
    }
}

impl FromStr for AddressTarget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((addr, prefix)) = s.split_once('/') else {
            return parse_address(s).map(Self::Single);
        };

        let network = parse_address(addr).map_err(|_| ValidationError::InvalidCidr(s.to_string()))?;
        let prefix: u32 = prefix
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidCidr(s.to_string()))?;

        let max = max_prefix(&network);
        if prefix > max as u32 {
            return Err(ValidationError::InvalidPrefix {
                target: s.to_string(),
                prefix,
                max,
            });
        }

        CidrRange::new(network, prefix as u8).map(Self::Range)
    }
}

impl fmt::Display for AddressTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(ip) => write!(f, "{}", ip),
            Self::Range(range) => write!(f, "{}", range),
        }
    }
}

/// Generalize an address irreversibly.
///
/// 192.168.1.100 -> 192.168.1.XXX
/// 2001:db8::1   -> 2001:db8::XXX
///
/// Already generalized input is returned unchanged.
pub fn anonymize(address: &str) -> String {
    if is_anonymized(address) {
        return address.to_string();
    }
    match parse_address(address) {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.{ANONYMIZED_SENTINEL}")
        }
        Ok(IpAddr::V6(v6)) => {
            let text = v6.to_string();
            match text.rsplit_once(':') {
                Some((head, _)) => format!("{head}:{ANONYMIZED_SENTINEL}"),
                None => UNKNOWN_ANONYMIZED.to_string(),
            }
        }
        Err(_) => UNKNOWN_ANONYMIZED.to_string(),
    }
}

/// Whether `address` already has its low-order part replaced.
pub fn is_anonymized(address: &str) -> bool {
    address.ends_with(ANONYMIZED_SENTINEL)
}

/// One-way digest of an address for the anonymization audit trail.
pub fn hash_address(address: &str) -> String {
    hex::encode(Sha3_256::digest(address.as_bytes()))
}
