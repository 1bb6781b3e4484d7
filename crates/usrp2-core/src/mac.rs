//! Ethernet hardware addresses and discovery filters.
//!
//! USRP2 units are identified by their MAC address. Users commonly refer to
//! a unit by its last two octets only (`"89:ab"`); such short forms expand
//! against the fixed vendor prefix `00:50:C2:85`.

use std::fmt;
use std::str::FromStr;

/// Vendor prefix applied to two-octet short addresses.
pub const VENDOR_PREFIX: [u8; 4] = [0x00, 0x50, 0xC2, 0x85];

/// A 6-byte Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Build an address from the vendor prefix and a two-octet suffix.
    pub fn from_suffix(suffix: [u8; 2]) -> Self {
        let p = VENDOR_PREFIX;
        MacAddr([p[0], p[1], p[2], p[3], suffix[0], suffix[1]])
    }

    /// Raw octets.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Error returned when a MAC address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMacError(String);

impl fmt::Display for ParseMacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid MAC address '{}': expected HH:HH:HH:HH:HH:HH or HH:HH",
            self.0
        )
    }
}

impl std::error::Error for ParseMacError {}

impl From<ParseMacError> for crate::error::Error {
    fn from(e: ParseMacError) -> Self {
        crate::error::Error::InvalidParameter(e.to_string())
    }
}

fn parse_octets(s: &str) -> Option<Vec<u8>> {
    s.split(':')
        .map(|part| {
            if part.is_empty() || part.len() > 2 {
                return None;
            }
            u8::from_str_radix(part, 16).ok()
        })
        .collect()
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Parse a full address, or a two-octet short form expanded against
    /// [`VENDOR_PREFIX`].
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = || ParseMacError(s.to_string());
        let octets = parse_octets(s.trim()).ok_or_else(err)?;
        match octets.as_slice() {
            [a, b] => Ok(MacAddr::from_suffix([*a, *b])),
            [a, b, c, d, e, f] => Ok(MacAddr([*a, *b, *c, *d, *e, *f])),
            _ => Err(err()),
        }
    }
}

/// Selects which devices a discovery scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MacFilter {
    /// Match every device.
    #[default]
    Any,
    /// Match exactly one address.
    Exact(MacAddr),
}

impl MacFilter {
    /// Whether `addr` passes the filter.
    pub fn matches(&self, addr: &MacAddr) -> bool {
        match self {
            MacFilter::Any => true,
            MacFilter::Exact(want) => want == addr,
        }
    }

    /// Whether this filter selects a single device.
    pub fn is_specific(&self) -> bool {
        matches!(self, MacFilter::Exact(_))
    }
}

impl FromStr for MacFilter {
    type Err = ParseMacError;

    /// The empty string matches all devices; anything else must parse as a
    /// [`MacAddr`] (full or short form).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(MacFilter::Any);
        }
        s.parse().map(MacFilter::Exact)
    }
}

impl fmt::Display for MacFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacFilter::Any => write!(f, "*"),
            MacFilter::Exact(addr) => write!(f, "{addr}"),
        }
    }
}
