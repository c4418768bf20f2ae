//! XA transaction identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum size in bytes of a global transaction id.
pub const MAX_GTRID_SIZE: usize = 64;

/// Maximum size in bytes of a branch qualifier.
pub const MAX_BQUAL_SIZE: usize = 64;

/// An XA transaction identifier: `{format id, gtrid, bqual}`.
///
/// A *global* xid has an empty branch qualifier. A *branch* xid is derived
/// from a global one by substituting a qualifier that is unique within the
/// owning transaction. Two xids are equal iff all three fields are equal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "XidParts")]
pub struct Xid {
    format_id: i32,
    gtrid: Vec<u8>,
    bqual: Vec<u8>,
}

/// Wire form of an [`Xid`], checked against the size limits on the way in.
#[derive(Deserialize)]
struct XidParts {
    format_id: i32,
    gtrid: Vec<u8>,
    bqual: Vec<u8>,
}

impl TryFrom<XidParts> for Xid {
    type Error = XidError;

    fn try_from(parts: XidParts) -> Result<Self, Self::Error> {
        Xid::new(parts.format_id, parts.gtrid, parts.bqual)
    }
}

impl Xid {
    /// Create an xid, validating the XA size limits.
    pub fn new(format_id: i32, gtrid: Vec<u8>, bqual: Vec<u8>) -> Result<Self, XidError> {
        if gtrid.is_empty() {
            return Err(XidError::EmptyGtrid);
        }
        if gtrid.len() > MAX_GTRID_SIZE {
            return Err(XidError::GtridTooLong(gtrid.len()));
        }
        if bqual.len() > MAX_BQUAL_SIZE {
            return Err(XidError::BqualTooLong(bqual.len()));
        }
        Ok(Self {
            format_id,
            gtrid,
            bqual,
        })
    }

    /// Create a global xid (empty branch qualifier).
    pub fn global(format_id: i32, gtrid: Vec<u8>) -> Result<Self, XidError> {
        Self::new(format_id, gtrid, Vec::new())
    }

    /// Derive a branch xid by substituting the branch qualifier.
    pub fn branch(&self, bqual: Vec<u8>) -> Result<Self, XidError> {
        if bqual.is_empty() {
            return Err(XidError::EmptyBqual);
        }
        Self::new(self.format_id, self.gtrid.clone(), bqual)
    }

    /// The global xid this one belongs to.
    pub fn to_global(&self) -> Self {
        Self {
            format_id: self.format_id,
            gtrid: self.gtrid.clone(),
            bqual: Vec::new(),
        }
    }

    /// Whether `other` carries the same format id and gtrid.
    pub fn same_global(&self, other: &Xid) -> bool {
        self.format_id == other.format_id && self.gtrid == other.gtrid
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn gtrid(&self) -> &[u8] {
        &self.gtrid
    }

    pub fn bqual(&self) -> &[u8] {
        &self.bqual
    }

    /// Whether this is a global xid (no branch qualifier).
    pub fn is_global(&self) -> bool {
        self.bqual.is_empty()
    }

    /// Stable 64-bit fingerprint of the global part.
    ///
    /// Used to route every event of one transaction to the same worker.
    pub fn route_key(&self) -> u64 {
        // FNV-1a over format id and gtrid; the branch qualifier is excluded so
        // branch replies land on the same worker as their transaction.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.format_id.to_le_bytes().iter().chain(self.gtrid.iter()) {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.format_id,
            hex::encode(&self.gtrid),
            hex::encode(&self.bqual)
        )
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self)
    }
}

impl FromStr for Xid {
    type Err = XidError;

    /// Parse the `format:gtrid-hex:bqual-hex` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(format), Some(gtrid), Some(bqual)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(XidError::Malformed(s.to_string()));
        };
        let format_id = format
            .parse::<i32>()
            .map_err(|_| XidError::Malformed(s.to_string()))?;
        let gtrid = hex::decode(gtrid).map_err(|_| XidError::Malformed(s.to_string()))?;
        let bqual = hex::decode(bqual).map_err(|_| XidError::Malformed(s.to_string()))?;
        Self::new(format_id, gtrid, bqual)
    }
}

/// Errors constructing or parsing an [`Xid`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XidError {
    #[error("global transaction id must not be empty")]
    EmptyGtrid,

    #[error("branch qualifier must not be empty")]
    EmptyBqual,

    #[error("global transaction id is {0} bytes, limit is {MAX_GTRID_SIZE}")]
    GtridTooLong(usize),

    #[error("branch qualifier is {0} bytes, limit is {MAX_BQUAL_SIZE}")]
    BqualTooLong(usize),

    #[error("malformed xid: {0}")]
    Malformed(String),
}
