//! NFS status codes as seen from the client side of a READ or LOOKUP call.
//!
//! NFS version 2 (RFC 1094) and version 3 (RFC 1813) share the numbering for
//! the classic UNIX errno-style codes, version 3 adds the 10001+ range and
//! version 2 has the obsolete `WFLUSH`. Embedded players answer with either
//! dialect, so both are decoded into one enumeration.

use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::{FromPrimitive, ToPrimitive};

/// Status word carried in every NFS reply body
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum NfsStatus {
    Ok = 0,
    /// Caller is not the owner or not privileged
    Perm = 1,
    NoEnt = 2,
    Io = 5,
    NxIo = 6,
    Acces = 13,
    Exist = 17,
    XDev = 18,
    NoDev = 19,
    NotDir = 20,
    IsDir = 21,
    Inval = 22,
    FBig = 27,
    NoSpc = 28,
    RoFs = 30,
    MLink = 31,
    NameTooLong = 63,
    NotEmpty = 66,
    DQuot = 69,
    /// The file handle no longer refers to a live object, typically because
    /// the medium was ejected from the player
    Stale = 70,
    Remote = 71,
    /// NFSv2 only: write cache flushed to disk
    WFlush = 99,
    BadHandle = 10001,
    NotSync = 10002,
    BadCookie = 10003,
    NotSupp = 10004,
    TooSmall = 10005,
    ServerFault = 10006,
    BadType = 10007,
    /// Server accepted the request but could not complete it in time
    Jukebox = 10008,
}

impl NfsStatus {
    /// Decodes a raw status word, `None` for values outside both protocol versions
    pub fn from_wire(raw: u32) -> Option<Self> {
        Self::from_u32(raw)
    }

    /// Raw status word as it appears in a reply
    pub fn to_wire(self) -> u32 {
        // repr(u32) makes this infallible
        self.to_u32().unwrap_or(self as u32)
    }

    /// Codes after which repeating the identical request may succeed
    pub fn is_transient(self) -> bool {
        matches!(self, NfsStatus::Jukebox | NfsStatus::Io | NfsStatus::ServerFault)
    }
}

impl fmt::Display for NfsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.to_wire())
    }
}
