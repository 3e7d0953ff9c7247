//! Strongly-typed identifiers.
//!
//! `Id<T>` wraps a ULID and carries a zero-sized marker `T`, so identifiers
//! of different kinds cannot be mixed up while sharing one implementation.
//! ULIDs sort by creation time, which keeps logs and snapshots ordered.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for identifier kinds.
pub trait IdMarker: Send + Sync + 'static {
    /// Display prefix, e.g. `"member-"`.
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Fresh identifier for the current instant.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parses both the prefixed display form and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

/// A member of the system of record being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Member {}

impl IdMarker for Member {
    fn prefix() -> &'static str {
        "member-"
    }
}

pub type MemberId = Id<Member>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_prefixed() {
        let ulid = Ulid::new();
        let id = MemberId::from_ulid(ulid);
        assert_eq!(id.as_ulid(), ulid);
        assert_eq!(id.to_string(), format!("member-{ulid}"));
    }

    #[test]
    fn parses_display_form_and_bare_ulid() {
        let id = MemberId::generate();
        assert_eq!(id.to_string().parse::<MemberId>().unwrap(), id);
        assert_eq!(id.as_ulid().to_string().parse::<MemberId>().unwrap(), id);
        assert!("member-not-a-ulid".parse::<MemberId>().is_err());
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let a = MemberId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = MemberId::generate();
        assert!(a < b);
    }

    #[test]
    fn serde_keeps_ulid_text() {
        let id = MemberId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("{{\"ulid\":\"{}\"}}", id.as_ulid()));
        let back: MemberId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn marker_is_zero_sized() {
        assert_eq!(std::mem::size_of::<MemberId>(), std::mem::size_of::<Ulid>());
    }
}
