//! Serial port identifiers

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque token naming one serial port (e.g., COM3, /dev/ttyUSB0)
///
/// Equality is by value. The `Ord` impl is plain string ordering and only
/// exists so snapshots can live in a `BTreeSet` with a stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(String);

impl PortId {
    /// Create an identifier from a port name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The port name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric suffix of the port name (`COM12` -> 12)
    ///
    /// Returns `None` when the name has no trailing digits, when the suffix
    /// does not fit in a `u8`, or when it is zero. Port numbers start at 1,
    /// so a zero suffix never names a numbered COM port.
    pub fn number(&self) -> Option<u8> {
        let digits = self
            .0
            .bytes()
            .rev()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let suffix = &self.0[self.0.len() - digits..];
        suffix.parse::<u8>().ok().filter(|n| *n != 0)
    }

    /// Check whether two identifiers carry the same numeric suffix
    pub fn same_number(&self, other: &PortId) -> bool {
        matches!((self.number(), other.number()), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PortId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&str> for PortId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl Borrow<str> for PortId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PortId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_from_com_names() {
        assert_eq!(PortId::from("COM1").number(), Some(1));
        assert_eq!(PortId::from("COM12").number(), Some(12));
        assert_eq!(PortId::from("COM255").number(), Some(255));
    }

    #[test]
    fn test_number_rejects_missing_zero_and_overflow() {
        assert_eq!(PortId::from("COM").number(), None);
        assert_eq!(PortId::from("/dev/ttyUSB0").number(), None);
        assert_eq!(PortId::from("COM256").number(), None);
        assert_eq!(PortId::from("").number(), None);
    }

    #[test]
    fn test_number_from_unix_names() {
        assert_eq!(PortId::from("/dev/ttyACM3").number(), Some(3));
        assert_eq!(PortId::from("/dev/cu.usbserial-1410").number(), None);
    }

    #[test]
    fn test_same_number() {
        let a = PortId::from("COM4");
        assert!(a.same_number(&PortId::from("/dev/ttyS4")));
        assert!(!a.same_number(&PortId::from("COM5")));
        assert!(!PortId::from("COM").same_number(&PortId::from("COM")));
    }

    proptest::proptest! {
        #[test]
        fn number_matches_com_suffix(n in 1u8..=255) {
            proptest::prop_assert_eq!(PortId::new(format!("COM{}", n)).number(), Some(n));
        }
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = PortId::from("COM7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"COM7\"");
        let back: PortId = serde_json::from_str("\"COM7\"").unwrap();
        assert_eq!(back, id);
    }
}
