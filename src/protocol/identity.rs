//! Device identity: hardware address and client identifier
//!
//! The hardware address is the stable key the backend uses to tell devices
//! apart, so it is embedded in every topic the device publishes or subscribes to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// 6-byte hardware (MAC) address, displayed as uppercase colon-separated hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Read the address of a network interface from sysfs
    /// (`/sys/class/net/<iface>/address`)
    pub fn from_interface(interface: &str) -> Result<Self, IdentityError> {
        let path = Path::new("/sys/class/net").join(interface).join("address");
        let raw = std::fs::read_to_string(&path).map_err(|e| IdentityError::InterfaceRead {
            interface: interface.to_string(),
            source: e,
        })?;
        raw.trim().parse()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = IdentityError;

    /// Accepts `:` or `-` separators (one kind throughout) in either case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidMacAddress(s.to_string());

        let separator = if s.contains(':') { ':' } else { '-' };
        let parts: Vec<&str> = s.split(separator).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        Ok(Self(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Immutable identity of this device, fixed at boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    mac: MacAddress,
    client_id: String,
}

impl DeviceIdentity {
    pub fn new(mac: MacAddress, client_id: impl Into<String>) -> Result<Self, IdentityError> {
        let client_id = client_id.into();
        validate_client_id(&client_id)?;
        Ok(Self { mac, client_id })
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Client identifiers must match `[a-zA-Z0-9._-]+`
pub fn validate_client_id(client_id: &str) -> Result<(), IdentityError> {
    if client_id.is_empty() {
        return Err(IdentityError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(IdentityError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid MAC address: '{0}' (expected XX:XX:XX:XX:XX:XX)")]
    InvalidMacAddress(String),
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0}'")]
    InvalidClientIdChar(char),
    #[error("Failed to read hardware address of interface {interface}: {source}")]
    InterfaceRead {
        interface: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mac_display_is_uppercase_colon_hex() {
        let mac = MacAddress::new([0x7c, 0x9e, 0xbd, 0xf1, 0xda, 0xe4]);
        assert_eq!(mac.to_string(), "7C:9E:BD:F1:DA:E4");
    }

    #[test]
    fn test_mac_parse_accepts_lowercase_and_dashes() {
        let expected = MacAddress::new([0x7c, 0x9e, 0xbd, 0xf1, 0xda, 0xe4]);
        assert_eq!("7c:9e:bd:f1:da:e4".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("7C-9E-BD-F1-DA-E4".parse::<MacAddress>().unwrap(), expected);
    }

    #[test]
    fn test_mac_parse_rejects_malformed() {
        for raw in [
            "",
            "7C:9E:BD:F1:DA",
            "7C:9E:BD:F1:DA:E4:00",
            "7C:9E:BD:F1:DA:G4",
            "7C9E:BD:F1:DA:E4:0",
            "7C:9E:BD:F1:DA:E",
            "+A:9E:BD:F1:DA:E4",
            "7C:9E:BD:F1:DA:+4",
            "7C-9E-BD-F1-DA-+4",
            "7C:9E-BD:F1:DA:E4",
            "7C-9E-BD-F1-DA:E4",
            "7C:9E:BD:F1: A:E4",
        ] {
            assert!(raw.parse::<MacAddress>().is_err(), "should reject {raw:?}");
        }
    }

    #[test]
    fn test_client_id_validation() {
        assert!(validate_client_id("ESP32-Salon").is_ok());
        assert!(validate_client_id("edge_01.kitchen").is_ok());
        assert!(matches!(
            validate_client_id(""),
            Err(IdentityError::EmptyClientId)
        ));
        assert!(matches!(
            validate_client_id("edge/01"),
            Err(IdentityError::InvalidClientIdChar('/'))
        ));
        assert!(matches!(
            validate_client_id("edge 01"),
            Err(IdentityError::InvalidClientIdChar(' '))
        ));
    }

    #[test]
    fn test_mac_serde_as_string() {
        let mac: MacAddress = serde_json::from_str("\"7c:9e:bd:f1:da:e4\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"7C:9E:BD:F1:DA:E4\"");
    }

    proptest! {
        #[test]
        fn mac_display_parses_back(bytes in any::<[u8; 6]>()) {
            let mac = MacAddress::new(bytes);
            let parsed: MacAddress = mac.to_string().parse().unwrap();
            prop_assert_eq!(parsed, mac);
        }
    }
}
