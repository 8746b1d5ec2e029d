//! Target device selection.
//!
//! A device is tracked if its advertised name mentions the MeeBlue product
//! marker, or if its address is in the configured set of known beacons.

use std::collections::BTreeSet;

/// Product marker looked for in advertised names (compared lowercase).
pub const PRODUCT_MARKER: &str = "meeblue";

/// Decide whether an advertising device belongs to the monitored set.
///
/// # Arguments
/// * `address` - Device address or platform identifier
/// * `name` - Advertised local name (empty if none)
/// * `known_addresses` - Addresses to track regardless of name, compared
///   ignoring ASCII case
///
/// # Example
/// ```
/// use meeblue_ranger::target::is_target;
/// use std::collections::BTreeSet;
///
/// assert!(is_target("AA:BB:CC:DD:EE:FF", "MeeBlue-Tag-01", &BTreeSet::new()));
/// ```
pub fn is_target(address: &str, name: &str, known_addresses: &BTreeSet<String>) -> bool {
    if name.to_lowercase().contains(PRODUCT_MARKER) {
        return true;
    }

    known_addresses
        .iter()
        .any(|known| known.eq_ignore_ascii_case(address))
}

/// The configured target set, owned by a scan session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetFilter {
    known_addresses: BTreeSet<String>,
}

impl TargetFilter {
    pub fn new<I, S>(known_addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_addresses: known_addresses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, address: &str, name: &str) -> bool {
        is_target(address, name, &self.known_addresses)
    }

    pub fn known_addresses(&self) -> &BTreeSet<String> {
        &self.known_addresses
    }
}

/// Parse a `--device` value.
///
/// Addresses are kept as given; on some platforms they are opaque
/// identifiers rather than MAC addresses, so only emptiness and embedded
/// whitespace are rejected.
///
/// # Example
/// ```
/// use meeblue_ranger::target::parse_device_address;
///
/// assert_eq!(parse_device_address(" DD:2B:7C:C0:A0:84 ").unwrap(), "DD:2B:7C:C0:A0:84");
/// assert!(parse_device_address("").is_err());
/// ```
pub fn parse_device_address(src: &str) -> Result<String, String> {
    let address = src.trim();

    if address.is_empty() {
        return Err("empty device address".into());
    }
    if address.chars().any(char::is_whitespace) {
        return Err(format!("invalid device address: {address}"));
    }

    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(addresses: &[&str]) -> BTreeSet<String> {
        addresses.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_name_match() {
        assert!(is_target(
            "AA:BB:CC:DD:EE:FF",
            "MeeBlue-Tag-01",
            &BTreeSet::new()
        ));
        assert!(is_target("AA:BB:CC:DD:EE:FF", "MEEBLUE", &BTreeSet::new()));
        assert!(is_target("AA:BB:CC:DD:EE:FF", "my meeblue", &BTreeSet::new()));
    }

    #[test]
    fn test_address_match_ignores_case() {
        assert!(is_target(
            "dd:2b:7c:c0:a0:84",
            "",
            &known(&["DD:2B:7C:C0:A0:84"])
        ));
        assert!(is_target(
            "EB:3B:E8:48:F4:90",
            "Other",
            &known(&["DD:2B:7C:C0:A0:84", "eb:3b:e8:48:f4:90"])
        ));
    }

    #[test]
    fn test_no_match() {
        assert!(!is_target("11:22:33:44:55:66", "Other", &BTreeSet::new()));
        assert!(!is_target(
            "11:22:33:44:55:66",
            "Mee Blue",
            &known(&["DD:2B:7C:C0:A0:84"])
        ));
        assert!(!is_target("", "", &BTreeSet::new()));
    }

    #[test]
    fn test_address_must_match_whole() {
        assert!(!is_target(
            "DD:2B:7C:C0:A0",
            "",
            &known(&["DD:2B:7C:C0:A0:84"])
        ));
    }

    #[test]
    fn test_target_filter() {
        let filter = TargetFilter::new(["DD:2B:7C:C0:A0:84"]);
        assert!(filter.matches("dd:2b:7c:c0:a0:84", ""));
        assert!(filter.matches("11:22:33:44:55:66", "meeblue beacon"));
        assert!(!filter.matches("11:22:33:44:55:66", "Other"));
        assert_eq!(filter.known_addresses().len(), 1);
    }

    #[test]
    fn test_default_filter_matches_by_name_only() {
        let filter = TargetFilter::default();
        assert!(filter.matches("11:22:33:44:55:66", "MeeBlue"));
        assert!(!filter.matches("DD:2B:7C:C0:A0:84", ""));
    }

    #[test]
    fn test_parse_device_address() {
        assert_eq!(
            parse_device_address("DD:2B:7C:C0:A0:84").unwrap(),
            "DD:2B:7C:C0:A0:84"
        );
        assert_eq!(
            parse_device_address("5A1C3F0E-8D21-4E8B-9C61-1E2B3C4D5E6F").unwrap(),
            "5A1C3F0E-8D21-4E8B-9C61-1E2B3C4D5E6F"
        );
        assert!(parse_device_address("   ").is_err());
        assert!(parse_device_address("DD:2B 7C").is_err());
    }
}
