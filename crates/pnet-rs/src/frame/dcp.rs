//! Discovery & Configuration Protocol (§4.6): Identify/Get/Set/Hello PDUs,
//! station-name and IP-suite validation rules.

use alloc::string::String;
use alloc::vec::Vec;

use crate::hal::PnetError;
use crate::types::IpAddress;

/// DCP service IDs (the request kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceId {
    Get,
    Set,
    Identify,
    Hello,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Request,
    ResponseSuccess,
    ResponseUnsupported,
}

/// Block-error codes a malformed Set response carries (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcpBlockError {
    NotSupportedOption,
    NotSupportedSuboption,
    SetNotPossible,
    ResourceError,
}

/// One parsed DCP option/suboption block. Only the options the core acts
/// on are modeled explicitly; anything else round-trips as `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DcpBlock {
    MacAddress([u8; 6]),
    IpParameter { ip: IpAddress, mask: IpAddress, gateway: IpAddress },
    StationName(String),
    DeviceId { vendor_id: u16, device_id: u16 },
    DeviceRole(u8),
    /// Reset-to-factory scope byte (§4.7).
    ResetFactory(u8),
    /// "Signal" / flash-LED control suboption (§10 supplemented feature).
    Signal(bool),
    ResponseDelayFactor(u16),
    AllSelector,
    Unknown { option: u8, suboption: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcpPdu {
    pub service_id: ServiceId,
    pub service_type: ServiceType,
    pub xid: u32,
    pub blocks: Vec<DcpBlock>,
}

impl DcpPdu {
    pub fn new(service_id: ServiceId, service_type: ServiceType, xid: u32) -> Self {
        DcpPdu { service_id, service_type, xid, blocks: Vec::new() }
    }
}

/// §8 property 4 / §8-S1: station-name lexical validation.
///
/// Accepts iff total length is in `[1, 240]` (the empty string is also
/// accepted, meaning "unset"), every label matches `[a-z0-9-]+`, no label
/// starts or ends with `-`, the first label does not match `port-[0-9]{3}`
/// or `port-[0-9]{3}-[0-9]{5}`, and the name is not of the form
/// `N.N.N.N` (all-digit labels).
pub fn validate_station_name(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    if name.len() > 240 {
        return false;
    }

    let labels: Vec<&str> = name.split('.').collect();
    if labels.iter().any(|l| l.is_empty()) {
        return false;
    }

    for label in &labels {
        if !label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-') {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
    }

    if labels.iter().all(|l| l.bytes().all(|b| b.is_ascii_digit())) {
        return false;
    }

    if let Some(first) = labels.first() {
        if is_reserved_port_label(first) {
            return false;
        }
    }

    true
}

/// Matches `port-[0-9]{3}` or `port-[0-9]{3}-[0-9]{5}` literally.
fn is_reserved_port_label(label: &str) -> bool {
    let Some(rest) = label.strip_prefix("port-") else { return false };
    let bytes = rest.as_bytes();
    if bytes.len() == 3 && bytes.iter().all(u8::is_ascii_digit) {
        return true;
    }
    if bytes.len() == 3 + 1 + 5
        && bytes[3] == b'-'
        && bytes[0..3].iter().all(u8::is_ascii_digit)
        && bytes[4..9].iter().all(u8::is_ascii_digit)
    {
        return true;
    }
    false
}

/// §8 property 5: `mask` must be a contiguous-ones mask, and `ip` checked
/// against it and against the reserved ranges.
pub fn is_netmask_valid(mask: IpAddress) -> bool {
    let m = mask.as_u32();
    let inverted = !m;
    // A contiguous-ones mask plus one equals a power of two (or is all-ones/all-zero).
    (inverted == u32::MAX) || (inverted & (inverted.wrapping_add(1)) == 0)
}

/// §8 property 5: `is_ipaddress_valid(m, ip)` returns true iff `m` is a
/// contiguous-ones mask and `(ip & !m) not in {0, !m}` and `ip` is not in
/// 0.0.0.0/8, 127.0.0.0/8, 224.0.0.0/4, or 240.0.0.0/4.
pub fn is_ipaddress_valid(mask: IpAddress, ip: IpAddress) -> bool {
    if !is_netmask_valid(mask) {
        return false;
    }
    let m = mask.as_u32();
    let host = ip.as_u32() & !m;
    if host == 0 || host == !m {
        return false;
    }
    let octet0 = (ip.as_u32() >> 24) as u8;
    if octet0 == 0 || octet0 == 127 {
        return false;
    }
    if (224..=239).contains(&octet0) || octet0 >= 240 {
        return false;
    }
    true
}

/// Delay returned by `Identify` responders before replying, a deterministic
/// fraction of a 1 s window derived from the device MAC and the
/// response-delay-factor field, so concurrent devices don't collide (§4.6).
pub fn identify_response_delay_ms(mac: [u8; 6], response_delay_factor: u16) -> u32 {
    let mut hash: u32 = response_delay_factor as u32;
    for b in mac {
        hash = hash.wrapping_mul(31).wrapping_add(b as u32);
    }
    hash % 1000
}

pub fn block_error_reason(err: DcpBlockError) -> &'static str {
    match err {
        DcpBlockError::NotSupportedOption => "option not supported",
        DcpBlockError::NotSupportedSuboption => "suboption not supported",
        DcpBlockError::SetNotPossible => "set not possible",
        DcpBlockError::ResourceError => "resource error",
    }
}

pub fn reject(err: DcpBlockError) -> PnetError {
    PnetError::ValidationError(block_error_reason(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_station_name_validation() {
        assert!(validate_station_name("abc"));
        assert!(validate_station_name(""));
        assert!(!validate_station_name("port-123"));
        assert!(!validate_station_name("192.168.0.1"));
        assert!(!validate_station_name("-abc"));
        assert!(validate_station_name("ab--c"));
        let too_long: String = core::iter::repeat('a').take(241).collect();
        assert!(!validate_station_name(&too_long));
    }

    #[test]
    fn reserved_port_with_extra_digits_rejected() {
        assert!(!validate_station_name("port-123-45678"));
    }

    #[test]
    fn netmask_must_be_contiguous() {
        assert!(is_netmask_valid(IpAddress::new(255, 255, 255, 0)));
        assert!(!is_netmask_valid(IpAddress::new(255, 0, 255, 0)));
    }

    #[test]
    fn ip_validity_rejects_reserved_ranges() {
        let mask = IpAddress::new(255, 255, 255, 0);
        assert!(is_ipaddress_valid(mask, IpAddress::new(192, 168, 1, 10)));
        assert!(!is_ipaddress_valid(mask, IpAddress::new(127, 0, 0, 1)));
        assert!(!is_ipaddress_valid(mask, IpAddress::new(224, 0, 0, 1)));
        assert!(!is_ipaddress_valid(mask, IpAddress::new(192, 168, 1, 0)));
        assert!(!is_ipaddress_valid(mask, IpAddress::new(192, 168, 1, 255)));
    }
}
