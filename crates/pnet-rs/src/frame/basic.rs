// crates/pnet-rs/src/frame/basic.rs
use core::fmt;

use crate::hal::PnetError;
use crate::types::{ETHERTYPE_LLDP, ETHERTYPE_PROFINET, MAX_FRAME_SIZE};

pub const MAC_ADDRESS_SIZE: usize = 6;
pub const ETHERNET_HEADER_SIZE: usize = 14;
pub const VLAN_TAG_SIZE: usize = 4;
const VLAN_TPID: u16 = 0x8100;

/// A 6-byte IEEE 802 MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress(pub [u8; MAC_ADDRESS_SIZE]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    pub const fn new(bytes: [u8; MAC_ADDRESS_SIZE]) -> Self {
        MacAddress(bytes)
    }

    pub fn is_multicast(&self) -> bool {
        (self.0[0] & 0x01) != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xFF; 6]
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddress(bytes)
    }
}

/// A parsed Ethernet II header, with an optional 802.1Q VLAN tag as carried
/// by PROFINET IOCRs (§3: each IOCR holds a VLAN tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination_mac: MacAddress,
    pub source_mac: MacAddress,
    pub vlan_tci: Option<u16>,
    pub ether_type: u16,
}

impl EthernetHeader {
    pub fn new(dest: MacAddress, src: MacAddress, ether_type: u16) -> Self {
        EthernetHeader { destination_mac: dest, source_mac: src, vlan_tci: None, ether_type }
    }

    pub fn with_vlan(mut self, tci: u16) -> Self {
        self.vlan_tci = Some(tci);
        self
    }

    pub fn is_profinet(&self) -> bool {
        self.ether_type == ETHERTYPE_PROFINET
    }

    pub fn is_lldp(&self) -> bool {
        self.ether_type == ETHERTYPE_LLDP
    }

    /// Length of the header as it appears on the wire (14 or 18 bytes).
    pub fn wire_len(&self) -> usize {
        if self.vlan_tci.is_some() { ETHERNET_HEADER_SIZE + VLAN_TAG_SIZE } else { ETHERNET_HEADER_SIZE }
    }

    pub fn parse(buffer: &[u8]) -> Result<(Self, &[u8]), PnetError> {
        if buffer.len() < ETHERNET_HEADER_SIZE {
            return Err(PnetError::InvalidEthernetFrame);
        }
        let mut destination_mac = [0u8; 6];
        destination_mac.copy_from_slice(&buffer[0..6]);
        let mut source_mac = [0u8; 6];
        source_mac.copy_from_slice(&buffer[6..12]);
        let tentative_type = u16::from_be_bytes([buffer[12], buffer[13]]);

        if tentative_type == VLAN_TPID {
            if buffer.len() < ETHERNET_HEADER_SIZE + VLAN_TAG_SIZE {
                return Err(PnetError::InvalidEthernetFrame);
            }
            let tci = u16::from_be_bytes([buffer[14], buffer[15]]);
            let ether_type = u16::from_be_bytes([buffer[16], buffer[17]]);
            let header = EthernetHeader {
                destination_mac: MacAddress(destination_mac),
                source_mac: MacAddress(source_mac),
                vlan_tci: Some(tci),
                ether_type,
            };
            Ok((header, &buffer[18..]))
        } else {
            let header = EthernetHeader {
                destination_mac: MacAddress(destination_mac),
                source_mac: MacAddress(source_mac),
                vlan_tci: None,
                ether_type: tentative_type,
            };
            Ok((header, &buffer[14..]))
        }
    }

    /// Writes the header into `buffer`, returning the number of bytes written.
    pub fn write(&self, buffer: &mut [u8]) -> Result<usize, PnetError> {
        let len = self.wire_len();
        if buffer.len() < len || len > MAX_FRAME_SIZE {
            return Err(PnetError::BufferTooShort);
        }
        buffer[0..6].copy_from_slice(&self.destination_mac.0);
        buffer[6..12].copy_from_slice(&self.source_mac.0);
        if let Some(tci) = self.vlan_tci {
            buffer[12..14].copy_from_slice(&VLAN_TPID.to_be_bytes());
            buffer[14..16].copy_from_slice(&tci.to_be_bytes());
            buffer[16..18].copy_from_slice(&self.ether_type.to_be_bytes());
        } else {
            buffer[12..14].copy_from_slice(&self.ether_type.to_be_bytes());
        }
        Ok(len)
    }
}
