//! Periodic LLDP neighbor frame construction (§10 supplemented feature):
//! chassis ID, port ID, TTL and MAU-type/autonegotiation capability,
//! transmitted on a scheduler-driven cadence like HELLO. Grounded on the
//! teacher's frame-builder style (`frame::basic::EthernetHeader::write`
//! plus a fixed TLV cursor), generalized from Ethernet-header writing to
//! LLDP TLVs.

use alloc::string::String;
use alloc::vec::Vec;

use crate::frame::MacAddress;
use crate::hal::PnetError;
use crate::pdport::MauType;
use crate::types::ETHERTYPE_LLDP;

pub const DEFAULT_LLDP_INTERVAL_US: u64 = 5_000_000;
pub const DEFAULT_TTL_S: u16 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlvType {
    ChassisId = 1,
    PortId = 2,
    Ttl = 3,
    OrgSpecific = 127,
    End = 0,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LldpConfig {
    pub chassis_id: String,
    pub port_id: String,
    pub local_mac: MacAddress,
    pub mau_type: MauType,
    pub autonegotiation_supported: bool,
}

fn write_tlv(buffer: &mut Vec<u8>, tlv_type: TlvType, payload: &[u8]) {
    let header = ((tlv_type as u16) << 9) | (payload.len() as u16 & 0x01FF);
    buffer.extend_from_slice(&header.to_be_bytes());
    buffer.extend_from_slice(payload);
}

fn mau_type_code(mau: MauType) -> u16 {
    match mau {
        MauType::Unknown => 0x0000,
        MauType::Copper100BaseTxFullDuplex => 0x0010,
        MauType::Copper1000BaseTFullDuplex => 0x001E,
        MauType::Fiber100BaseFxFullDuplex => 0x0009,
    }
}

/// Builds one LLDPDU Ethernet payload (chassis ID, port ID, TTL, the
/// PROFINET organizationally-specific MAU-type TLV, and the mandatory End
/// TLV). Does not prepend the Ethernet header; the caller (the top-level
/// device loop) wraps this with `frame::basic::EthernetHeader`.
pub fn build_lldpdu(config: &LldpConfig) -> Result<Vec<u8>, PnetError> {
    let mut buffer = Vec::new();

    let mut chassis_payload = Vec::with_capacity(1 + 6);
    chassis_payload.push(4); // subtype: MAC address
    chassis_payload.extend_from_slice(&config.local_mac.0);
    write_tlv(&mut buffer, TlvType::ChassisId, &chassis_payload);

    let mut port_payload = Vec::with_capacity(1 + config.port_id.len());
    port_payload.push(7); // subtype: locally assigned
    port_payload.extend_from_slice(config.port_id.as_bytes());
    write_tlv(&mut buffer, TlvType::PortId, &port_payload);

    write_tlv(&mut buffer, TlvType::Ttl, &DEFAULT_TTL_S.to_be_bytes());

    let mut org_payload = Vec::with_capacity(3 + 1 + 2);
    org_payload.extend_from_slice(&[0x00, 0x0E, 0xCF]); // PROFIBUS org OUI
    org_payload.push(0x04); // subtype: MAU type
    org_payload.push(config.autonegotiation_supported as u8);
    org_payload.extend_from_slice(&mau_type_code(config.mau_type).to_be_bytes());
    write_tlv(&mut buffer, TlvType::OrgSpecific, &org_payload);

    write_tlv(&mut buffer, TlvType::End, &[]);

    Ok(buffer)
}

pub const LLDP_ETHERTYPE: u16 = ETHERTYPE_LLDP;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lldpdu_starts_with_chassis_id_tlv_and_ends_with_end_tlv() {
        let config = LldpConfig {
            chassis_id: "device-1".into(),
            port_id: "port-001".into(),
            local_mac: MacAddress::new([0x02, 0, 0, 0, 0, 1]),
            mau_type: MauType::Copper100BaseTxFullDuplex,
            autonegotiation_supported: true,
        };
        let pdu = build_lldpdu(&config).unwrap();
        let expected_chassis_header = ((TlvType::ChassisId as u16) << 9) | 7;
        assert_eq!(u16::from_be_bytes([pdu[0], pdu[1]]), expected_chassis_header);
        assert_eq!(&pdu[pdu.len() - 2..], &[0u8, 0u8]);
    }
}
