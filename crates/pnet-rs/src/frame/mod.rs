// crates/pnet-rs/src/frame/mod.rs
//! Ethernet-level framing for PROFINET IO: header parsing, FrameID
//! classification and dispatch, the cyclic APDU-status trailer, DCP PDUs,
//! and alarm PDUs.

pub mod alarm;
pub mod basic;
pub mod cyclic;
pub mod dcp;

pub use alarm::{AlarmHeader, AlarmPayload, AlarmPdu, AlarmPduType};
pub use basic::{EthernetHeader, MacAddress};
pub use cyclic::{ApduStatus, DataStatus};
pub use dcp::{DcpBlock, DcpBlockError, DcpPdu, ServiceId as DcpServiceId, ServiceType as DcpServiceType};

use alloc::vec::Vec;

use crate::hal::PnetError;
use crate::types::FrameIdClass;

/// A classified, partially-decoded inbound PROFINET frame. The header has
/// already been parsed and the FrameID classified (§4.2); the caller
/// (usually the top-level device loop) routes to the owning component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PnFrame {
    Dcp(DcpPdu),
    /// A cyclic RT frame: the FrameID, the trailing APDU status, and the
    /// payload bytes preceding it (the IOCR data).
    Cyclic { frame_id: u16, status: ApduStatus, payload: Vec<u8> },
    Alarm(AlarmPdu),
    /// LLDP and any other EtherType/FrameID the core doesn't decode further.
    Other { ether_type: u16, frame_id: Option<u16>, payload: Vec<u8> },
}

/// Splits an inbound Ethernet frame into its header and a classified
/// [`PnFrame`]. DCP/alarm payload decoding is left to CMINA/ALPM, which
/// know the full PDU grammar; this function only carries the classification
/// (§4.2) far enough to route the frame.
pub fn classify_frame(buffer: &[u8]) -> Result<(EthernetHeader, PnFrame), PnetError> {
    let (header, rest) = EthernetHeader::parse(buffer)?;

    if header.is_lldp() {
        return Ok((header, PnFrame::Other { ether_type: header.ether_type, frame_id: None, payload: rest.to_vec() }));
    }

    if !header.is_profinet() {
        return Err(PnetError::InvalidEthernetFrame);
    }

    if rest.len() < 2 {
        return Err(PnetError::InvalidPdu);
    }
    let frame_id = u16::from_be_bytes([rest[0], rest[1]]);
    let body = &rest[2..];

    match FrameIdClass::classify(frame_id) {
        FrameIdClass::CyclicRt => {
            if body.len() < cyclic::APDU_STATUS_SIZE {
                return Err(PnetError::InvalidPdu);
            }
            let split = body.len() - cyclic::APDU_STATUS_SIZE;
            let status = ApduStatus::parse(&body[split..])?;
            let frame = PnFrame::Cyclic { frame_id, status, payload: body[..split].to_vec() };
            Ok((header, frame))
        }
        FrameIdClass::AlarmHigh | FrameIdClass::AlarmLow => {
            let alarm_header = AlarmHeader::parse(body)?;
            Ok((header, PnFrame::Alarm(AlarmPdu { header: alarm_header, payload: None })))
        }
        FrameIdClass::DcpHello | FrameIdClass::DcpGetSet | FrameIdClass::DcpIdentMulticast => {
            Ok((header, PnFrame::Other { ether_type: header.ether_type, frame_id: Some(frame_id), payload: body.to_vec() }))
        }
        FrameIdClass::Other => Ok((header, PnFrame::Other { ether_type: header.ether_type, frame_id: Some(frame_id), payload: body.to_vec() })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ETHERTYPE_PROFINET, FRAME_ID_CYCLIC_RT_START};

    #[test]
    fn classifies_cyclic_frame() {
        let header = EthernetHeader::new(MacAddress::new([1; 6]), MacAddress::new([2; 6]), ETHERTYPE_PROFINET);
        let mut buf = Vec::new();
        buf.resize(header.wire_len(), 0);
        header.write(&mut buf).unwrap();
        buf.extend_from_slice(&FRAME_ID_CYCLIC_RT_START.to_be_bytes());
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]); // payload
        buf.extend_from_slice(&[0x00, 0x01, 0b0000_0101, 0x00]); // apdu status

        let (_parsed_header, frame) = classify_frame(&buf).unwrap();
        match frame {
            PnFrame::Cyclic { frame_id, status, payload } => {
                assert_eq!(frame_id, FRAME_ID_CYCLIC_RT_START);
                assert_eq!(status.cycle_counter, 1);
                assert_eq!(payload, alloc::vec![0xAA, 0xBB, 0xCC]);
            }
            _ => panic!("expected cyclic frame"),
        }
    }
}
