//! IO Communication Relation: one direction of cyclic data within an AR,
//! bound to one L2 FrameID (§3).

use alloc::vec::Vec;

use crate::types::{ApiNumber, IocrDirection, SlotNumber, SubslotNumber};

/// One offset-mapped data object within an IOCR's cyclic frame (§3): maps a
/// byte range to a (slot, subslot) and carries the offsets of its IOPS/IOCS
/// status bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoDataObject {
    pub api: ApiNumber,
    pub slot: SlotNumber,
    pub subslot: SubslotNumber,
    pub data_offset: u16,
    pub data_length: u16,
    pub iops_offset: u16,
    pub iocs_offset: u16,
}

/// One IOCR: a FrameID, cyclic timing parameters, and the list of IODATA
/// descriptors mapping frame offsets to subslots (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iocr {
    pub direction: IocrDirection,
    pub frame_id: u16,
    pub vlan_tci: Option<u16>,
    /// Units of 31.25 µs (§3).
    pub send_clock_factor: u16,
    pub reduction_ratio: u16,
    /// Consecutive missed control-intervals tolerated before DHT expiry (§4.3).
    pub data_hold_factor: u16,
    pub frame_send_offset: u16,
    pub data_objects: Vec<IoDataObject>,
}

impl Iocr {
    /// `control_interval = send_clock_factor × reduction_ratio × 31.25 µs` (§4.3).
    pub fn control_interval_us(&self) -> u64 {
        crate::types::SEND_CLOCK_BASE_NS as u64 * self.send_clock_factor as u64 * self.reduction_ratio as u64
            / 1_000
    }

    /// Total length of the cyclic payload, trailing APDU status excluded.
    pub fn payload_len(&self) -> u16 {
        self.data_objects
            .iter()
            .map(|o| o.data_offset + o.data_length)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_interval_matches_spec_formula() {
        let iocr = Iocr {
            direction: IocrDirection::Output,
            frame_id: 0x8000,
            vlan_tci: None,
            send_clock_factor: 32,
            reduction_ratio: 1,
            data_hold_factor: 3,
            frame_send_offset: 0,
            data_objects: Vec::new(),
        };
        // 31.25us * 32 = 1000us = 1ms.
        assert_eq!(iocr.control_interval_us(), 1_000);
    }
}
