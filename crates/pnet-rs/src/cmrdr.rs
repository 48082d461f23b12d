//! CMRDR — Record Read (§4.11): one entry point dispatching on the
//! request's record index, banded into I&M0..I&M4, PD records, port
//! records, diagnosis records, implicit AR records and application-defined
//! indices. Grounded on the teacher's SDO `od::mod` style of building a
//! response with a fixed block-writer advancing a position cursor.

use crate::ar::Arep;
use crate::diagnosis::{DiagContent, DiagnosisPool};
use crate::hal::{DeviceCallbacks, Identity, PnetError};
use crate::types::{SlotNumber, SubslotNumber};

pub const IM0_INDEX: u32 = 0xAFF0;
pub const IM1_INDEX: u32 = 0xAFF1;
pub const IM2_INDEX: u32 = 0xAFF2;
pub const IM3_INDEX: u32 = 0xAFF3;
pub const IM4_INDEX: u32 = 0xAFF4;
pub const AR_DATA_INDEX: u32 = 0x8028;
const PD_RECORD_RANGE: core::ops::RangeInclusive<u32> = 0x8000..=0x801F;
const PORT_RECORD_RANGE: core::ops::RangeInclusive<u32> = 0x8080..=0x80FF;
const DIAGNOSIS_RECORD_RANGE: core::ops::RangeInclusive<u32> = 0x0800..=0x082F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBand {
    Im0,
    Im(u8),
    PdRecord,
    PortRecord,
    DiagnosisRecord,
    ArData,
    Application,
}

pub fn classify_record_index(index: u32) -> RecordBand {
    match index {
        IM0_INDEX => RecordBand::Im0,
        IM1_INDEX => RecordBand::Im(1),
        IM2_INDEX => RecordBand::Im(2),
        IM3_INDEX => RecordBand::Im(3),
        IM4_INDEX => RecordBand::Im(4),
        AR_DATA_INDEX => RecordBand::ArData,
        i if PD_RECORD_RANGE.contains(&i) => RecordBand::PdRecord,
        i if PORT_RECORD_RANGE.contains(&i) => RecordBand::PortRecord,
        i if DIAGNOSIS_RECORD_RANGE.contains(&i) => RecordBand::DiagnosisRecord,
        _ => RecordBand::Application,
    }
}

/// Fixed block-writer: advances a position cursor over the caller's
/// response buffer, rejecting writes that would overrun it.
pub struct BlockWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> BlockWriter<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        BlockWriter { buffer, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], PnetError> {
        let end = self.position.checked_add(len).ok_or(PnetError::BufferTooShort)?;
        if end > self.buffer.len() {
            return Err(PnetError::BufferTooShort);
        }
        let slice = &mut self.buffer[self.position..end];
        self.position = end;
        Ok(slice)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), PnetError> {
        self.reserve(1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), PnetError> {
        self.reserve(2)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), PnetError> {
        self.reserve(4)?.copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), PnetError> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }
}

/// Per-AR / per-band storage backing the record read/write dispatch.
/// Implemented by the top-level device aggregator over FSPM (I&M1..4) and
/// PDPort persistent data (§10 supplemented features).
pub trait RecordStore {
    fn read_im(&self, which: u8, out: &mut BlockWriter) -> Result<(), PnetError>;
    fn write_im(&mut self, which: u8, data: &[u8]) -> Result<(), PnetError>;
    fn read_pd_record(&self, index: u32, out: &mut BlockWriter) -> Result<(), PnetError>;
    fn read_port_record(&self, index: u32, out: &mut BlockWriter) -> Result<(), PnetError>;
    fn write_port_record(&mut self, index: u32, data: &[u8]) -> Result<(), PnetError>;
}

fn write_im0(identity: &Identity, out: &mut BlockWriter) -> Result<(), PnetError> {
    out.write_u16(identity.vendor_id)?;
    out.write_u16(identity.device_id)?;
    let mut order_id = [0x20u8; 20];
    let bytes = identity.order_id.as_bytes();
    let n = bytes.len().min(20);
    order_id[..n].copy_from_slice(&bytes[..n]);
    out.write_bytes(&order_id)?;
    let mut serial = [0x20u8; 16];
    let bytes = identity.serial_number.as_bytes();
    let n = bytes.len().min(16);
    serial[..n].copy_from_slice(&bytes[..n]);
    out.write_bytes(&serial)?;
    out.write_u16(identity.hw_revision)?;
    out.write_u8(identity.sw_revision_prefix)?;
    out.write_u8(identity.sw_revision_functional)?;
    out.write_u8(identity.sw_revision_bugfix)?;
    out.write_u8(identity.sw_revision_internal)?;
    out.write_u16(0)?; // revision_counter
    out.write_u16(identity.profile_id)?;
    out.write_u16(identity.profile_specific_type)?;
    out.write_u8(1)?; // IM version major
    out.write_u8(1)?; // IM version minor
    out.write_u16(0)?; // IM supported bitfield
    Ok(())
}

fn write_diagnosis(pool: &DiagnosisPool, slot: SlotNumber, subslot: SubslotNumber, out: &mut BlockWriter) -> Result<(), PnetError> {
    let count = pool.items_for_subslot(slot, subslot).count() as u16;
    out.write_u16(count)?;
    for item in pool.items_for_subslot(slot, subslot) {
        match &item.content {
            DiagContent::Standard { channel_number, channel_error_type, extended_error_type, extended_value } => {
                out.write_u16(*channel_number)?;
                out.write_u16(*channel_error_type)?;
                out.write_u16(*extended_error_type)?;
                out.write_u32(*extended_value)?;
            }
            DiagContent::Usi { usi, payload } => {
                out.write_u16(*usi)?;
                out.write_u16(payload.len() as u16)?;
                out.write_bytes(payload)?;
            }
        }
    }
    Ok(())
}

/// Record Read dispatch (§4.11). Restarting the CMSM watchdog on success is
/// the caller's responsibility (done uniformly at the CMRPC layer).
#[allow(clippy::too_many_arguments)]
pub fn record_read(
    arep: Arep,
    index: u32,
    slot: SlotNumber,
    subslot: SubslotNumber,
    identity: &Identity,
    diagnosis: &DiagnosisPool,
    store: &dyn RecordStore,
    callbacks: &mut dyn DeviceCallbacks,
    buffer: &mut [u8],
) -> Result<usize, PnetError> {
    let mut writer = BlockWriter::new(buffer);
    match classify_record_index(index) {
        RecordBand::Im0 => write_im0(identity, &mut writer)?,
        RecordBand::Im(which) => store.read_im(which, &mut writer)?,
        RecordBand::PdRecord => store.read_pd_record(index, &mut writer)?,
        RecordBand::PortRecord => store.read_port_record(index, &mut writer)?,
        RecordBand::DiagnosisRecord => write_diagnosis(diagnosis, slot, subslot, &mut writer)?,
        RecordBand::ArData => writer.write_u32(arep)?,
        RecordBand::Application => {
            let written = callbacks.read_cb(arep, index, buffer).ok_or(PnetError::RecordNotFound(index))?;
            return Ok(written);
        }
    }
    Ok(writer.position())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStore;
    impl RecordStore for NullStore {
        fn read_im(&self, _which: u8, _out: &mut BlockWriter) -> Result<(), PnetError> {
            Ok(())
        }
        fn write_im(&mut self, _which: u8, _data: &[u8]) -> Result<(), PnetError> {
            Ok(())
        }
        fn read_pd_record(&self, _index: u32, _out: &mut BlockWriter) -> Result<(), PnetError> {
            Ok(())
        }
        fn read_port_record(&self, _index: u32, _out: &mut BlockWriter) -> Result<(), PnetError> {
            Ok(())
        }
        fn write_port_record(&mut self, _index: u32, _data: &[u8]) -> Result<(), PnetError> {
            Ok(())
        }
    }

    struct NullCallbacks;
    impl DeviceCallbacks for NullCallbacks {
        fn state_cb(&mut self, _arep: u32, _event: crate::hal::ArEvent) {}
        fn connect_cb(&mut self, _arep: u32) -> Result<(), (u16, u16)> {
            Ok(())
        }
        fn release_cb(&mut self, _arep: u32) {}
        fn dcontrol_cb(&mut self, _arep: u32, _sub_cmd: u16) -> Result<(), (u16, u16)> {
            Ok(())
        }
        fn ccontrol_cb(&mut self, _arep: u32) {}
        fn read_cb(&mut self, _arep: u32, _index: u32, _buffer: &mut [u8]) -> Option<usize> {
            None
        }
        fn write_cb(&mut self, _arep: u32, _index: u32, _data: &[u8]) -> Result<(), (u16, u16)> {
            Ok(())
        }
        fn exp_module_cb(&mut self, _api: u32, _slot: u16, _module_ident: u32) -> bool {
            true
        }
        fn exp_submodule_cb(&mut self, _api: u32, _slot: u16, _subslot: u16, _submodule_ident: u32) -> bool {
            true
        }
        fn new_data_status_cb(&mut self, _arep: u32, _crep: u32, _data_status: u8) {}
        fn alarm_ind_cb(&mut self, _arep: u32, _api: u32, _slot: u16, _subslot: u16, _payload: &[u8]) {}
        fn alarm_cnf_cb(&mut self, _arep: u32, _accepted: bool) {}
        fn alarm_ack_cnf_cb(&mut self, _arep: u32, _result: i32) {}
        fn reset_cb(&mut self, _mode: crate::hal::ResetMode) {}
        fn signal_led_cb(&mut self, _on: bool) {}
    }

    #[test]
    fn classifies_known_bands() {
        assert_eq!(classify_record_index(IM0_INDEX), RecordBand::Im0);
        assert_eq!(classify_record_index(IM3_INDEX), RecordBand::Im(3));
        assert_eq!(classify_record_index(AR_DATA_INDEX), RecordBand::ArData);
        assert_eq!(classify_record_index(0x9999), RecordBand::Application);
    }

    #[test]
    fn im0_read_writes_vendor_and_device_id() {
        let identity = Identity { vendor_id: 0x1234, device_id: 0x5678, ..Default::default() };
        let diagnosis = DiagnosisPool::new(4);
        let store = NullStore;
        let mut callbacks = NullCallbacks;
        let mut buffer = [0u8; 64];
        let len = record_read(1, IM0_INDEX, 0, 0, &identity, &diagnosis, &store, &mut callbacks, &mut buffer).unwrap();
        assert!(len >= 4);
        assert_eq!(&buffer[0..2], &0x1234u16.to_be_bytes());
        assert_eq!(&buffer[2..4], &0x5678u16.to_be_bytes());
    }

    #[test]
    fn unknown_application_index_without_callback_is_not_found() {
        let identity = Identity::default();
        let diagnosis = DiagnosisPool::new(4);
        let store = NullStore;
        let mut callbacks = NullCallbacks;
        let mut buffer = [0u8; 16];
        let err = record_read(1, 0x9999, 0, 0, &identity, &diagnosis, &store, &mut callbacks, &mut buffer).unwrap_err();
        assert_eq!(err, PnetError::RecordNotFound(0x9999));
    }
}
