//! CMWRR — Record Write (§4.12): dispatch mirrors CMRDR, but writes are
//! only accepted while the owning AR is in CMDEV state W_ARDY (parameter
//! phase), except application-defined indices which are also accepted in
//! WDATA.

use crate::ar::Arep;
use crate::cmdev::CmDevState;
use crate::cmrdr::{classify_record_index, RecordBand};
use crate::cmrdr::{IM1_INDEX, IM4_INDEX};
use crate::hal::{DeviceCallbacks, PnetError};

use crate::cmrdr::RecordStore;

fn im_index_in_range(which: u8) -> bool {
    (IM1_INDEX..=IM4_INDEX).contains(&(0xAFF0 + which as u32))
}

/// Record Write dispatch (§4.12). Restarting the CMSM watchdog on success
/// is the caller's responsibility, uniformly at the CMRPC layer.
pub fn record_write(
    arep: Arep,
    index: u32,
    cmdev_state: CmDevState,
    store: &mut dyn RecordStore,
    callbacks: &mut dyn DeviceCallbacks,
    data: &[u8],
) -> Result<(), PnetError> {
    let band = classify_record_index(index);
    let admissible = match band {
        RecordBand::Application => matches!(cmdev_state, CmDevState::WArdy | CmDevState::WData | CmDevState::Data),
        _ => matches!(cmdev_state, CmDevState::WArdy),
    };
    if !admissible {
        return Err(PnetError::InvalidState);
    }

    match band {
        RecordBand::Im(which) if im_index_in_range(which) => store.write_im(which, data),
        RecordBand::Im(_) => Err(PnetError::RecordNotFound(index)),
        RecordBand::Im0 | RecordBand::PdRecord | RecordBand::DiagnosisRecord | RecordBand::ArData => {
            Err(PnetError::ValidationError("record index is read-only"))
        }
        RecordBand::PortRecord => store.write_port_record(index, data),
        RecordBand::Application => callbacks.write_cb(arep, index, data).map_err(|_| PnetError::ValidationError("application write rejected")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmrdr::BlockWriter;
    use crate::hal::{ArEvent, ResetMode};

    struct RecordingStore {
        last_im_write: Option<(u8, alloc::vec::Vec<u8>)>,
    }

    impl RecordStore for RecordingStore {
        fn read_im(&self, _which: u8, _out: &mut BlockWriter) -> Result<(), PnetError> {
            Ok(())
        }
        fn write_im(&mut self, which: u8, data: &[u8]) -> Result<(), PnetError> {
            self.last_im_write = Some((which, data.to_vec()));
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
        fn state_cb(&mut self, _arep: u32, _event: ArEvent) {}
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
        fn reset_cb(&mut self, _mode: ResetMode) {}
        fn signal_led_cb(&mut self, _on: bool) {}
    }

    #[test]
    fn im_write_accepted_in_wardy() {
        let mut store = RecordingStore { last_im_write: None };
        let mut callbacks = NullCallbacks;
        record_write(1, crate::cmrdr::IM1_INDEX, CmDevState::WArdy, &mut store, &mut callbacks, &[1, 2, 3]).unwrap();
        assert_eq!(store.last_im_write, Some((1, alloc::vec![1, 2, 3])));
    }

    #[test]
    fn im_write_rejected_outside_wardy() {
        let mut store = RecordingStore { last_im_write: None };
        let mut callbacks = NullCallbacks;
        let err = record_write(1, crate::cmrdr::IM1_INDEX, CmDevState::Data, &mut store, &mut callbacks, &[1]).unwrap_err();
        assert_eq!(err, PnetError::InvalidState);
    }

    #[test]
    fn application_index_accepted_in_data_state() {
        let mut store = RecordingStore { last_im_write: None };
        let mut callbacks = NullCallbacks;
        record_write(1, 0x9999, CmDevState::Data, &mut store, &mut callbacks, &[1]).unwrap();
    }
}
