//! PPM — Provider Protocol Machine (§4.4): per input IOCR, a pre-formatted
//! Ethernet frame whose payload, cycle-counter and status bytes are updated
//! each scheduler tick. Transmission is deadline-monotonic so drift does
//! not accumulate.

use alloc::vec::Vec;

use crate::error::ArError;
use crate::frame::cyclic::next_ppm_cycle_counter;
use crate::frame::{ApduStatus, DataStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpmState {
    WStart,
    Run,
}

/// A provider instance owning one preformatted frame (§4.4). The header is
/// written once at create; only payload/status are touched per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ppm {
    pub state: PpmState,
    pub cycle_counter: u16,
    pub interval_counter_units: u16,
    pub data_status: DataStatus,
    pub next_exec_us: u64,
    pub control_interval_us: u64,
    payload: Vec<u8>,
}

impl Ppm {
    pub fn new(frame_len: usize, interval_counter_units: u16, control_interval_us: u64, first_exec_us: u64) -> Self {
        Ppm {
            state: PpmState::WStart,
            cycle_counter: 0,
            interval_counter_units,
            data_status: DataStatus::empty(),
            next_exec_us: first_exec_us,
            control_interval_us,
            payload: alloc::vec![0u8; frame_len],
        }
    }

    pub fn activate(&mut self) {
        self.state = PpmState::Run;
        self.data_status.insert(DataStatus::PROVIDER_RUN);
    }

    /// The application toggles provider-run via this call (§4.4).
    pub fn set_provider_state(&mut self, running: bool) {
        self.data_status.set(DataStatus::PROVIDER_RUN, running);
    }

    pub fn set_station_problem(&mut self, problem: bool) {
        self.data_status.set(DataStatus::STATION_PROBLEM, problem);
    }

    /// Copies user data and IOPS into the frame payload under the (caller
    /// held) PPM mutex, matching `set_data_and_iops` (§3).
    pub fn set_data_and_iops(&mut self, data: &[u8]) -> Result<(), crate::hal::PnetError> {
        if data.len() != self.payload.len() {
            return Err(crate::hal::PnetError::BufferTooShort);
        }
        self.payload.copy_from_slice(data);
        Ok(())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Writes one IODATA object's byte range (§3's offset-mapped model),
    /// used by callers that address the frame per-(slot,subslot) rather
    /// than supplying the whole frame at once.
    pub fn write_segment(&mut self, offset: u16, data: &[u8]) -> Result<(), crate::hal::PnetError> {
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(crate::hal::PnetError::BufferTooShort)?;
        if end > self.payload.len() {
            return Err(crate::hal::PnetError::BufferTooShort);
        }
        self.payload[start..end].copy_from_slice(data);
        Ok(())
    }

    pub fn write_iops_byte(&mut self, offset: u16, value: u8) -> Result<(), crate::hal::PnetError> {
        let index = offset as usize;
        if index >= self.payload.len() {
            return Err(crate::hal::PnetError::BufferTooShort);
        }
        self.payload[index] = value;
        Ok(())
    }

    /// Advances the cycle counter, schedules the next deadline-monotonic
    /// tick, and returns the APDU status to append to the outgoing frame.
    /// Returns `Err` if the caller's send attempt should be treated as a
    /// failed transmission, which aborts the AR (§4.4).
    pub fn on_tick(&mut self, send_ok: bool) -> Result<ApduStatus, ArError> {
        if !send_ok {
            return Err(ArError::new(crate::error::ErrorClass::Ppm, crate::error::ErrorCode::PpmInvalid));
        }
        self.cycle_counter = next_ppm_cycle_counter(self.cycle_counter, self.interval_counter_units);
        self.next_exec_us += self.control_interval_us;
        self.data_status.insert(DataStatus::DATA_VALID | DataStatus::PRIMARY_OR_BACKUP);
        Ok(ApduStatus { cycle_counter: self.cycle_counter, data_status: self.data_status, transfer_status: 0 })
    }
}
