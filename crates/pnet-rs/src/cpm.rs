//! CPM — Consumer Protocol Machine (§4.3): per output IOCR, cyclic L2 frame
//! reception with deadline supervision (the Data Hold Timer) and
//! data-status gating. Modeled after the teacher's `DllCsStateMachine`: a
//! tagged-enum state with transition methods driven by an explicit event.

use alloc::vec::Vec;

use crate::ar::StartupMode;
use crate::error::ArError;
use crate::frame::{ApduStatus, DataStatus, MacAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpmState {
    WStart,
    FRun,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpmOutcome {
    /// Frame accepted; caller should publish the consumer double-buffer.
    Accepted { first_valid: bool },
    /// Frame accepted in state RUN but data-status was valid-but-invalid/
    /// BACKUP-only: tick accepted, no application data surfaced.
    AcceptedNoSurface,
    Rejected,
    /// DHT reached `data_hold_factor` consecutive missed ticks in state RUN.
    DhtExpired(ArError),
    /// CPM stopped while in STARTUP under legacy startup-mode (§11).
    StoppedDuringStartupLegacy(ArError),
}

/// Per-output-IOCR consumer state (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpm {
    pub state: CpmState,
    pub peer_mac: MacAddress,
    pub expected_frame_length: usize,
    pub control_interval_us: u64,
    pub data_hold_factor: u16,
    missed_ticks: u16,
    last_cycle_counter: Option<u16>,
    pub startup_mode: StartupMode,
    /// The consumer double-buffer (§4.3): the most recent validly-surfaced
    /// payload, swapped in atomically on each accepted frame.
    consumer_buffer: Vec<u8>,
}

impl Cpm {
    pub fn new(peer_mac: MacAddress, expected_frame_length: usize, control_interval_us: u64, data_hold_factor: u16, startup_mode: StartupMode) -> Self {
        Cpm {
            state: CpmState::WStart,
            peer_mac,
            expected_frame_length,
            control_interval_us,
            data_hold_factor,
            missed_ticks: 0,
            last_cycle_counter: None,
            startup_mode,
            consumer_buffer: alloc::vec![0u8; expected_frame_length],
        }
    }

    pub fn activate(&mut self) {
        self.state = CpmState::FRun;
    }

    /// The most recently published consumer data (§4.3's `get_data_and_iops`).
    pub fn consumer_data(&self) -> &[u8] {
        &self.consumer_buffer
    }

    /// §4.3: validates frame length, source MAC, transfer-status and
    /// cycle-counter progression, then gates on data-status. `payload` is
    /// published to the consumer double-buffer when accepted.
    pub fn on_frame_received(&mut self, source_mac: MacAddress, payload: &[u8], status: ApduStatus) -> CpmOutcome {
        if payload.len() != self.expected_frame_length {
            return CpmOutcome::Rejected;
        }
        if source_mac != self.peer_mac {
            return CpmOutcome::Rejected;
        }
        if status.transfer_status != 0 {
            return CpmOutcome::Rejected;
        }
        if let Some(prev) = self.last_cycle_counter {
            if !crate::frame::cyclic::cycle_counter_delta_accepted(prev, status.cycle_counter) {
                return CpmOutcome::Rejected;
            }
        }
        self.last_cycle_counter = Some(status.cycle_counter);
        self.missed_ticks = 0;

        let was_frun = self.state == CpmState::FRun;
        if was_frun {
            self.state = CpmState::Run;
        }

        if status.data_status.is_data_valid() {
            self.consumer_buffer.copy_from_slice(payload);
            CpmOutcome::Accepted { first_valid: was_frun }
        } else if status.data_status.contains(DataStatus::PRIMARY_OR_BACKUP) {
            CpmOutcome::AcceptedNoSurface
        } else {
            CpmOutcome::Rejected
        }
    }

    /// Called once per control-interval tick when no frame arrived.
    pub fn on_control_interval_elapsed(&mut self) -> CpmOutcome {
        if self.state != CpmState::Run {
            return CpmOutcome::AcceptedNoSurface;
        }
        self.missed_ticks += 1;
        if self.missed_ticks >= self.data_hold_factor {
            return CpmOutcome::DhtExpired(ArError::DHT_EXPIRED);
        }
        CpmOutcome::AcceptedNoSurface
    }

    /// CPM was told to stop (e.g. on Release) while CMDEV still reports
    /// STARTUP (i.e. CPM never reached RUN); §11's preserved asymmetry.
    pub fn on_stop_during_startup(&self) -> Option<ArError> {
        if self.state == CpmState::Run {
            return None;
        }
        match self.startup_mode {
            StartupMode::Legacy => Some(ArError::new(crate::error::ErrorClass::Cpm, crate::error::ErrorCode::InvalidState)),
            StartupMode::Advanced => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataStatus;

    fn make_cpm(data_hold_factor: u16, mode: StartupMode) -> Cpm {
        let mut cpm = Cpm::new(MacAddress::new([1; 6]), 10, 1_000, data_hold_factor, mode);
        cpm.activate();
        cpm
    }

    fn valid_status(counter: u16) -> ApduStatus {
        ApduStatus { cycle_counter: counter, data_status: DataStatus::PROVIDER_RUN | DataStatus::DATA_VALID | DataStatus::PRIMARY_OR_BACKUP, transfer_status: 0 }
    }

    #[test]
    fn s4_cpm_dht_abort_after_three_missed_ticks() {
        let mut cpm = make_cpm(3, StartupMode::Advanced);
        let outcome = cpm.on_frame_received(MacAddress::new([1; 6]), &[0u8; 10], valid_status(1));
        assert_eq!(outcome, CpmOutcome::Accepted { first_valid: true });
        assert_eq!(cpm.state, CpmState::Run);

        assert_eq!(cpm.on_control_interval_elapsed(), CpmOutcome::AcceptedNoSurface);
        assert_eq!(cpm.on_control_interval_elapsed(), CpmOutcome::AcceptedNoSurface);
        match cpm.on_control_interval_elapsed() {
            CpmOutcome::DhtExpired(err) => assert_eq!(err, ArError::DHT_EXPIRED),
            other => panic!("expected DhtExpired, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_source_mac() {
        let mut cpm = make_cpm(3, StartupMode::Advanced);
        let outcome = cpm.on_frame_received(MacAddress::new([9; 6]), &[0u8; 10], valid_status(1));
        assert_eq!(outcome, CpmOutcome::Rejected);
    }

    #[test]
    fn accepted_frame_publishes_consumer_buffer() {
        let mut cpm = make_cpm(3, StartupMode::Advanced);
        cpm.on_frame_received(MacAddress::new([1; 6]), &[7u8; 10], valid_status(1));
        assert_eq!(cpm.consumer_data(), &[7u8; 10]);
    }

    #[test]
    fn legacy_startup_mode_aborts_on_stop_before_run() {
        let cpm = make_cpm(3, StartupMode::Legacy);
        assert!(cpm.on_stop_during_startup().is_some());
    }

    #[test]
    fn advanced_startup_mode_ignores_stop_before_run() {
        let cpm = make_cpm(3, StartupMode::Advanced);
        assert!(cpm.on_stop_during_startup().is_none());
    }
}
