//! CMDEV — the master AR session state machine (§4.10).
//!
//! Modeled the way the teacher models its DLL_CS/NMT state machines: an
//! exhaustive `match (state, event)` transition table on a tagged enum,
//! rather than the tangled cross-calls of the original switch-based source
//! (§9 design note).

use crate::error::ArError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmDevState {
    WCnnct,
    WCind,
    WArdy,
    WRin,
    WData,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmDevEvent {
    RpcConnect,
    CmSuStartOk,
    DControlPrmEnd,
    CControlCnfOk,
    CmIoDataPossible,
    RpcRelease,
    /// Generated by CPM DHT expiry, PPM send failure, APM retry exhaustion,
    /// CMSM watchdog, peer RPC Release, or application `ar_abort` — accepted
    /// from any state (§4.10).
    Abort(ArError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmDevAction {
    None,
    /// §4.10: notify CMIO, close CPM/PPM/ALPM per IOCR, clear subslot
    /// ownership, fire `state_ind(ABORT)`, and eventually reclaim the AR slot.
    RunAbortCleanup(ArError),
    NotifyStateInd(crate::hal::ArEvent),
}

/// The master AR state machine (§4.10 transition table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmDevStateMachine {
    pub state: CmDevState,
}

impl CmDevStateMachine {
    pub fn new() -> Self {
        CmDevStateMachine { state: CmDevState::WCnnct }
    }

    pub fn process_event(&mut self, event: CmDevEvent) -> CmDevAction {
        if let CmDevEvent::Abort(err) = event {
            self.state = CmDevState::WCnnct;
            return CmDevAction::RunAbortCleanup(err);
        }

        match (self.state, event) {
            (CmDevState::WCnnct, CmDevEvent::RpcConnect) => {
                self.state = CmDevState::WCind;
                CmDevAction::NotifyStateInd(crate::hal::ArEvent::Startup)
            }
            (CmDevState::WCind, CmDevEvent::CmSuStartOk) => {
                self.state = CmDevState::WArdy;
                CmDevAction::None
            }
            (CmDevState::WArdy, CmDevEvent::DControlPrmEnd) => {
                self.state = CmDevState::WRin;
                CmDevAction::NotifyStateInd(crate::hal::ArEvent::PrmEnd)
            }
            (CmDevState::WRin, CmDevEvent::CControlCnfOk) => {
                self.state = CmDevState::WData;
                CmDevAction::None
            }
            (CmDevState::WRin, CmDevEvent::CmIoDataPossible) => {
                // Both preconditions must be observed before DATA; staying
                // in WRin until CControl confirms is intentional.
                CmDevAction::None
            }
            (CmDevState::WData, CmDevEvent::CmIoDataPossible) => {
                self.state = CmDevState::Data;
                CmDevAction::NotifyStateInd(crate::hal::ArEvent::Data)
            }
            (CmDevState::Data, CmDevEvent::RpcRelease) => {
                self.state = CmDevState::WCnnct;
                CmDevAction::None
            }
            _ => CmDevAction::None,
        }
    }

    pub fn is_admissible(&self, event: CmDevEvent) -> bool {
        matches!(
            (self.state, event),
            (CmDevState::WCnnct, CmDevEvent::RpcConnect)
                | (CmDevState::WCind, CmDevEvent::CmSuStartOk)
                | (CmDevState::WArdy, CmDevEvent::DControlPrmEnd)
                | (CmDevState::WRin, CmDevEvent::CControlCnfOk)
                | (CmDevState::WRin, CmDevEvent::CmIoDataPossible)
                | (CmDevState::WData, CmDevEvent::CmIoDataPossible)
                | (CmDevState::Data, CmDevEvent::RpcRelease)
        ) || matches!(event, CmDevEvent::Abort(_))
    }
}

impl Default for CmDevStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, ErrorCode};

    #[test]
    fn s6_connect_to_data_happy_path() {
        let mut sm = CmDevStateMachine::new();
        assert_eq!(sm.process_event(CmDevEvent::RpcConnect), CmDevAction::NotifyStateInd(crate::hal::ArEvent::Startup));
        assert_eq!(sm.state, CmDevState::WCind);

        sm.process_event(CmDevEvent::CmSuStartOk);
        assert_eq!(sm.state, CmDevState::WArdy);

        assert_eq!(sm.process_event(CmDevEvent::DControlPrmEnd), CmDevAction::NotifyStateInd(crate::hal::ArEvent::PrmEnd));
        assert_eq!(sm.state, CmDevState::WRin);

        sm.process_event(CmDevEvent::CControlCnfOk);
        assert_eq!(sm.state, CmDevState::WData);

        assert_eq!(sm.process_event(CmDevEvent::CmIoDataPossible), CmDevAction::NotifyStateInd(crate::hal::ArEvent::Data));
        assert_eq!(sm.state, CmDevState::Data);
    }

    #[test]
    fn abort_accepted_from_any_state() {
        let mut sm = CmDevStateMachine::new();
        sm.state = CmDevState::WRin;
        let err = ArError::new(ErrorClass::RtaProtocol, ErrorCode::AbortArCmiTimeout);
        let action = sm.process_event(CmDevEvent::Abort(err));
        assert_eq!(action, CmDevAction::RunAbortCleanup(err));
        assert_eq!(sm.state, CmDevState::WCnnct);
    }

    #[test]
    fn release_only_accepted_in_data() {
        let mut sm = CmDevStateMachine::new();
        sm.state = CmDevState::WArdy;
        assert_eq!(sm.process_event(CmDevEvent::RpcRelease), CmDevAction::None);
        assert_eq!(sm.state, CmDevState::WArdy);
    }
}
