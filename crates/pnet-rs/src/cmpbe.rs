//! CMPBE — Parameter Begin/End handshake (§4.9).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmPbeState {
    Idle,
    WfInd,
    WfRsp,
    WfPei,
    WfPer,
    WfReq,
    WfCnf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmPbeEvent {
    DControlPrmBegin,
    DControlPrmEnd,
    CControlApplRdySent,
    CControlCnfOk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmPbeAction {
    None,
    DisableAlarms,
    EnableAlarms,
    SendApplRdy,
    /// PRM_BEGIN arrived while WFCNF: deferred, one slot of storage (§4.9).
    DeferPrmBegin,
    /// PRM_BEGIN arrived while WFREQ: the current AR is aborted.
    AbortAr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmPbe {
    pub state: CmPbeState,
    deferred_prm_begin: bool,
}

impl CmPbe {
    pub fn new() -> Self {
        CmPbe { state: CmPbeState::Idle, deferred_prm_begin: false }
    }

    pub fn process_event(&mut self, event: CmPbeEvent) -> CmPbeAction {
        match (self.state, event) {
            (CmPbeState::Idle, CmPbeEvent::DControlPrmBegin) => {
                self.state = CmPbeState::WfRsp;
                CmPbeAction::DisableAlarms
            }
            (CmPbeState::WfRsp, _) => {
                self.state = CmPbeState::WfPei;
                CmPbeAction::None
            }
            (CmPbeState::WfPei, CmPbeEvent::DControlPrmEnd) => {
                self.state = CmPbeState::WfPer;
                CmPbeAction::None
            }
            (CmPbeState::WfPer, _) => {
                self.state = CmPbeState::WfReq;
                CmPbeAction::SendApplRdy
            }
            (CmPbeState::WfReq, CmPbeEvent::DControlPrmBegin) => {
                // §4.9: PRM_BEGIN while WFREQ aborts the current AR.
                CmPbeAction::AbortAr
            }
            (CmPbeState::WfReq, CmPbeEvent::CControlApplRdySent) => {
                self.state = CmPbeState::WfCnf;
                CmPbeAction::None
            }
            (CmPbeState::WfCnf, CmPbeEvent::DControlPrmBegin) => {
                // §4.9: deferred, one slot of storage.
                self.deferred_prm_begin = true;
                CmPbeAction::DeferPrmBegin
            }
            (CmPbeState::WfCnf, CmPbeEvent::CControlCnfOk) => {
                self.state = CmPbeState::WfInd;
                let had_deferred = self.deferred_prm_begin;
                self.deferred_prm_begin = false;
                if had_deferred {
                    self.state = CmPbeState::WfRsp;
                }
                CmPbeAction::EnableAlarms
            }
            _ => CmPbeAction::None,
        }
    }
}

impl Default for CmPbe {
    fn default() -> Self {
        Self::new()
    }
}
