//! CMINA — Name/IP assignment state machine (§4.7). States SETUP →
//! SET_NAME → SET_IP → W_CONNECT, driven by boot-time nonvolatile load and
//! DCP Set requests. Modeled the way the teacher drives its boot-time
//! configuration load in `node::mod`, as an explicit state machine rather
//! than a pile of booleans.

use alloc::string::String;

use crate::error::{ArError, ErrorClass, ErrorCode};
use crate::frame::dcp::{is_ipaddress_valid, validate_station_name};
use crate::hal::ResetMode;
use crate::types::IpAddress;

pub const DEFAULT_HELLO_COUNT: u8 = 3;
pub const HELLO_INTERVAL_US: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CminaState {
    Setup,
    SetName,
    SetIp,
    WConnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CminaConfig {
    pub station_name: String,
    pub ip: IpAddress,
    pub mask: IpAddress,
    pub gateway: IpAddress,
}

impl CminaConfig {
    fn has_name(&self) -> bool {
        !self.station_name.is_empty()
    }

    fn has_ip(&self) -> bool {
        !self.ip.is_unspecified()
    }
}

/// Outcome of a DCP Set request, telling the caller (CMRPC/DCP layer)
/// whether it must abort every live AR (§4.7, §8-S5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CminaOutcome {
    Accepted { hellos_pending: u8 },
    AcceptedAbortAllArs { err: ArError, hellos_pending: u8 },
    Rejected,
    /// A reset-to-factory Set; the caller must tear down all ARs and invoke
    /// `DeviceCallbacks::reset_cb` with the carried scope.
    ResetToFactory(ResetMode),
}

pub struct Cmina {
    pub state: CminaState,
    pub config: CminaConfig,
    pub hellos_remaining: u8,
}

impl Cmina {
    /// Boot-time load (§4.7): advances directly to W_CONNECT if both name
    /// and IP are already present in nonvolatile storage.
    pub fn boot(config: CminaConfig) -> Self {
        let state = if !config.has_name() {
            CminaState::SetName
        } else if !config.has_ip() {
            CminaState::SetIp
        } else {
            CminaState::WConnect
        };
        let hellos_remaining = if state == CminaState::WConnect { DEFAULT_HELLO_COUNT } else { 0 };
        Cmina { state, config, hellos_remaining }
    }

    pub fn set_station_name(&mut self, name: &str) -> CminaOutcome {
        if !validate_station_name(name) {
            return CminaOutcome::Rejected;
        }
        self.config.station_name = String::from(name);
        if self.state == CminaState::SetName {
            self.state = if self.config.has_ip() { CminaState::WConnect } else { CminaState::SetIp };
        }
        CminaOutcome::AcceptedAbortAllArs {
            err: ArError::new(ErrorClass::RtaProtocol, ErrorCode::DcpStationNameChanged),
            hellos_pending: if self.state == CminaState::WConnect { DEFAULT_HELLO_COUNT } else { 0 },
        }
    }

    /// §4.7, §8-S5: a Set that changes the IP while any AR exists aborts
    /// them. The caller passes `had_live_ars` to decide which branch fires.
    pub fn set_ip(&mut self, ip: IpAddress, mask: IpAddress, gateway: IpAddress, had_live_ars: bool) -> CminaOutcome {
        if !is_ipaddress_valid(mask, ip) {
            return CminaOutcome::Rejected;
        }
        let changed = self.config.ip != ip;
        self.config.ip = ip;
        self.config.mask = mask;
        self.config.gateway = gateway;
        if self.state == CminaState::SetIp && self.config.has_name() {
            self.state = CminaState::WConnect;
        }
        let hellos_pending = if self.state == CminaState::WConnect { DEFAULT_HELLO_COUNT } else { 0 };
        if changed && had_live_ars {
            CminaOutcome::AcceptedAbortAllArs { err: ArError::new(ErrorClass::CtlDiNa, ErrorCode::MultipleUsersOfIp), hellos_pending }
        } else {
            CminaOutcome::Accepted { hellos_pending }
        }
    }

    /// §4.7: tears down all ARs and invokes the application reset callback
    /// with the requested scope.
    pub fn reset_to_factory(&mut self, mode: ResetMode) -> CminaOutcome {
        match mode {
            ResetMode::CommunicationOnly | ResetMode::Both => {
                self.config = CminaConfig { station_name: String::new(), ip: IpAddress::UNSPECIFIED, mask: IpAddress::UNSPECIFIED, gateway: IpAddress::UNSPECIFIED };
                self.state = CminaState::SetName;
            }
            ResetMode::ApplicationOnly => {}
        }
        CminaOutcome::ResetToFactory(mode)
    }

    pub fn take_pending_hello(&mut self) -> bool {
        if self.hellos_remaining > 0 {
            self.hellos_remaining -= 1;
            true
        } else {
            false
        }
    }

    pub fn accepts_connect(&self) -> bool {
        self.state == CminaState::WConnect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unset_config() -> CminaConfig {
        CminaConfig { station_name: String::new(), ip: IpAddress::UNSPECIFIED, mask: IpAddress::UNSPECIFIED, gateway: IpAddress::UNSPECIFIED }
    }

    #[test]
    fn boot_with_nothing_set_starts_in_set_name() {
        let cmina = Cmina::boot(unset_config());
        assert_eq!(cmina.state, CminaState::SetName);
    }

    #[test]
    fn boot_with_name_and_ip_reaches_w_connect_with_hellos_queued() {
        let config = CminaConfig { station_name: String::from("device-1"), ip: IpAddress::new(192, 168, 0, 10), mask: IpAddress::new(255, 255, 255, 0), gateway: IpAddress::UNSPECIFIED };
        let cmina = Cmina::boot(config);
        assert_eq!(cmina.state, CminaState::WConnect);
        assert_eq!(cmina.hellos_remaining, DEFAULT_HELLO_COUNT);
    }

    #[test]
    fn naming_then_addressing_reaches_w_connect() {
        let mut cmina = Cmina::boot(unset_config());
        cmina.set_station_name("device-1");
        assert_eq!(cmina.state, CminaState::SetIp);
        let outcome = cmina.set_ip(IpAddress::new(192, 168, 0, 10), IpAddress::new(255, 255, 255, 0), IpAddress::UNSPECIFIED, false);
        assert_eq!(cmina.state, CminaState::WConnect);
        assert!(matches!(outcome, CminaOutcome::Accepted { .. }));
    }

    #[test]
    fn s5_set_ip_with_live_ars_aborts_them() {
        let config = CminaConfig { station_name: String::from("device-1"), ip: IpAddress::new(192, 168, 0, 10), mask: IpAddress::new(255, 255, 255, 0), gateway: IpAddress::UNSPECIFIED };
        let mut cmina = Cmina::boot(config);
        let outcome = cmina.set_ip(IpAddress::new(192, 168, 0, 20), IpAddress::new(255, 255, 255, 0), IpAddress::UNSPECIFIED, true);
        match outcome {
            CminaOutcome::AcceptedAbortAllArs { err, .. } => assert_eq!(err.class, ErrorClass::CtlDiNa),
            other => panic!("expected abort-all, got {other:?}"),
        }
        assert_eq!(cmina.config.ip, IpAddress::new(192, 168, 0, 20));
    }

    #[test]
    fn reset_to_factory_communication_only_clears_name_and_ip() {
        let config = CminaConfig { station_name: String::from("device-1"), ip: IpAddress::new(192, 168, 0, 10), mask: IpAddress::new(255, 255, 255, 0), gateway: IpAddress::UNSPECIFIED };
        let mut cmina = Cmina::boot(config);
        cmina.reset_to_factory(ResetMode::CommunicationOnly);
        assert_eq!(cmina.state, CminaState::SetName);
        assert!(!cmina.config.has_name());
    }

    #[test]
    fn invalid_ip_is_rejected() {
        let mut cmina = Cmina::boot(unset_config());
        let outcome = cmina.set_ip(IpAddress::new(127, 0, 0, 1), IpAddress::new(255, 255, 255, 0), IpAddress::UNSPECIFIED, false);
        assert_eq!(outcome, CminaOutcome::Rejected);
    }
}
