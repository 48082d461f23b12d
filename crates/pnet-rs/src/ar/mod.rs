//! Application Relation: the central session entity (§3). An AR embeds one
//! instance of each sister state machine (CMDEV, CMSM, CMSU, CMPBE, CMIO)
//! plus its IOCRs, alarm channels and scheduler handles, cross-referenced
//! by stable indices rather than owning pointers (§9 design note).

pub mod iocr;

use alloc::vec::Vec;

use crate::alpm::AlpmChannel;
use crate::apm::ApmRetransmit;
use crate::cmdev::CmDevStateMachine;
use crate::cmio::CmIo;
use crate::cmpbe::CmPbe;
use crate::cmsm::CmSm;
use crate::cmsu::CmSu;
use crate::frame::MacAddress;
use crate::hal::PnetError;
use crate::scheduler::SchedulerHandle;
use crate::types::IpAddress;
use iocr::Iocr;

pub type Arep = u32;

/// Session key uniquely identifying an AR across reconnects (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArUuid(pub [u8; 16]);

/// AR type whitelist accepted by CMRPC Connect (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArType {
    IoCar,
    IoSar,
    IoSupervisor,
}

/// `ar_properties` bitfield (§3), notably the startup-mode flag that drives
/// the CPM-stop-in-STARTUP asymmetry (spec's Open Question, preserved as-is
/// per `SPEC_FULL.md` §11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArProperties {
    pub startup_mode: StartupMode,
    pub device_access: bool,
}

/// §11 Open Question, resolved: the asymmetry is preserved as specified —
/// in `Legacy` startup mode, a CPM stop while still in CMDEV's STARTUP
/// phase raises an AR ABORT (see `Cpm::on_stop_during_startup`); `Advanced`
/// mode does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    Legacy,
    Advanced,
}

/// A live Application Relation (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ar {
    pub uuid: ArUuid,
    pub session_number: u16,
    pub peer_mac: MacAddress,
    pub peer_ip: IpAddress,
    pub ar_type: ArType,
    pub properties: ArProperties,
    pub cmi_activity_timeout_factor: u32,

    pub iocrs: Vec<Iocr>,

    pub cmdev: CmDevStateMachine,
    pub cmsm: CmSm,
    pub cmsu: CmSu,
    pub cmpbe: CmPbe,
    pub cmio: CmIo,
    pub alpm_low: AlpmChannel,
    pub alpm_high: AlpmChannel,
    pub apm: ApmRetransmit,

    /// Scheduler handles owned by this AR; all are remove-if-running on
    /// teardown so none outlives the AR (§5 cancellation guarantee).
    pub scheduler_handles: Vec<SchedulerHandle>,
}

impl Ar {
    pub fn new(uuid: ArUuid, session_number: u16, peer_mac: MacAddress, peer_ip: IpAddress, ar_type: ArType, properties: ArProperties, cmi_activity_timeout_factor: u32) -> Self {
        let consumer_count = 0;
        Ar {
            uuid,
            session_number,
            peer_mac,
            peer_ip,
            ar_type,
            properties,
            cmi_activity_timeout_factor,
            iocrs: Vec::new(),
            cmdev: CmDevStateMachine::new(),
            cmsm: CmSm::new(cmi_activity_timeout_factor),
            cmsu: CmSu::new(),
            cmpbe: CmPbe::new(),
            cmio: CmIo::new(consumer_count),
            alpm_low: AlpmChannel::new(),
            alpm_high: AlpmChannel::new(),
            apm: ApmRetransmit::new(),
            scheduler_handles: Vec::new(),
        }
    }

    /// §3 invariant: an OUTPUT IOCR owns exactly one CPM (it is the
    /// consumer of data produced by the controller); recompute CMIO's
    /// expected-consumer count from the current IOCR list.
    pub fn recompute_cmio_expectations(&mut self) {
        let consumer_count = self.iocrs.iter().filter(|i| i.direction == crate::types::IocrDirection::Output).count() as u16;
        self.cmio = CmIo::new(consumer_count);
    }
}

/// Fixed-capacity slab of ARs (§3 invariant: at most `PNET_MAX_AR` ARs
/// exist; AREP is stable for the AR's lifetime and reused only after
/// teardown).
pub struct ArSlab {
    slots: Vec<Option<Ar>>,
}

impl ArSlab {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        ArSlab { slots }
    }

    /// Allocates a free slot and returns its AREP (index + 1, so 0 is a
    /// sentinel; §3).
    pub fn insert(&mut self, ar: Ar) -> Result<Arep, PnetError> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(ar);
                return Ok((i + 1) as Arep);
            }
        }
        Err(PnetError::ArTableFull)
    }

    pub fn get(&self, arep: Arep) -> Option<&Ar> {
        arep.checked_sub(1).and_then(|i| self.slots.get(i as usize)).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, arep: Arep) -> Option<&mut Ar> {
        arep.checked_sub(1).and_then(|i| self.slots.get_mut(i as usize)).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, arep: Arep) -> Option<Ar> {
        let index = arep.checked_sub(1)? as usize;
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ar() -> Ar {
        Ar::new(
            ArUuid([0; 16]),
            1,
            MacAddress::new([1; 6]),
            IpAddress::new(192, 168, 0, 10),
            ArType::IoCar,
            ArProperties { startup_mode: StartupMode::Advanced, device_access: false },
            30,
        )
    }

    #[test]
    fn arep_is_stable_until_removal() {
        let mut slab = ArSlab::new(2);
        let arep = slab.insert(sample_ar()).unwrap();
        assert!(slab.get(arep).is_some());
        slab.remove(arep);
        assert!(slab.get(arep).is_none());
    }

    #[test]
    fn full_table_rejects_insert() {
        let mut slab = ArSlab::new(1);
        slab.insert(sample_ar()).unwrap();
        assert_eq!(slab.insert(sample_ar()).unwrap_err(), PnetError::ArTableFull);
    }

    #[test]
    fn arep_is_reused_only_after_teardown() {
        let mut slab = ArSlab::new(1);
        let first = slab.insert(sample_ar()).unwrap();
        slab.remove(first);
        let second = slab.insert(sample_ar()).unwrap();
        assert_eq!(first, second);
    }
}
