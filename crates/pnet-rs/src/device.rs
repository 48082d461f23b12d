//! Device tree (§3): a process-wide device object holding a fixed-size
//! array of APIs, each holding a fixed-size array of slots (slot 0 is the
//! DAP), each holding a fixed-size array of subslots.

use alloc::vec::Vec;

use crate::ar::Arep;
use crate::diagnosis::DiagHandle;
use crate::hal::PnetError;
use crate::types::{ApiNumber, DataDirection, SlotNumber, SubslotNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleIdent(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmoduleIdent(pub u32);

/// One subslot's live state (§3): plugged submodule identity, data
/// direction, expected sizes, owning AR (weak back-reference by AREP),
/// last statuses and the head of its diagnosis chain.
#[derive(Debug, Clone, Default)]
pub struct Subslot {
    pub plugged: Option<SubmoduleIdent>,
    pub data_direction: DataDirection,
    pub expected_input_size: u16,
    pub expected_output_size: u16,
    pub owning_ar: Option<Arep>,
    pub last_provider_status: u8,
    pub last_consumer_status: u8,
    pub diag_head: Option<DiagHandle>,
}

impl Subslot {
    /// §3 invariant: a subslot may be owned by at most one AR at a time; a
    /// new owner displaces the previous one, whose AR the caller must abort.
    pub fn claim(&mut self, arep: Arep) -> Option<Arep> {
        let previous = self.owning_ar.replace(arep);
        previous.filter(|&p| p != arep)
    }

    pub fn release(&mut self) {
        self.owning_ar = None;
        self.last_provider_status = 0;
        self.last_consumer_status = 0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub plugged: Option<ModuleIdent>,
    pub subslots: Vec<(SubslotNumber, Subslot)>,
}

impl Slot {
    pub fn subslot(&self, subslot: SubslotNumber) -> Option<&Subslot> {
        self.subslots.iter().find(|(n, _)| *n == subslot).map(|(_, s)| s)
    }

    pub fn subslot_mut(&mut self, subslot: SubslotNumber) -> Option<&mut Subslot> {
        self.subslots.iter_mut().find(|(n, _)| *n == subslot).map(|(_, s)| s)
    }

    pub fn plug_subslot(&mut self, subslot: SubslotNumber) -> &mut Subslot {
        if self.subslot(subslot).is_none() {
            self.subslots.push((subslot, Subslot::default()));
        }
        self.subslot_mut(subslot).expect("just inserted")
    }
}

#[derive(Debug, Clone, Default)]
pub struct Api {
    pub slots: Vec<(SlotNumber, Slot)>,
}

impl Api {
    pub fn slot(&self, slot: SlotNumber) -> Option<&Slot> {
        self.slots.iter().find(|(n, _)| *n == slot).map(|(_, s)| s)
    }

    pub fn slot_mut(&mut self, slot: SlotNumber) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|(n, _)| *n == slot).map(|(_, s)| s)
    }
}

/// Slot 0, always present: the Device Access Point representing the device
/// and its Ethernet ports as subslots (§3).
pub const DAP_SLOT: SlotNumber = 0;

/// The process-wide device object (§3).
#[derive(Debug, Clone, Default)]
pub struct Device {
    apis: Vec<(ApiNumber, Api)>,
}

impl Device {
    /// A fresh device starts with the DAP pre-plugged in API 0 (§3 Lifecycle).
    pub fn new() -> Self {
        let mut device = Device { apis: Vec::new() };
        let api = device.api_mut(0);
        api.slots.push((DAP_SLOT, Slot { plugged: Some(ModuleIdent(0)), subslots: Vec::new() }));
        device
    }

    pub fn api(&self, api: ApiNumber) -> Option<&Api> {
        self.apis.iter().find(|(n, _)| *n == api).map(|(_, a)| a)
    }

    pub fn api_mut(&mut self, api: ApiNumber) -> &mut Api {
        if self.api(api).is_none() {
            self.apis.push((api, Api::default()));
        }
        self.apis.iter_mut().find(|(n, _)| *n == api).map(|(_, a)| a).expect("just inserted")
    }

    pub fn plug_module(&mut self, api: ApiNumber, slot: SlotNumber, ident: ModuleIdent) {
        let api = self.api_mut(api);
        if api.slot(slot).is_none() {
            api.slots.push((slot, Slot::default()));
        }
        api.slot_mut(slot).expect("just inserted").plugged = Some(ident);
    }

    pub fn pull_module(&mut self, api: ApiNumber, slot: SlotNumber) {
        if let Some(api) = self.api_mut(api).slot_mut(slot) {
            api.plugged = None;
            api.subslots.clear();
        }
    }

    pub fn plug_submodule(
        &mut self,
        api: ApiNumber,
        slot: SlotNumber,
        subslot: SubslotNumber,
        ident: SubmoduleIdent,
        direction: DataDirection,
        expected_input_size: u16,
        expected_output_size: u16,
    ) -> Result<(), PnetError> {
        let slot_entry = self.api_mut(api).slot_mut(slot).ok_or(PnetError::InternalError("module not plugged"))?;
        let sub = slot_entry.plug_subslot(subslot);
        sub.plugged = Some(ident);
        sub.data_direction = direction;
        sub.expected_input_size = expected_input_size;
        sub.expected_output_size = expected_output_size;
        Ok(())
    }

    pub fn pull_submodule(&mut self, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber) {
        if let Some(sub) = self.api_mut(api).slot_mut(slot).and_then(|s| s.subslot_mut(subslot)) {
            sub.plugged = None;
            sub.release();
        }
    }

    /// §3 invariant: claiming an already-owned subslot returns the previous
    /// owner, which the caller (CMRPC Connect) must abort.
    pub fn claim_subslot(&mut self, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, arep: Arep) -> Option<Arep> {
        self.api_mut(api).slot_mut(slot).and_then(|s| s.subslot_mut(subslot)).and_then(|sub| sub.claim(arep))
    }

    pub fn release_ar_subslots(&mut self, arep: Arep) {
        for (_, api) in self.apis.iter_mut() {
            for (_, slot) in api.slots.iter_mut() {
                for (_, sub) in slot.subslots.iter_mut() {
                    if sub.owning_ar == Some(arep) {
                        sub.release();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_device_has_dap_preplugged() {
        let device = Device::new();
        assert!(device.api(0).unwrap().slot(DAP_SLOT).unwrap().plugged.is_some());
    }

    #[test]
    fn claiming_owned_subslot_returns_previous_owner() {
        let mut device = Device::new();
        device.plug_module(0, 1, ModuleIdent(1));
        device.plug_submodule(0, 1, 1, SubmoduleIdent(1), DataDirection::Input, 4, 0).unwrap();
        assert_eq!(device.claim_subslot(0, 1, 1, 10), None);
        assert_eq!(device.claim_subslot(0, 1, 1, 20), Some(10));
    }

    #[test]
    fn release_ar_subslots_clears_ownership_not_plugging() {
        let mut device = Device::new();
        device.plug_module(0, 1, ModuleIdent(1));
        device.plug_submodule(0, 1, 1, SubmoduleIdent(1), DataDirection::Output, 0, 4).unwrap();
        device.claim_subslot(0, 1, 1, 10);
        device.release_ar_subslots(10);
        let sub = device.api(0).unwrap().slot(1).unwrap().subslot(1).unwrap();
        assert!(sub.owning_ar.is_none());
        assert!(sub.plugged.is_some());
    }
}
