//! Diagnosis pool (§4.15): a process-wide bounded pool of diagnosis items,
//! chained per subslot by index. Grounded on the teacher's `od::mod`
//! free/used-bookkeeping style (a `BTreeMap`-backed store with explicit
//! add/update/remove and alarm side effects).

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::hal::PnetError;
use crate::types::{SlotNumber, SubslotNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fault,
    Warning,
}

/// Either a standard channel-diagnosis triple, or an opaque USI payload
/// (§4.15, §10's `use_qualified_diagnosis` toggle selects the encoding used
/// on the wire; both are represented uniformly here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagContent {
    Standard { channel_number: u16, channel_error_type: u16, extended_error_type: u16, extended_value: u32 },
    Usi { usi: u16, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagItem {
    pub slot: SlotNumber,
    pub subslot: SubslotNumber,
    pub severity: Severity,
    pub content: DiagContent,
}

/// A stable index into the diagnosis pool, analogous to AREP for ARs.
pub type DiagHandle = u32;

#[derive(Default)]
pub struct DiagnosisPool {
    items: BTreeMap<DiagHandle, DiagItem>,
    next_handle: DiagHandle,
    capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagEvent {
    Added(DiagHandle),
    Updated(DiagHandle),
    /// "Diagnosis disappears" alarm (§4.15).
    Removed(DiagHandle),
}

impl DiagnosisPool {
    pub fn new(capacity: usize) -> Self {
        DiagnosisPool { items: BTreeMap::new(), next_handle: 0, capacity }
    }

    fn find_matching(&self, slot: SlotNumber, subslot: SubslotNumber, content: &DiagContent) -> Option<DiagHandle> {
        self.items.iter().find_map(|(handle, item)| {
            if item.slot != slot || item.subslot != subslot {
                return None;
            }
            let matches = match (&item.content, content) {
                (
                    DiagContent::Standard { channel_error_type: a, extended_error_type: b, .. },
                    DiagContent::Standard { channel_error_type: c, extended_error_type: d, .. },
                ) => a == c && b == d,
                (DiagContent::Usi { usi: a, .. }, DiagContent::Usi { usi: b, .. }) => a == b,
                _ => false,
            };
            matches.then_some(*handle)
        })
    }

    /// Idempotent (§8 property 7): adding the same item twice coalesces
    /// into an update rather than a duplicate entry.
    pub fn add(&mut self, slot: SlotNumber, subslot: SubslotNumber, severity: Severity, content: DiagContent) -> Result<DiagEvent, PnetError> {
        if let Some(handle) = self.find_matching(slot, subslot, &content) {
            self.items.insert(handle, DiagItem { slot, subslot, severity, content });
            return Ok(DiagEvent::Updated(handle));
        }
        if self.items.len() >= self.capacity {
            return Err(PnetError::InternalError("diagnosis pool exhausted"));
        }
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.items.insert(handle, DiagItem { slot, subslot, severity, content });
        Ok(DiagEvent::Added(handle))
    }

    pub fn update(&mut self, slot: SlotNumber, subslot: SubslotNumber, severity: Severity, content: DiagContent) -> Result<DiagEvent, PnetError> {
        match self.find_matching(slot, subslot, &content) {
            Some(handle) => {
                self.items.insert(handle, DiagItem { slot, subslot, severity, content });
                Ok(DiagEvent::Updated(handle))
            }
            None => Err(PnetError::RecordNotFound(0)),
        }
    }

    pub fn remove(&mut self, handle: DiagHandle) -> Option<DiagEvent> {
        self.items.remove(&handle).map(|_| DiagEvent::Removed(handle))
    }

    pub fn items_for_subslot(&self, slot: SlotNumber, subslot: SubslotNumber) -> impl Iterator<Item = &DiagItem> {
        self.items.values().filter(move |item| item.slot == slot && item.subslot == subslot)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn std_content() -> DiagContent {
        DiagContent::Standard { channel_number: 1, channel_error_type: 0x0010, extended_error_type: 0, extended_value: 0 }
    }

    #[test]
    fn s7_add_is_idempotent() {
        let mut pool = DiagnosisPool::new(8);
        let first = pool.add(1, 1, Severity::Fault, std_content()).unwrap();
        assert!(matches!(first, DiagEvent::Added(_)));
        let second = pool.add(1, 1, Severity::Fault, std_content()).unwrap();
        assert!(matches!(second, DiagEvent::Updated(_)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn add_then_update_indistinguishable_from_add_then_add() {
        let mut pool_a = DiagnosisPool::new(8);
        pool_a.add(1, 1, Severity::Fault, std_content()).unwrap();
        pool_a.add(1, 1, Severity::Fault, std_content()).unwrap();

        let mut pool_b = DiagnosisPool::new(8);
        pool_b.add(1, 1, Severity::Fault, std_content()).unwrap();
        pool_b.update(1, 1, Severity::Fault, std_content()).unwrap();

        assert_eq!(pool_a.len(), pool_b.len());
    }

    #[test]
    fn remove_returns_item_to_pool() {
        let mut pool = DiagnosisPool::new(1);
        let handle = match pool.add(1, 1, Severity::Fault, std_content()).unwrap() {
            DiagEvent::Added(h) => h,
            _ => unreachable!(),
        };
        pool.remove(handle);
        assert!(pool.is_empty());
        pool.add(2, 1, Severity::Warning, std_content()).unwrap();
    }
}
