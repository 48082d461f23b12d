//! FSPM-adjacent supplemented features (§10): I&M1..I&M4 as four distinct,
//! independently-writable record blobs, plus the AR logbook — a bounded
//! ring buffer of past alarm/diagnosis entries readable via a dedicated
//! record index. Grounded on the teacher's `od`-module fixed-slot storage,
//! generalized from a single object dictionary to four fixed-width blobs
//! plus a ring buffer.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::diagnosis::DiagContent;
use crate::hal::PnetError;
use crate::types::{SlotNumber, SubslotNumber};

/// I&M1..I&M4 are fixed-width per the PROFINET profile: 54, 54, 54 and 59
/// bytes respectively (the original's `pf_fspm` layout).
pub const IM_RECORD_LENGTHS: [usize; 4] = [54, 54, 54, 59];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImRecords {
    blobs: [Vec<u8>; 4],
}

impl ImRecords {
    pub fn new() -> Self {
        ImRecords { blobs: core::array::from_fn(|i| alloc::vec![0u8; IM_RECORD_LENGTHS[i]]) }
    }

    /// `which` is 1..=4.
    pub fn read(&self, which: u8) -> Result<&[u8], PnetError> {
        let index = (which as usize).checked_sub(1).filter(|i| *i < 4).ok_or(PnetError::RecordNotFound(which as u32))?;
        Ok(&self.blobs[index])
    }

    pub fn write(&mut self, which: u8, data: &[u8]) -> Result<(), PnetError> {
        let index = (which as usize).checked_sub(1).filter(|i| *i < 4).ok_or(PnetError::RecordNotFound(which as u32))?;
        if data.len() != IM_RECORD_LENGTHS[index] {
            return Err(PnetError::ValidationError("I&M record length mismatch"));
        }
        self.blobs[index].copy_from_slice(data);
        Ok(())
    }
}

/// One historical entry in the AR logbook (§10): a snapshot of a
/// diagnosis/alarm event that has since scrolled off the live pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogbookEntry {
    pub slot: SlotNumber,
    pub subslot: SubslotNumber,
    pub content: DiagContent,
}

/// Fixed-capacity ring buffer of past alarm/diagnosis entries (§10), the
/// original's `pf_fspm` "AR logbook".
pub struct Logbook {
    entries: VecDeque<LogbookEntry>,
    capacity: usize,
}

impl Logbook {
    pub fn new(capacity: usize) -> Self {
        Logbook { entries: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, entry: LogbookEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogbookEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::Severity;

    #[test]
    fn im_record_round_trips_at_correct_length() {
        let mut records = ImRecords::new();
        let data = alloc::vec![0xAB; IM_RECORD_LENGTHS[0]];
        records.write(1, &data).unwrap();
        assert_eq!(records.read(1).unwrap(), &data[..]);
    }

    #[test]
    fn im_record_wrong_length_is_rejected() {
        let mut records = ImRecords::new();
        assert!(records.write(2, &[1, 2, 3]).is_err());
    }

    #[test]
    fn im_record_out_of_range_is_not_found() {
        let records = ImRecords::new();
        assert_eq!(records.read(5).unwrap_err(), PnetError::RecordNotFound(5));
    }

    fn sample_entry(n: u16) -> LogbookEntry {
        let _ = Severity::Fault;
        LogbookEntry { slot: 1, subslot: 1, content: DiagContent::Standard { channel_number: n, channel_error_type: 0, extended_error_type: 0, extended_value: 0 } }
    }

    #[test]
    fn logbook_evicts_oldest_on_overflow() {
        let mut logbook = Logbook::new(2);
        logbook.push(sample_entry(1));
        logbook.push(sample_entry(2));
        logbook.push(sample_entry(3));
        let remaining: Vec<u16> = logbook
            .iter()
            .map(|e| match &e.content {
                DiagContent::Standard { channel_number, .. } => *channel_number,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(remaining, alloc::vec![2, 3]);
    }
}
