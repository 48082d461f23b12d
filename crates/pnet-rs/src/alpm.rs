//! ALPM — Alarm Protocol Machine (§4.5): per-AR low/high priority channels,
//! each with a bounded send/receive queue, fragmenting and sequencing
//! outbound notifications and reassembling inbound ones.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::frame::AlarmPayload;
use crate::hal::PnetError;

/// Bound on each channel's send/receive queue (§4.5 "bounded").
pub const ALARM_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAlarm {
    pub sequence_number: u16,
    pub api: u32,
    pub slot: u16,
    pub subslot: u16,
    pub payload: AlarmPayload,
    pub acked: bool,
}

/// One alarm channel (either the low- or high-priority instance an AR owns).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlpmChannel {
    send_queue: VecDeque<PendingAlarm>,
    receive_queue: VecDeque<PendingAlarm>,
    next_sequence_number: u16,
    last_acked_peer_sequence: Option<u16>,
}

impl AlpmChannel {
    pub fn new() -> Self {
        AlpmChannel::default()
    }

    /// ALPMI (sender side): append to the send queue; rejects once the
    /// bounded queue is full (§4.5).
    pub fn enqueue_send(&mut self, api: u32, slot: u16, subslot: u16, payload: AlarmPayload) -> Result<u16, PnetError> {
        if self.send_queue.len() >= ALARM_QUEUE_CAPACITY {
            return Err(PnetError::InternalError("ALPM send queue overflow"));
        }
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
        self.send_queue.push_back(PendingAlarm { sequence_number, api, slot, subslot, payload, acked: false });
        Ok(sequence_number)
    }

    /// Dequeues the next unsent alarm for transmission (§4.5: one at a time).
    pub fn next_to_send(&self) -> Option<&PendingAlarm> {
        self.send_queue.front()
    }

    /// The peer AlarmAck with a matching sequence number arrived; removes
    /// the alarm from the send queue.
    pub fn ack_received(&mut self, sequence_number: u16) -> bool {
        if let Some(front) = self.send_queue.front() {
            if front.sequence_number == sequence_number {
                self.send_queue.pop_front();
                return true;
            }
        }
        false
    }

    /// ALPMR (receiver side): an inbound notification arrived. Duplicate
    /// sequence numbers already acked are silently re-acked without
    /// re-delivery (§4.5).
    pub fn receive_notification(&mut self, alarm: PendingAlarm) -> ReceiveOutcome {
        if self.last_acked_peer_sequence == Some(alarm.sequence_number) {
            return ReceiveOutcome::DuplicateReAck;
        }
        self.last_acked_peer_sequence = Some(alarm.sequence_number);
        if self.receive_queue.len() >= ALARM_QUEUE_CAPACITY {
            self.receive_queue.pop_front();
        }
        self.receive_queue.push_back(alarm);
        ReceiveOutcome::Delivered
    }

    pub fn pop_received(&mut self) -> Option<PendingAlarm> {
        self.receive_queue.pop_front()
    }

    pub fn send_queue_len(&self) -> usize {
        self.send_queue.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Delivered,
    DuplicateReAck,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> AlarmPayload {
        AlarmPayload::DiagnosisSummary { usi: 0x0001, data: Vec::new() }
    }

    #[test]
    fn ack_removes_matching_front_entry() {
        let mut channel = AlpmChannel::new();
        let seq = channel.enqueue_send(0, 1, 1, sample_payload()).unwrap();
        assert_eq!(channel.send_queue_len(), 1);
        assert!(channel.ack_received(seq));
        assert_eq!(channel.send_queue_len(), 0);
    }

    #[test]
    fn duplicate_sequence_number_is_silently_reacked() {
        let mut channel = AlpmChannel::new();
        let alarm = PendingAlarm { sequence_number: 5, api: 0, slot: 1, subslot: 1, payload: sample_payload(), acked: false };
        assert_eq!(channel.receive_notification(alarm.clone()), ReceiveOutcome::Delivered);
        assert_eq!(channel.receive_notification(alarm), ReceiveOutcome::DuplicateReAck);
        // Only one delivery reached the application queue.
        assert!(channel.pop_received().is_some());
        assert!(channel.pop_received().is_none());
    }
}
