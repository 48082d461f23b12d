//! CMRPC — acyclic RPC request/response framing (§4.8): a datagram-oriented
//! protocol over UDP with its own fragmentation, reassembling into a
//! per-session buffer before opnum dispatch. Grounded on the teacher's SDO
//! segmented-transfer reassembly (`frame::sdo` reassembly buffer), adapted
//! from a single in-order segment counter to PROFINET's
//! sequence/fragment/last-fragment/length header.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::hal::PnetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opnum {
    Connect,
    Release,
    Read,
    Write,
    DControl,
    CControl,
}

impl Opnum {
    pub fn from_u16(value: u16) -> Result<Self, PnetError> {
        match value {
            0x0000 => Ok(Opnum::Connect),
            0x0001 => Ok(Opnum::Release),
            0x0002 => Ok(Opnum::Read),
            0x0003 => Ok(Opnum::Write),
            0x0004 => Ok(Opnum::DControl),
            0x0005 => Ok(Opnum::CControl),
            other => Err(PnetError::InvalidOpnum(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Opnum::Connect => 0x0000,
            Opnum::Release => 0x0001,
            Opnum::Read => 0x0002,
            Opnum::Write => 0x0003,
            Opnum::DControl => 0x0004,
            Opnum::CControl => 0x0005,
        }
    }
}

pub const RPC_HEADER_SIZE: usize = 12;

/// The fixed portion of every CMRPC PDU (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub sequence_number: u16,
    pub fragment_number: u16,
    pub last_fragment: bool,
    pub total_length: u32,
    pub opnum: Opnum,
}

impl RpcHeader {
    pub fn parse(buffer: &[u8]) -> Result<(Self, &[u8]), PnetError> {
        if buffer.len() < RPC_HEADER_SIZE {
            return Err(PnetError::InvalidPdu);
        }
        let sequence_number = u16::from_be_bytes(buffer[0..2].try_into()?);
        let fragment_number = u16::from_be_bytes(buffer[2..4].try_into()?);
        let flags = u16::from_be_bytes(buffer[4..6].try_into()?);
        let total_length = u32::from_be_bytes(buffer[6..10].try_into()?);
        let opnum = Opnum::from_u16(u16::from_be_bytes(buffer[10..12].try_into()?))?;
        Ok((
            RpcHeader { sequence_number, fragment_number, last_fragment: flags & 0x0001 != 0, total_length, opnum },
            &buffer[RPC_HEADER_SIZE..],
        ))
    }

    pub fn write(&self, buffer: &mut [u8]) -> Result<usize, PnetError> {
        if buffer.len() < RPC_HEADER_SIZE {
            return Err(PnetError::BufferTooShort);
        }
        buffer[0..2].copy_from_slice(&self.sequence_number.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.fragment_number.to_be_bytes());
        buffer[4..6].copy_from_slice(&(self.last_fragment as u16).to_be_bytes());
        buffer[6..10].copy_from_slice(&self.total_length.to_be_bytes());
        buffer[10..12].copy_from_slice(&self.opnum.as_u16().to_be_bytes());
        Ok(RPC_HEADER_SIZE)
    }
}

/// A decoded, fully reassembled request ready for opnum dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub opnum: Opnum,
    pub sequence_number: u16,
    pub payload: Vec<u8>,
}

struct InProgress {
    sequence_number: u16,
    opnum: Opnum,
    expected_total: u32,
    next_fragment: u16,
    buffer: Vec<u8>,
}

/// One reassembly slot per live session, keyed by the caller (one per AR,
/// typically the AREP once the Connect request has allocated one; Connect
/// itself reassembles under AREP 0 since no AR exists yet).
#[derive(Default)]
pub struct CmRpcReassembler {
    sessions: BTreeMap<u32, InProgress>,
}

impl CmRpcReassembler {
    pub fn new() -> Self {
        CmRpcReassembler::default()
    }

    /// Feeds one fragment; returns `Ok(Some(request))` once the last
    /// fragment completes a PDU, `Ok(None)` while more fragments are
    /// expected, or `Err(FragmentMismatch)` on an out-of-order or
    /// length-inconsistent fragment (§4.8).
    pub fn feed(&mut self, session_key: u32, header: RpcHeader, fragment: &[u8]) -> Result<Option<RpcRequest>, PnetError> {
        let entry = self.sessions.entry(session_key).or_insert_with(|| InProgress {
            sequence_number: header.sequence_number,
            opnum: header.opnum,
            expected_total: header.total_length,
            next_fragment: 0,
            buffer: Vec::new(),
        });

        if header.fragment_number == 0 {
            *entry = InProgress {
                sequence_number: header.sequence_number,
                opnum: header.opnum,
                expected_total: header.total_length,
                next_fragment: 0,
                buffer: Vec::new(),
            };
        }

        if header.sequence_number != entry.sequence_number || header.fragment_number != entry.next_fragment {
            self.sessions.remove(&session_key);
            return Err(PnetError::FragmentMismatch);
        }

        entry.buffer.extend_from_slice(fragment);
        entry.next_fragment += 1;

        if header.last_fragment {
            if entry.buffer.len() as u32 != entry.expected_total {
                self.sessions.remove(&session_key);
                return Err(PnetError::FragmentMismatch);
            }
            let finished = self.sessions.remove(&session_key).expect("entry present");
            return Ok(Some(RpcRequest { opnum: finished.opnum, sequence_number: finished.sequence_number, payload: finished.buffer }));
        }

        Ok(None)
    }

    pub fn abandon(&mut self, session_key: u32) {
        self.sessions.remove(&session_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(seq: u16, frag: u16, last: bool, total: u32, opnum: Opnum) -> RpcHeader {
        RpcHeader { sequence_number: seq, fragment_number: frag, last_fragment: last, total_length: total, opnum }
    }

    #[test]
    fn header_round_trips() {
        let h = header(7, 2, true, 42, Opnum::Write);
        let mut buffer = [0u8; RPC_HEADER_SIZE];
        h.write(&mut buffer).unwrap();
        let (parsed, rest) = RpcHeader::parse(&buffer).unwrap();
        assert_eq!(parsed, h);
        assert!(rest.is_empty());
    }

    #[test]
    fn single_fragment_request_completes_immediately() {
        let mut reassembler = CmRpcReassembler::new();
        let h = header(1, 0, true, 3, Opnum::Connect);
        let request = reassembler.feed(0, h, &[1, 2, 3]).unwrap().unwrap();
        assert_eq!(request.payload, alloc::vec![1, 2, 3]);
    }

    #[test]
    fn multi_fragment_request_reassembles_in_order() {
        let mut reassembler = CmRpcReassembler::new();
        let h0 = header(1, 0, false, 4, Opnum::Write);
        assert!(reassembler.feed(5, h0, &[1, 2]).unwrap().is_none());
        let h1 = header(1, 1, true, 4, Opnum::Write);
        let request = reassembler.feed(5, h1, &[3, 4]).unwrap().unwrap();
        assert_eq!(request.payload, alloc::vec![1, 2, 3, 4]);
    }

    #[test]
    fn out_of_order_fragment_is_rejected() {
        let mut reassembler = CmRpcReassembler::new();
        let h0 = header(1, 0, false, 4, Opnum::Write);
        reassembler.feed(5, h0, &[1, 2]).unwrap();
        let h_skip = header(1, 2, true, 4, Opnum::Write);
        assert_eq!(reassembler.feed(5, h_skip, &[3, 4]).unwrap_err(), PnetError::FragmentMismatch);
    }

    #[test]
    fn length_mismatch_on_last_fragment_is_rejected() {
        let mut reassembler = CmRpcReassembler::new();
        let h = header(1, 0, true, 99, Opnum::Read);
        assert_eq!(reassembler.feed(9, h, &[1]).unwrap_err(), PnetError::FragmentMismatch);
    }
}
