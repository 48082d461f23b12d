//! Persistent PDPort data (§10 supplemented feature): per-port peer
//! station/port name, MAU type and a link-state cache, backing CMRDR's
//! port records and persisted one file per port (spec.md §6). Grounded on
//! the original's `pf_pdport.h` field layout, expressed in the teacher's
//! plain-struct-plus-HAL-persistence style.

use alloc::string::String;

use crate::hal::{PersistenceStorage, PnetError};

/// IEEE 802.3 MAU type codes the device can report (a representative
/// subset; unknown/unsupported media report `Unknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MauType {
    Unknown,
    Copper100BaseTxFullDuplex,
    Copper1000BaseTFullDuplex,
    Fiber100BaseFxFullDuplex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdPortData {
    pub port_number: u16,
    pub peer_station_name: String,
    pub peer_port_name: String,
    pub mau_type: MauType,
    pub link_state: LinkState,
}

impl PdPortData {
    pub fn new(port_number: u16) -> Self {
        PdPortData {
            port_number,
            peer_station_name: String::new(),
            peer_port_name: String::new(),
            mau_type: MauType::Unknown,
            link_state: LinkState::Down,
        }
    }

    fn filename(port_number: u16) -> [u8; 12] {
        let mut name = *b"pdport00.bin";
        name[6] = b'0' + ((port_number / 10) % 10) as u8;
        name[7] = b'0' + (port_number % 10) as u8;
        name
    }

    const FORMAT_VERSION: u32 = 1;

    /// Serializes peer name fields (null-padded, 64 bytes each) and the MAU
    /// type byte; link state is runtime-only and not persisted.
    fn encode(&self) -> [u8; 129] {
        let mut buffer = [0u8; 129];
        let station_bytes = self.peer_station_name.as_bytes();
        let n = station_bytes.len().min(64);
        buffer[0..n].copy_from_slice(&station_bytes[..n]);
        let port_bytes = self.peer_port_name.as_bytes();
        let n = port_bytes.len().min(64);
        buffer[64..64 + n].copy_from_slice(&port_bytes[..n]);
        buffer[128] = match self.mau_type {
            MauType::Unknown => 0,
            MauType::Copper100BaseTxFullDuplex => 1,
            MauType::Copper1000BaseTFullDuplex => 2,
            MauType::Fiber100BaseFxFullDuplex => 3,
        };
        buffer
    }

    fn decode(port_number: u16, buffer: &[u8]) -> Self {
        let station_end = buffer[0..64].iter().position(|&b| b == 0).unwrap_or(64);
        let port_end = buffer[64..128].iter().position(|&b| b == 0).unwrap_or(64);
        let mau_type = match buffer[128] {
            1 => MauType::Copper100BaseTxFullDuplex,
            2 => MauType::Copper1000BaseTFullDuplex,
            3 => MauType::Fiber100BaseFxFullDuplex,
            _ => MauType::Unknown,
        };
        PdPortData {
            port_number,
            peer_station_name: String::from_utf8_lossy(&buffer[0..station_end]).into_owned(),
            peer_port_name: String::from_utf8_lossy(&buffer[64..64 + port_end]).into_owned(),
            mau_type,
            link_state: LinkState::Down,
        }
    }

    pub fn save(&self, storage: &mut dyn PersistenceStorage) -> Result<(), PnetError> {
        let filename = Self::filename(self.port_number);
        let filename = core::str::from_utf8(&filename).expect("ascii filename");
        storage.save_file_if_modified(filename, Self::FORMAT_VERSION, &self.encode()).map(|_| ())
    }

    pub fn clear(port_number: u16, storage: &mut dyn PersistenceStorage) -> Result<(), PnetError> {
        let filename = Self::filename(port_number);
        let filename = core::str::from_utf8(&filename).expect("ascii filename");
        storage.clear_file(filename)
    }

    pub fn load(port_number: u16, storage: &mut dyn PersistenceStorage) -> Result<Self, PnetError> {
        let filename = Self::filename(port_number);
        let filename = core::str::from_utf8(&filename).expect("ascii filename");
        let mut buffer = [0u8; 129];
        match storage.load_file(filename, Self::FORMAT_VERSION, &mut buffer)? {
            Some(len) if len == buffer.len() => Ok(Self::decode(port_number, &buffer)),
            _ => Ok(PdPortData::new(port_number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::string::ToString;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct MemStorage {
        files: BTreeMap<alloc::string::String, (u32, Vec<u8>)>,
    }

    impl PersistenceStorage for MemStorage {
        fn load_file(&mut self, filename: &str, expected_version: u32, buffer: &mut [u8]) -> Result<Option<usize>, PnetError> {
            match self.files.get(filename) {
                Some((version, data)) if *version == expected_version => {
                    buffer[..data.len()].copy_from_slice(data);
                    Ok(Some(data.len()))
                }
                _ => Ok(None),
            }
        }
        fn save_file(&mut self, filename: &str, version: u32, data: &[u8]) -> Result<(), PnetError> {
            self.files.insert(filename.to_string(), (version, data.to_vec()));
            Ok(())
        }
        fn save_file_if_modified(&mut self, filename: &str, version: u32, data: &[u8]) -> Result<crate::hal::SaveOutcome, PnetError> {
            self.save_file(filename, version, data)?;
            Ok(crate::hal::SaveOutcome::Updated)
        }
        fn clear_file(&mut self, filename: &str) -> Result<(), PnetError> {
            self.files.remove(filename);
            Ok(())
        }
    }

    #[test]
    fn round_trips_through_storage() {
        let mut storage = MemStorage::default();
        let mut port = PdPortData::new(1);
        port.peer_station_name = "controller-1".into();
        port.peer_port_name = "port-001".into();
        port.mau_type = MauType::Copper1000BaseTFullDuplex;
        port.save(&mut storage).unwrap();

        let loaded = PdPortData::load(1, &mut storage).unwrap();
        assert_eq!(loaded.peer_station_name, "controller-1");
        assert_eq!(loaded.peer_port_name, "port-001");
        assert_eq!(loaded.mau_type, MauType::Copper1000BaseTFullDuplex);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let mut storage = MemStorage::default();
        let loaded = PdPortData::load(2, &mut storage).unwrap();
        assert_eq!(loaded.link_state, LinkState::Down);
        assert!(loaded.peer_station_name.is_empty());
    }
}
