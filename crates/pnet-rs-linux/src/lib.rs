// crates/pnet-rs-linux/src/lib.rs
#![cfg(target_os = "linux")]

use std::fs;
use std::io;
use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use pnet::datalink::{self, Channel, NetworkInterface as PnetInterface};
use pnet_rs::hal::{NetworkInterface, PersistenceStorage, PnetError, SaveOutcome};
use pnet_rs::types::IpAddress;

/// Raw-Ethernet network interface backed by `pnet`'s datalink channel, with
/// an optional UDP socket for CMRPC-over-UDP/IP (`udp-rpc` feature).
pub struct LinuxPnetInterface {
    tx: Mutex<Box<dyn datalink::DataLinkSender>>,
    rx: Mutex<Box<dyn datalink::DataLinkReceiver>>,
    pnet_iface: PnetInterface,
    mac_address: [u8; 6],
    #[cfg(feature = "udp-rpc")]
    udp: UdpSocket,
    #[cfg(feature = "udp-rpc")]
    local_ip: IpAddress,
}

impl LinuxPnetInterface {
    pub fn new(interface_name: &str) -> Result<Self, String> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface: &PnetInterface| iface.name == interface_name)
            .ok_or_else(|| format!("Interface '{}' not found", interface_name))?;

        let mac_address = interface.mac.ok_or("Interface has no MAC address")?.into();

        // Configure the channel to be promiscuous and have a default read timeout.
        let config = datalink::Config { read_timeout: Some(Duration::from_millis(100)), promiscuous: true, ..Default::default() };

        let (tx, rx) = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
            Ok(_) => return Err("Unsupported channel type".to_string()),
            Err(e) => return Err(e.to_string()),
        };

        #[cfg(feature = "udp-rpc")]
        let (udp, local_ip) = {
            let ipv4 = interface.ips.iter().find_map(|ip| match ip.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            });
            let local_ip = ipv4.map(|v4| IpAddress(v4.octets())).unwrap_or(IpAddress::UNSPECIFIED);
            let bind_addr = format!("{}:{}", local_ip_to_string(local_ip), pnet_rs::types::CMRPC_UDP_PORT);
            let socket = UdpSocket::bind(bind_addr).map_err(|e| e.to_string())?;
            socket.set_read_timeout(Some(Duration::from_millis(100))).map_err(|e| e.to_string())?;
            (socket, local_ip)
        };

        Ok(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            pnet_iface: interface,
            mac_address,
            #[cfg(feature = "udp-rpc")]
            udp,
            #[cfg(feature = "udp-rpc")]
            local_ip,
        })
    }

    /// Sets the read timeout for the underlying network channel. This
    /// re-creates the channel, as `pnet`'s config is set at creation time.
    pub fn set_read_timeout(&mut self, duration: Duration) -> Result<(), PnetError> {
        let config = datalink::Config { read_timeout: Some(duration), promiscuous: true, ..Default::default() };

        match datalink::channel(&self.pnet_iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => {
                *self.tx.lock().unwrap() = tx;
                *self.rx.lock().unwrap() = rx;
                Ok(())
            }
            Ok(_) => Err(PnetError::IoError),
            Err(_) => Err(PnetError::IoError),
        }
    }
}

#[cfg(feature = "udp-rpc")]
fn local_ip_to_string(ip: IpAddress) -> String {
    format!("{}.{}.{}.{}", ip.0[0], ip.0[1], ip.0[2], ip.0[3])
}

impl NetworkInterface for LinuxPnetInterface {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), PnetError> {
        self.tx
            .lock()
            .unwrap()
            .send_to(frame, None)
            .ok_or(PnetError::IoError)? // For channel closed
            .map_err(|_| PnetError::IoError)?; // For OS error
        Ok(())
    }

    fn receive_frame(&mut self, buffer: &mut [u8]) -> Result<usize, PnetError> {
        let mut rx_guard = self.rx.lock().unwrap();
        match rx_guard.next() {
            Ok(frame) => {
                let len = frame.len();
                if buffer.len() >= len {
                    buffer[..len].copy_from_slice(frame);
                    Ok(len)
                } else {
                    Err(PnetError::BufferTooShort)
                }
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock {
                    Ok(0) // read timeout, not an error
                } else {
                    Err(PnetError::IoError)
                }
            }
        }
    }

    fn local_mac_address(&self) -> [u8; 6] {
        self.mac_address
    }

    #[cfg(feature = "udp-rpc")]
    fn send_udp(&mut self, dest_ip: IpAddress, dest_port: u16, data: &[u8]) -> Result<(), PnetError> {
        let addr = format!("{}:{}", local_ip_to_string(dest_ip), dest_port);
        self.udp.send_to(data, addr).map_err(|_| PnetError::IoError)?;
        Ok(())
    }

    #[cfg(feature = "udp-rpc")]
    fn receive_udp(&mut self, buffer: &mut [u8]) -> Result<Option<(usize, IpAddress, u16)>, PnetError> {
        match self.udp.recv_from(buffer) {
            Ok((len, addr)) => {
                let ip = match addr.ip() {
                    std::net::IpAddr::V4(v4) => IpAddress(v4.octets()),
                    std::net::IpAddr::V6(_) => return Err(PnetError::IoError),
                };
                Ok(Some((len, ip, addr.port())))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(_) => Err(PnetError::IoError),
        }
    }

    #[cfg(feature = "udp-rpc")]
    fn local_ip_address(&self) -> IpAddress {
        self.local_ip
    }
}

/// Filesystem-backed [`PersistenceStorage`] (§6): one file per named blob
/// under a configured base directory, version-tagged by a 4-byte
/// little-endian prefix.
pub struct FsStorage {
    base_dir: PathBuf,
}

impl FsStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(FsStorage { base_dir })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.base_dir.join(filename)
    }
}

impl PersistenceStorage for FsStorage {
    fn load_file(&mut self, filename: &str, expected_version: u32, buffer: &mut [u8]) -> Result<Option<usize>, PnetError> {
        let path = self.path_for(filename);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(_) => return Err(PnetError::StorageError("failed to read persisted file")),
        };
        if raw.len() < 4 {
            return Ok(None);
        }
        let version = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        if version != expected_version {
            return Ok(None);
        }
        let data = &raw[4..];
        if buffer.len() < data.len() {
            return Err(PnetError::BufferTooShort);
        }
        buffer[..data.len()].copy_from_slice(data);
        Ok(Some(data.len()))
    }

    fn save_file(&mut self, filename: &str, version: u32, data: &[u8]) -> Result<(), PnetError> {
        let path = self.path_for(filename);
        let mut raw = Vec::with_capacity(4 + data.len());
        raw.extend_from_slice(&version.to_le_bytes());
        raw.extend_from_slice(data);
        fs::write(&path, &raw).map_err(|_| PnetError::StorageError("failed to write persisted file"))
    }

    fn save_file_if_modified(&mut self, filename: &str, version: u32, data: &[u8]) -> Result<SaveOutcome, PnetError> {
        let path = self.path_for(filename);
        match fs::read(&path) {
            Ok(raw) if raw.len() >= 4 && u32::from_le_bytes(raw[0..4].try_into().unwrap()) == version && &raw[4..] == data => Ok(SaveOutcome::Unchanged),
            Ok(_) => {
                self.save_file(filename, version, data)?;
                Ok(SaveOutcome::Updated)
            }
            Err(_) => {
                self.save_file(filename, version, data)?;
                Ok(SaveOutcome::FirstWrite)
            }
        }
    }

    fn clear_file(&mut self, filename: &str) -> Result<(), PnetError> {
        match fs::remove_file(self.path_for(filename)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(_) => Err(PnetError::StorageError("failed to remove persisted file")),
        }
    }
}
