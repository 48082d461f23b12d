#![cfg_attr(not(feature = "std"), no_std)]

// 'alloc' is used for dynamic allocation (e.g., Vec<u8> in frames, record
// buffers, the AR table).
extern crate alloc;

// --- Foundation modules ---
pub mod error;
pub mod hal;
pub mod scheduler;
pub mod types;

// --- Ethernet-level framing ---
pub mod frame;

// --- State machines and protocol machines ---
pub mod alpm;
pub mod apm;
pub mod cmdev;
pub mod cmina;
pub mod cmio;
pub mod cmpbe;
pub mod cmrpc;
pub mod cmsm;
pub mod cmsu;
pub mod cpm;
pub mod ppm;

// --- Device model and record dispatch ---
pub mod cmrdr;
pub mod cmwrr;
pub mod device;
pub mod diagnosis;

// --- Supplemented persistent/ambient features ---
pub mod fspm;
pub mod lldp;
pub mod pdport;

// --- AR model ---
pub mod ar;

// --- Top-level device aggregator ---
pub mod pnet;

// --- Top-level exports ---
pub use ar::{Ar, ArProperties, ArSlab, ArType, ArUuid, Arep, StartupMode};
pub use device::{Device, ModuleIdent, SubmoduleIdent};
pub use error::{ArError, ErrorClass, ErrorCode};
pub use hal::{DeviceCallbacks, Identity, NetworkInterface, PersistenceStorage, PnetError, ResetMode};
pub use pnet::{ApplicationReadyOutcome, ConnectParams, DControlSubCommand, DeviceConfig, ExpectedSubmodule, PnetDevice};
pub use types::{ApiNumber, SlotNumber, SubslotNumber};
