// crates/pnet-rs/src/hal.rs
use alloc::string::String;
use core::array::TryFromSliceError;
use core::fmt;

use crate::types::IpAddress;

/// The Rust-level plumbing error for the core, distinct from the wire-level
/// `(ErrorClass, ErrorCode)` pair of [`crate::error`] that rides in RPC
/// responses, alarm frames and the `state_ind` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnetError {
    /// The provided buffer is too small for the operation.
    BufferTooShort,
    /// An underlying I/O error occurred.
    IoError,
    /// A received frame is fundamentally invalid (e.g. wrong EtherType, short header).
    InvalidEthernetFrame,
    /// A received PROFINET PDU is fundamentally invalid (e.g. too short for its block header).
    InvalidPdu,
    /// A FrameID does not belong to any registered dispatch entry.
    UnknownFrameId(u16),
    /// A CMRPC opnum is not one the core understands.
    InvalidOpnum(u16),
    /// A CMRPC fragment arrived with a sequence/length mismatch.
    FragmentMismatch,
    /// No AR exists for the AREP a request referenced.
    UnknownArep(u32),
    /// The AR table has no free slot (§4.16 Fatal).
    ArTableFull,
    /// The scheduler's free list is exhausted (§4.16 Fatal).
    SchedulerFull,
    /// A scheduler handle was used after removal, or its generation no longer matches.
    StaleSchedulerHandle,
    /// An operation was attempted while its owning state machine was not in an admitting state.
    InvalidState,
    /// The requested record index is not implemented.
    RecordNotFound(u32),
    /// A record or configuration write failed validation.
    ValidationError(&'static str),
    /// A persistence adapter reported failure.
    StorageError(&'static str),
    /// A multi-byte value could not be parsed from a slice (wrong length).
    SliceConversion,
    /// Internal logic error; carries a short static tag.
    InternalError(&'static str),
}

impl fmt::Display for PnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "Buffer is too short"),
            Self::IoError => write!(f, "Underlying I/O error"),
            Self::InvalidEthernetFrame => write!(f, "Invalid Ethernet frame"),
            Self::InvalidPdu => write!(f, "Invalid PROFINET PDU"),
            Self::UnknownFrameId(id) => write!(f, "Unknown FrameID: {:#06x}", id),
            Self::InvalidOpnum(op) => write!(f, "Invalid CMRPC opnum: {:#06x}", op),
            Self::FragmentMismatch => write!(f, "CMRPC fragment sequence/length mismatch"),
            Self::UnknownArep(arep) => write!(f, "Unknown AREP: {}", arep),
            Self::ArTableFull => write!(f, "AR table exhausted"),
            Self::SchedulerFull => write!(f, "Scheduler free list exhausted"),
            Self::StaleSchedulerHandle => write!(f, "Stale or mismatched scheduler handle"),
            Self::InvalidState => write!(f, "Operation invalid in current state"),
            Self::RecordNotFound(idx) => write!(f, "Record index not found: {:#06x}", idx),
            Self::ValidationError(s) => write!(f, "Validation error: {}", s),
            Self::StorageError(s) => write!(f, "Storage error: {}", s),
            Self::SliceConversion => write!(f, "Failed to convert slice to fixed-size array"),
            Self::InternalError(s) => write!(f, "Internal error: {}", s),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PnetError {}

impl From<TryFromSliceError> for PnetError {
    fn from(_: TryFromSliceError) -> Self {
        PnetError::SliceConversion
    }
}

impl From<&'static str> for PnetError {
    fn from(s: &'static str) -> Self {
        PnetError::InternalError(s)
    }
}

/// Hardware Abstraction Layer (HAL) for network communication.
///
/// This trait abstracts the physical sending and receiving of raw Ethernet
/// frames and UDP datagrams, so the core protocol logic stays
/// platform-agnostic (`no_std`).
pub trait NetworkInterface {
    /// Sends a raw Ethernet frame (including Ethernet header) over the network.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), PnetError>;

    /// Attempts to receive a single raw Ethernet frame into the provided buffer.
    ///
    /// Returns the number of bytes read if successful, or an error. Returns
    /// `Ok(0)` on a read timeout if configured. The buffer must be large
    /// enough to hold the maximum possible frame (1522 bytes, §6).
    fn receive_frame(&mut self, buffer: &mut [u8]) -> Result<usize, PnetError>;

    /// Returns the local MAC address of the bound interface.
    fn local_mac_address(&self) -> [u8; 6];

    /// Sends a UDP datagram. Only available when the `udp-rpc` feature is enabled.
    #[cfg(feature = "udp-rpc")]
    fn send_udp(&mut self, dest_ip: IpAddress, dest_port: u16, data: &[u8]) -> Result<(), PnetError>;

    /// Attempts to receive a single UDP datagram. Only available when the
    /// `udp-rpc` feature is enabled.
    ///
    /// Returns `Ok(Some((size, source_ip, source_port)))` on success, or
    /// `Ok(None)` on a configured read timeout.
    #[cfg(feature = "udp-rpc")]
    fn receive_udp(&mut self, buffer: &mut [u8]) -> Result<Option<(usize, IpAddress, u16)>, PnetError>;

    /// Returns the local IPv4 address of the interface, or the unspecified
    /// address if not yet configured.
    #[cfg(feature = "udp-rpc")]
    fn local_ip_address(&self) -> IpAddress;
}

/// Result of a `save_file_if_modified` call (§6), pinning the original's
/// wear-leveling return codes: 0 = unchanged, 1 = updated, 2 = first write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Unchanged,
    Updated,
    FirstWrite,
}

/// Persistence adapter for nonvolatile device state: IP-settings blob,
/// I&M1..I&M4 blobs, diagnosis snapshot, and one file per PDPort (§6).
///
/// Each file is prefixed by the caller with a version word; a mismatch
/// between the stored version and the version requested on load is treated
/// as "missing" by `load_file`, forcing the caller to reload defaults.
pub trait PersistenceStorage {
    /// Loads a file previously written with `save_file`/`save_file_if_modified`.
    ///
    /// Returns `Ok(None)` if the file is absent or its stored version word
    /// does not match `expected_version`.
    fn load_file(
        &mut self,
        filename: &str,
        expected_version: u32,
        buffer: &mut [u8],
    ) -> Result<Option<usize>, PnetError>;

    /// Writes `data` unconditionally, prefixed with `version`.
    fn save_file(&mut self, filename: &str, version: u32, data: &[u8]) -> Result<(), PnetError>;

    /// Writes `data` only if it differs from the file's current contents,
    /// to avoid unnecessary flash wear.
    fn save_file_if_modified(
        &mut self,
        filename: &str,
        version: u32,
        data: &[u8],
    ) -> Result<SaveOutcome, PnetError>;

    /// Deletes the file. Deleting an absent file is not an error.
    fn clear_file(&mut self, filename: &str) -> Result<(), PnetError>;
}

// --- Application Upcall Abstraction ---

/// Identifies the product/vendor strings and I&M0 fields carried in DCP
/// identify responses and record reads (§6 configuration table).
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub product_name: String,
    pub device_vendor: String,
    pub manufacturer_specific_string: String,
    pub order_id: String,
    pub serial_number: String,
    pub vendor_id: u16,
    pub device_id: u16,
    pub hw_revision: u16,
    pub sw_revision_prefix: u8,
    pub sw_revision_functional: u8,
    pub sw_revision_bugfix: u8,
    pub sw_revision_internal: u8,
    pub profile_id: u16,
    pub profile_specific_type: u16,
}

/// Scope of a factory-reset request delivered to [`DeviceCallbacks::reset_cb`],
/// mirroring CMINA's reset-to-factory mode (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    CommunicationOnly,
    ApplicationOnly,
    Both,
}

/// Events delivered to [`DeviceCallbacks::state_cb`], the `PNET_EVENT_*`
/// values of §7's user-visible failure/progress surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArEvent {
    Startup,
    PrmEnd,
    Application,
    Data,
    Abort,
}

/// The application upcalls of §6's configuration table, grouped into a
/// single object-safe trait implemented by the application and stored as
/// `&mut dyn DeviceCallbacks` inside the device (§9 design note: "group
/// the ~15 function pointers as a single trait").
pub trait DeviceCallbacks {
    /// AR lifecycle progress/failure notification.
    fn state_cb(&mut self, arep: u32, event: ArEvent);
    /// A Connect request was accepted for this AR; return Err to reject with an error pair.
    fn connect_cb(&mut self, arep: u32) -> Result<(), (u16, u16)>;
    /// The AR was released by the peer or by the application.
    fn release_cb(&mut self, arep: u32);
    /// A DControl sub-command (PRM_BEGIN, PRM_END, APP_RDY, RELEASE) arrived.
    fn dcontrol_cb(&mut self, arep: u32, sub_cmd: u16) -> Result<(), (u16, u16)>;
    /// The device's own CControl(APPL_RDY) was confirmed by the peer.
    fn ccontrol_cb(&mut self, arep: u32);
    /// An application-defined record read; return the number of bytes written.
    fn read_cb(&mut self, arep: u32, index: u32, buffer: &mut [u8]) -> Option<usize>;
    /// An application-defined record write; return Err to reject with an error pair.
    fn write_cb(&mut self, arep: u32, index: u32, data: &[u8]) -> Result<(), (u16, u16)>;
    /// The peer requested a module be plugged; return whether the identity is accepted.
    fn exp_module_cb(&mut self, api: u32, slot: u16, module_ident: u32) -> bool;
    /// The peer requested a submodule be plugged; return whether the identity is accepted.
    fn exp_submodule_cb(&mut self, api: u32, slot: u16, subslot: u16, submodule_ident: u32) -> bool;
    /// A new data-status byte was observed for a consumer/provider relation.
    fn new_data_status_cb(&mut self, arep: u32, crep: u32, data_status: u8);
    /// An alarm indication was received from the peer.
    fn alarm_ind_cb(&mut self, arep: u32, api: u32, slot: u16, subslot: u16, payload: &[u8]);
    /// A process alarm sent by the device was accepted or refused by the peer.
    fn alarm_cnf_cb(&mut self, arep: u32, accepted: bool);
    /// The peer's acknowledgement of an AlarmAck the device sent.
    fn alarm_ack_cnf_cb(&mut self, arep: u32, result: i32);
    /// A factory-reset or remove-data-files request reached the application.
    fn reset_cb(&mut self, mode: ResetMode);
    /// DCP "signal" (flash LED) indication (§10 supplemented feature).
    fn signal_led_cb(&mut self, on: bool);
}
