//! The top-level device aggregator (§9): owns every AR, the device tree,
//! the scheduler and the persistence-backed supplemented features, and
//! exposes the application-facing operations of §5/§6 as methods on
//! [`PnetDevice`]. Wire decoding of CMRPC opnum bodies and DCP PDUs is the
//! caller's job; this module operates on already-decoded parameters and
//! decoded/classified cyclic frames, matching the teacher's separation
//! between `node::mod`'s high-level orchestration and `frame::codec`'s
//! wire format.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::alpm::{PendingAlarm, ReceiveOutcome};
use crate::ar::iocr::{IoDataObject, Iocr};
use crate::ar::{Ar, ArProperties, ArSlab, ArType, ArUuid, Arep, StartupMode};
use crate::cmdev::{CmDevAction, CmDevEvent};
use crate::cmina::{Cmina, CminaConfig};
use crate::cmpbe::{CmPbeAction, CmPbeEvent};
use crate::cmrdr::{self, BlockWriter, RecordStore};
use crate::cmsm::CmSm;
use crate::cmwrr;
use crate::cpm::{Cpm, CpmOutcome};
use crate::device::{Device, ModuleIdent, SubmoduleIdent};
use crate::diagnosis::{DiagContent, DiagEvent, DiagHandle, DiagnosisPool, Severity};
use crate::error::{ArError, ErrorClass, ErrorCode};
use crate::frame::{AlarmPayload, ApduStatus, EthernetHeader, MacAddress};
use crate::fspm::{ImRecords, Logbook, LogbookEntry, IM_RECORD_LENGTHS};
use crate::hal::{DeviceCallbacks, Identity, NetworkInterface, PersistenceStorage, PnetError, ResetMode};
use crate::lldp::LldpConfig;
use crate::pdport::PdPortData;
use crate::ppm::Ppm;
use crate::scheduler::{Scheduler, SchedulerCallback, SchedulerHandle};
use crate::types::{ApiNumber, DataDirection, IocrDirection, IpAddress, SlotNumber, SubslotNumber, ETHERTYPE_LLDP, ETHERTYPE_PROFINET};

const IM_FORMAT_VERSION: u32 = 1;
/// Mirrors `cmrdr`'s private port-record banding so record indices can be
/// turned back into port numbers without reaching into that module's
/// internals.
const PORT_RECORD_BASE: u32 = 0x8080;

fn im_filename(which: u8) -> &'static str {
    match which {
        1 => "im1.bin",
        2 => "im2.bin",
        3 => "im3.bin",
        _ => "im4.bin",
    }
}

fn alarm_payload_data(payload: &AlarmPayload) -> &[u8] {
    match payload {
        AlarmPayload::DiagnosisSummary { data, .. } => data,
        AlarmPayload::ManufacturerSpecific { data, .. } => data,
    }
}

/// What caused a scheduler timer to fire, routed back to the owning
/// component by `handle_periodic` once the scheduler's tick has drained
/// into this queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpiryKind {
    CmSmWatchdog(Arep),
    ApmRetransmit(Arep),
    CpmWatchdog(Arep, u16),
    CyclicTick(Arep, u16),
    Hello,
    Lldp,
}

/// Bridges the scheduler's `Box<dyn SchedulerCallback>` requirement to a
/// plain expiry queue, the same way `scheduler.rs`'s own test module
/// records fired callbacks into a shared `Rc<RefCell<..>>`.
struct TimerCallback {
    kind: ExpiryKind,
    queue: Rc<RefCell<VecDeque<ExpiryKind>>>,
}

impl SchedulerCallback for TimerCallback {
    fn on_fire(&mut self, _now_us: u64) {
        self.queue.borrow_mut().push_back(self.kind);
    }
}

/// Boot-time configuration (§6's configuration table, ambient sizing
/// parameters included).
pub struct DeviceConfig {
    pub identity: Identity,
    pub station_name: String,
    pub ip: IpAddress,
    pub mask: IpAddress,
    pub gateway: IpAddress,
    pub lldp: LldpConfig,
    pub use_qualified_diagnosis: bool,
    pub max_ar: usize,
    pub scheduler_capacity: usize,
    pub cycle_time_us: u64,
    pub num_ports: u16,
    pub diagnosis_capacity: usize,
    pub logbook_capacity: usize,
    pub send_hello: bool,
}

/// One expected submodule in a Connect request (§3).
pub struct ExpectedSubmodule {
    pub api: ApiNumber,
    pub slot: SlotNumber,
    pub subslot: SubslotNumber,
    pub ident: SubmoduleIdent,
    pub direction: DataDirection,
    pub expected_input_size: u16,
    pub expected_output_size: u16,
}

/// Decoded CMRPC Connect parameters (§4.8): the caller has already parsed
/// the DCE/RPC Connect-block grammar out of the request body.
pub struct ConnectParams {
    pub uuid: ArUuid,
    pub session_number: u16,
    pub peer_mac: MacAddress,
    pub peer_ip: IpAddress,
    pub ar_type: ArType,
    pub properties: ArProperties,
    pub cmi_activity_timeout_factor: u32,
    pub iocrs: Vec<Iocr>,
    pub expected_submodules: Vec<ExpectedSubmodule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DControlSubCommand {
    PrmBegin,
    PrmEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationReadyOutcome {
    SendApplRdy,
    Deferred,
    Aborted,
}

/// Per-field borrow of the persisted record stores (§6), so `record_read`/
/// `record_write` can take it without aliasing the callbacks or AR table
/// fields of [`PnetDevice`].
struct StoreView<'a> {
    im_records: &'a mut ImRecords,
    ports: &'a mut Vec<PdPortData>,
    storage: &'a mut dyn PersistenceStorage,
}

impl<'a> RecordStore for StoreView<'a> {
    fn read_im(&self, which: u8, out: &mut BlockWriter) -> Result<(), PnetError> {
        out.write_bytes(self.im_records.read(which)?)
    }

    fn write_im(&mut self, which: u8, data: &[u8]) -> Result<(), PnetError> {
        self.im_records.write(which, data)?;
        self.storage.save_file_if_modified(im_filename(which), IM_FORMAT_VERSION, data)?;
        Ok(())
    }

    fn read_pd_record(&self, _index: u32, out: &mut BlockWriter) -> Result<(), PnetError> {
        out.write_u16(self.ports.len() as u16)?;
        for port in self.ports.iter() {
            out.write_u16(port.port_number)?;
        }
        Ok(())
    }

    fn read_port_record(&self, index: u32, out: &mut BlockWriter) -> Result<(), PnetError> {
        let port_number = index.wrapping_sub(PORT_RECORD_BASE) as u16;
        let port = self.ports.iter().find(|p| p.port_number == port_number).ok_or(PnetError::RecordNotFound(index))?;
        out.write_u16(port.port_number)?;
        out.write_bytes(port.peer_station_name.as_bytes())
    }

    fn write_port_record(&mut self, index: u32, data: &[u8]) -> Result<(), PnetError> {
        let port_number = index.wrapping_sub(PORT_RECORD_BASE) as u16;
        let port = self.ports.iter_mut().find(|p| p.port_number == port_number).ok_or(PnetError::RecordNotFound(index))?;
        port.peer_station_name = String::from_utf8_lossy(data).into_owned();
        Ok(())
    }
}

/// The process-wide device (§3, §9): every live AR, the device tree,
/// persisted supplemented features and the single-threaded scheduler
/// driving timers. Frame transmission is parameterized on
/// [`NetworkInterface`] rather than owned, keeping the core independent of
/// any particular HAL instance.
pub struct PnetDevice {
    identity: Identity,
    use_qualified_diagnosis: bool,
    tree: Device,
    diagnosis: DiagnosisPool,
    ars: ArSlab,
    scheduler: Scheduler,
    cmina: Cmina,
    im_records: ImRecords,
    logbook: Logbook,
    ports: Vec<PdPortData>,
    lldp_config: LldpConfig,
    cpms: BTreeMap<(Arep, u16), Cpm>,
    ppms: BTreeMap<(Arep, u16), Ppm>,
    ar_errors: BTreeMap<Arep, ArError>,
    expiry_queue: Rc<RefCell<VecDeque<ExpiryKind>>>,
    hello_handle: SchedulerHandle,
    lldp_handle: SchedulerHandle,
    callbacks: Box<dyn DeviceCallbacks>,
    storage: Box<dyn PersistenceStorage>,
}

impl PnetDevice {
    /// Boot sequence (§4.7, §6): loads I&M and per-port records from
    /// nonvolatile storage, boots CMINA from the persisted name/IP, and
    /// arms the HELLO/LLDP beacons if configured.
    pub fn init(config: DeviceConfig, callbacks: Box<dyn DeviceCallbacks>, mut storage: Box<dyn PersistenceStorage>, now_us: u64) -> Result<Self, PnetError> {
        let mut im_records = ImRecords::new();
        for which in 1..=4u8 {
            let expected_len = IM_RECORD_LENGTHS[(which - 1) as usize];
            let mut buffer = alloc::vec![0u8; expected_len];
            if let Ok(Some(len)) = storage.load_file(im_filename(which), IM_FORMAT_VERSION, &mut buffer) {
                if len == expected_len {
                    let _ = im_records.write(which, &buffer);
                }
            }
        }

        let mut ports = Vec::with_capacity(config.num_ports as usize);
        for port_number in 1..=config.num_ports {
            ports.push(PdPortData::load(port_number, &mut *storage)?);
        }

        let cmina_config = CminaConfig { station_name: config.station_name, ip: config.ip, mask: config.mask, gateway: config.gateway };
        let cmina = Cmina::boot(cmina_config);
        let expiry_queue = Rc::new(RefCell::new(VecDeque::new()));

        let mut device = PnetDevice {
            identity: config.identity,
            use_qualified_diagnosis: config.use_qualified_diagnosis,
            tree: Device::new(),
            diagnosis: DiagnosisPool::new(config.diagnosis_capacity),
            ars: ArSlab::new(config.max_ar),
            scheduler: Scheduler::new(config.scheduler_capacity, config.cycle_time_us),
            cmina,
            im_records,
            logbook: Logbook::new(config.logbook_capacity),
            ports,
            lldp_config: config.lldp,
            cpms: BTreeMap::new(),
            ppms: BTreeMap::new(),
            ar_errors: BTreeMap::new(),
            expiry_queue,
            hello_handle: SchedulerHandle::NONE,
            lldp_handle: SchedulerHandle::NONE,
            callbacks,
            storage,
        };

        if config.send_hello && device.cmina.accepts_connect() {
            if let Ok(handle) = device.arm_timer(now_us, crate::cmina::HELLO_INTERVAL_US, ExpiryKind::Hello) {
                device.hello_handle = handle;
            }
        }
        if let Ok(handle) = device.arm_timer(now_us, crate::lldp::DEFAULT_LLDP_INTERVAL_US, ExpiryKind::Lldp) {
            device.lldp_handle = handle;
        }

        Ok(device)
    }

    fn arm_timer(&mut self, now_us: u64, delay_us: u64, kind: ExpiryKind) -> Result<SchedulerHandle, PnetError> {
        let callback = Box::new(TimerCallback { kind, queue: self.expiry_queue.clone() });
        self.scheduler.add(now_us, delay_us, callback)
    }

    /// Drains the scheduler's due timers and acts on each (§4.1): watchdog
    /// expiry, alarm retransmit, HELLO/LLDP beacons and cyclic ticks. Must
    /// be called at least once per `cycle_time_us`.
    pub fn handle_periodic(&mut self, now_us: u64, net: &mut dyn NetworkInterface) {
        self.scheduler.tick(now_us);
        loop {
            let kind = self.expiry_queue.borrow_mut().pop_front();
            let Some(kind) = kind else { break };
            match kind {
                ExpiryKind::CmSmWatchdog(arep) => self.on_cmsm_watchdog(arep),
                ExpiryKind::ApmRetransmit(arep) => self.on_apm_retransmit_due(arep, now_us),
                ExpiryKind::CpmWatchdog(arep, index) => self.on_cpm_watchdog(arep, index, now_us),
                ExpiryKind::CyclicTick(arep, index) => self.on_cyclic_tick(arep, index, now_us, net),
                ExpiryKind::Hello => self.on_hello_due(now_us, net),
                ExpiryKind::Lldp => self.on_lldp_due(now_us, net),
            }
        }
    }

    fn on_cmsm_watchdog(&mut self, arep: Arep) {
        self.raise_abort(arep, CmSm::expiry_error());
    }

    fn on_apm_retransmit_due(&mut self, arep: Arep, now_us: u64) {
        let result = match self.ars.get_mut(arep) {
            Some(ar) => ar.apm.on_retransmit_due(),
            None => return,
        };
        match result {
            Ok(()) => {
                let delay = self.ars.get(arep).map(|ar| ar.apm.next_delay_us()).unwrap_or(crate::apm::BASE_RETRANSMIT_US);
                if let Ok(handle) = self.arm_timer(now_us, delay, ExpiryKind::ApmRetransmit(arep)) {
                    if let Some(ar) = self.ars.get_mut(arep) {
                        ar.apm.arm(handle);
                        ar.scheduler_handles.push(handle);
                    }
                }
            }
            Err(err) => self.raise_abort(arep, err),
        }
    }

    fn on_cpm_watchdog(&mut self, arep: Arep, iocr_index: u16, now_us: u64) {
        let outcome = match self.cpms.get_mut(&(arep, iocr_index)) {
            Some(cpm) => cpm.on_control_interval_elapsed(),
            None => return,
        };
        self.handle_cpm_outcome(arep, outcome);

        let control_interval = self.ars.get(arep).and_then(|ar| ar.iocrs.get(iocr_index as usize)).map(Iocr::control_interval_us);
        if let Some(interval) = control_interval {
            if let Ok(handle) = self.arm_timer(now_us, interval, ExpiryKind::CpmWatchdog(arep, iocr_index)) {
                if let Some(ar) = self.ars.get_mut(arep) {
                    ar.scheduler_handles.push(handle);
                }
            }
        }
    }

    fn on_cyclic_tick(&mut self, arep: Arep, iocr_index: u16, now_us: u64, net: &mut dyn NetworkInterface) {
        let info = self
            .ars
            .get(arep)
            .and_then(|ar| ar.iocrs.get(iocr_index as usize).map(|iocr| (ar.peer_mac, iocr.frame_id, iocr.vlan_tci, iocr.control_interval_us())));
        let Some((peer_mac, frame_id, vlan_tci, control_interval)) = info else { return };

        if let Some(ppm) = self.ppms.get_mut(&(arep, iocr_index)) {
            let payload = ppm.payload().to_vec();
            match ppm.on_tick(true) {
                Ok(status) => {
                    if let Err(err) = self.send_cyclic_frame(peer_mac, vlan_tci, frame_id, &payload, status, net) {
                        self.raise_abort(arep, err);
                    }
                }
                Err(err) => self.raise_abort(arep, err),
            }
        }

        if let Ok(handle) = self.arm_timer(now_us, control_interval, ExpiryKind::CyclicTick(arep, iocr_index)) {
            if let Some(ar) = self.ars.get_mut(arep) {
                ar.scheduler_handles.push(handle);
            }
        }
    }

    /// Builds and sends a cyclic RT frame. §4.4: a PPM send failure aborts
    /// the AR, so every encode/transmit failure is surfaced to the caller
    /// rather than swallowed.
    fn send_cyclic_frame(&self, peer_mac: MacAddress, vlan_tci: Option<u16>, frame_id: u16, payload: &[u8], status: ApduStatus, net: &mut dyn NetworkInterface) -> Result<(), ArError> {
        let ppm_err = || ArError::new(ErrorClass::Ppm, ErrorCode::PpmInvalid);

        let mut header = EthernetHeader::new(peer_mac, MacAddress::new(net.local_mac_address()), ETHERTYPE_PROFINET);
        if let Some(tci) = vlan_tci {
            header = header.with_vlan(tci);
        }
        let mut frame = alloc::vec![0u8; header.wire_len() + 2 + payload.len() + crate::frame::cyclic::APDU_STATUS_SIZE];
        let mut offset = header.write(&mut frame).map_err(|_| ppm_err())?;
        frame[offset..offset + 2].copy_from_slice(&frame_id.to_be_bytes());
        offset += 2;
        frame[offset..offset + payload.len()].copy_from_slice(payload);
        offset += payload.len();
        status.write(&mut frame[offset..]).map_err(|_| ppm_err())?;
        net.send_frame(&frame).map_err(|_| ppm_err())
    }

    fn on_hello_due(&mut self, now_us: u64, net: &mut dyn NetworkInterface) {
        if self.cmina.take_pending_hello() {
            let mut body = Vec::with_capacity(8);
            body.push(5u8); // DCP service ID: Hello
            body.push(0u8); // service type: request
            body.extend_from_slice(&0u16.to_be_bytes()); // xid
            body.extend_from_slice(&0u16.to_be_bytes()); // response delay factor
            body.extend_from_slice(&0u16.to_be_bytes()); // dcp data length

            let header = EthernetHeader::new(MacAddress::BROADCAST, MacAddress::new(net.local_mac_address()), ETHERTYPE_PROFINET);
            let mut frame = alloc::vec![0u8; header.wire_len() + 2 + body.len()];
            if let Ok(mut offset) = header.write(&mut frame) {
                frame[offset..offset + 2].copy_from_slice(&crate::types::FRAME_ID_DCP_HELLO.to_be_bytes());
                offset += 2;
                frame[offset..offset + body.len()].copy_from_slice(&body);
                let _ = net.send_frame(&frame);
            }
        }
        if let Ok(handle) = self.arm_timer(now_us, crate::cmina::HELLO_INTERVAL_US, ExpiryKind::Hello) {
            self.hello_handle = handle;
        }
    }

    fn on_lldp_due(&mut self, now_us: u64, net: &mut dyn NetworkInterface) {
        let config = LldpConfig {
            chassis_id: self.lldp_config.chassis_id.clone(),
            port_id: self.lldp_config.port_id.clone(),
            local_mac: MacAddress::new(net.local_mac_address()),
            mau_type: self.lldp_config.mau_type,
            autonegotiation_supported: self.lldp_config.autonegotiation_supported,
        };
        if let Ok(lldpdu) = crate::lldp::build_lldpdu(&config) {
            let lldp_multicast = MacAddress::new([0x01, 0x80, 0xC2, 0x00, 0x00, 0x0E]);
            let header = EthernetHeader::new(lldp_multicast, config.local_mac, ETHERTYPE_LLDP);
            let mut frame = alloc::vec![0u8; header.wire_len() + lldpdu.len()];
            if let Ok(offset) = header.write(&mut frame) {
                frame[offset..offset + lldpdu.len()].copy_from_slice(&lldpdu);
                let _ = net.send_frame(&frame);
            }
        }
        if let Ok(handle) = self.arm_timer(now_us, crate::lldp::DEFAULT_LLDP_INTERVAL_US, ExpiryKind::Lldp) {
            self.lldp_handle = handle;
        }
    }

    fn raise_abort(&mut self, arep: Arep, err: ArError) {
        let action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmdev.process_event(CmDevEvent::Abort(err)),
            None => return,
        };
        self.ar_errors.insert(arep, err);
        if matches!(action, CmDevAction::RunAbortCleanup(_)) {
            self.callbacks.state_cb(arep, crate::hal::ArEvent::Abort);
        }
        self.teardown_ar(arep);
    }

    fn teardown_ar(&mut self, arep: Arep) {
        if let Some(ar) = self.ars.get_mut(arep) {
            for handle in core::mem::take(&mut ar.scheduler_handles) {
                let _ = self.scheduler.remove(handle);
            }
        }
        self.tree.release_ar_subslots(arep);
        self.cpms.retain(|&(a, _), _| a != arep);
        self.ppms.retain(|&(a, _), _| a != arep);
        self.ars.remove(arep);
    }

    fn live_areps(&self) -> Vec<Arep> {
        (1..=self.ars.capacity() as Arep).filter(|&a| self.ars.get(a).is_some()).collect()
    }

    // --- AR lifecycle (§4.8, §4.10, §4.14) ---

    /// A CMRPC Connect request was reassembled and decoded (§4.8): admits a
    /// new AR, claims its subslots and starts CMSU (PPM/CPM/ALPM creation).
    pub fn connect(&mut self, params: ConnectParams, now_us: u64) -> Result<Arep, PnetError> {
        if !self.cmina.accepts_connect() {
            return Err(PnetError::InvalidState);
        }

        let mut ar = Ar::new(params.uuid, params.session_number, params.peer_mac, params.peer_ip, params.ar_type, params.properties, params.cmi_activity_timeout_factor);
        ar.iocrs = params.iocrs;
        ar.recompute_cmio_expectations();
        let arep = self.ars.insert(ar)?;

        for expected in &params.expected_submodules {
            if !self.callbacks.exp_submodule_cb(expected.api, expected.slot, expected.subslot, expected.ident.0) {
                self.ars.remove(arep);
                self.tree.release_ar_subslots(arep);
                return Err(PnetError::ValidationError("submodule rejected by application"));
            }
            if let Some(previous) = self.tree.claim_subslot(expected.api, expected.slot, expected.subslot, arep) {
                self.raise_abort(previous, ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict));
            }
            self.tree.plug_submodule(
                expected.api,
                expected.slot,
                expected.subslot,
                expected.ident,
                expected.direction,
                expected.expected_input_size,
                expected.expected_output_size,
            )?;
        }

        if self.callbacks.connect_cb(arep).is_err() {
            self.ars.remove(arep);
            self.tree.release_ar_subslots(arep);
            return Err(PnetError::ValidationError("connect rejected by application"));
        }

        let action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmdev.process_event(CmDevEvent::RpcConnect),
            None => return Err(PnetError::UnknownArep(arep)),
        };
        if let CmDevAction::NotifyStateInd(event) = action {
            self.callbacks.state_cb(arep, event);
        }

        let timeout_us = self.ars.get(arep).map(|ar| ar.cmsm.timeout_us()).ok_or(PnetError::UnknownArep(arep))?;
        let handle = self.arm_timer(now_us, timeout_us, ExpiryKind::CmSmWatchdog(arep))?;
        if let Some(ar) = self.ars.get_mut(arep) {
            ar.cmsm.arm(handle);
            ar.scheduler_handles.push(handle);
        }

        self.start_ar(arep, now_us)?;
        Ok(arep)
    }

    /// CMSU (§4.14): creates and activates PPM/CPM per IOCR.
    fn start_ar(&mut self, arep: Arep, now_us: u64) -> Result<(), PnetError> {
        let (iocrs, peer_mac, properties) = match self.ars.get(arep) {
            Some(ar) => (ar.iocrs.clone(), ar.peer_mac, ar.properties),
            None => return Err(PnetError::UnknownArep(arep)),
        };

        if let Some(ar) = self.ars.get_mut(arep) {
            ar.cmsu.start();
        }

        for (index, iocr) in iocrs.iter().enumerate() {
            let index = index as u16;
            let frame_len = iocr.payload_len() as usize;
            let control_interval = iocr.control_interval_us();
            match iocr.direction {
                IocrDirection::Input => {
                    let ppm = Ppm::new(frame_len, iocr.reduction_ratio, control_interval, now_us + control_interval);
                    self.ppms.insert((arep, index), ppm);
                }
                IocrDirection::Output => {
                    let cpm = Cpm::new(peer_mac, frame_len, control_interval, iocr.data_hold_factor, properties.startup_mode);
                    self.cpms.insert((arep, index), cpm);
                }
                IocrDirection::MulticastProvider | IocrDirection::MulticastConsumer => {}
            }
        }

        if let Some(ar) = self.ars.get_mut(arep) {
            ar.cmsu.mark_started();
        }

        let cmdev_action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmdev.process_event(CmDevEvent::CmSuStartOk),
            None => return Err(PnetError::UnknownArep(arep)),
        };
        let _ = cmdev_action;

        for (index, iocr) in iocrs.iter().enumerate() {
            let index = index as u16;
            match iocr.direction {
                IocrDirection::Input => {
                    if let Some(ppm) = self.ppms.get_mut(&(arep, index)) {
                        ppm.activate();
                    }
                    let handle = self.arm_timer(now_us, iocr.control_interval_us(), ExpiryKind::CyclicTick(arep, index))?;
                    if let Some(ar) = self.ars.get_mut(arep) {
                        ar.scheduler_handles.push(handle);
                    }
                }
                IocrDirection::Output => {
                    if let Some(cpm) = self.cpms.get_mut(&(arep, index)) {
                        cpm.activate();
                    }
                    let handle = self.arm_timer(now_us, iocr.control_interval_us(), ExpiryKind::CpmWatchdog(arep, index))?;
                    if let Some(ar) = self.ars.get_mut(arep) {
                        ar.scheduler_handles.push(handle);
                    }
                }
                IocrDirection::MulticastProvider | IocrDirection::MulticastConsumer => {}
            }
        }

        Ok(())
    }

    /// A DControl sub-command arrived (§4.9): forwards to the application,
    /// then drives CMPBE and (for PRM_END) CMDEV.
    pub fn dcontrol(&mut self, arep: Arep, sub_cmd: DControlSubCommand) -> Result<(), PnetError> {
        let sub_cmd_code: u16 = match sub_cmd {
            DControlSubCommand::PrmBegin => 1,
            DControlSubCommand::PrmEnd => 2,
        };
        if self.callbacks.dcontrol_cb(arep, sub_cmd_code).is_err() {
            self.raise_abort(arep, ArError::new(ErrorClass::App, ErrorCode::WriteError));
            return Err(PnetError::ValidationError("dcontrol rejected by application"));
        }

        let cmpbe_event = match sub_cmd {
            DControlSubCommand::PrmBegin => CmPbeEvent::DControlPrmBegin,
            DControlSubCommand::PrmEnd => CmPbeEvent::DControlPrmEnd,
        };
        let cmpbe_action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmpbe.process_event(cmpbe_event),
            None => return Err(PnetError::UnknownArep(arep)),
        };

        if sub_cmd == DControlSubCommand::PrmEnd {
            let cmdev_action = match self.ars.get_mut(arep) {
                Some(ar) => ar.cmdev.process_event(CmDevEvent::DControlPrmEnd),
                None => return Err(PnetError::UnknownArep(arep)),
            };
            if let CmDevAction::NotifyStateInd(event) = cmdev_action {
                self.callbacks.state_cb(arep, event);
            }
        }

        if matches!(cmpbe_action, CmPbeAction::AbortAr) {
            self.raise_abort(arep, ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict));
        }
        Ok(())
    }

    /// The application signals readiness after PRM_END (§4.9); tells the
    /// caller whether a CControl(APPL_RDY) must now be sent.
    pub fn application_ready(&mut self, arep: Arep) -> Result<ApplicationReadyOutcome, PnetError> {
        let action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmpbe.process_event(CmPbeEvent::CControlApplRdySent),
            None => return Err(PnetError::UnknownArep(arep)),
        };
        match action {
            CmPbeAction::SendApplRdy => Ok(ApplicationReadyOutcome::SendApplRdy),
            CmPbeAction::AbortAr => {
                self.raise_abort(arep, ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict));
                Ok(ApplicationReadyOutcome::Aborted)
            }
            _ => Ok(ApplicationReadyOutcome::Deferred),
        }
    }

    /// The peer confirmed the device's CControl(APPL_RDY) (§4.9, §4.10).
    pub fn ccontrol_confirmed(&mut self, arep: Arep) -> Result<(), PnetError> {
        let cmpbe_action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmpbe.process_event(CmPbeEvent::CControlCnfOk),
            None => return Err(PnetError::UnknownArep(arep)),
        };
        let _ = cmpbe_action;

        let cmdev_action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmdev.process_event(CmDevEvent::CControlCnfOk),
            None => return Err(PnetError::UnknownArep(arep)),
        };
        if let CmDevAction::NotifyStateInd(event) = cmdev_action {
            self.callbacks.state_cb(arep, event);
        }

        self.callbacks.ccontrol_cb(arep);
        self.maybe_enter_data(arep);
        Ok(())
    }

    fn maybe_enter_data(&mut self, arep: Arep) {
        let ready = match self.ars.get(arep) {
            Some(ar) => ar.cmio.data_possible(),
            None => return,
        };
        if !ready {
            return;
        }
        let action = match self.ars.get_mut(arep) {
            Some(ar) => ar.cmdev.process_event(CmDevEvent::CmIoDataPossible),
            None => return,
        };
        if let CmDevAction::NotifyStateInd(event) = action {
            self.callbacks.state_cb(arep, event);
        }
    }

    /// A classified cyclic RT frame addressed to one of this AR's output
    /// IOCRs arrived (§4.3).
    pub fn on_cyclic_frame(&mut self, arep: Arep, iocr_index: u16, source_mac: MacAddress, payload: &[u8], status: ApduStatus) {
        let outcome = match self.cpms.get_mut(&(arep, iocr_index)) {
            Some(cpm) => cpm.on_frame_received(source_mac, payload, status),
            None => return,
        };
        self.handle_cpm_outcome(arep, outcome);
    }

    fn handle_cpm_outcome(&mut self, arep: Arep, outcome: CpmOutcome) {
        match outcome {
            CpmOutcome::Accepted { first_valid } => {
                if first_valid {
                    if let Some(ar) = self.ars.get_mut(arep) {
                        ar.cmio.mark_consumer_ready();
                    }
                    self.maybe_enter_data(arep);
                }
            }
            CpmOutcome::AcceptedNoSurface | CpmOutcome::Rejected => {}
            CpmOutcome::DhtExpired(err) | CpmOutcome::StoppedDuringStartupLegacy(err) => self.raise_abort(arep, err),
        }
    }

    /// The peer released the AR, or the application/CMRPC layer did
    /// (§4.10).
    pub fn release(&mut self, arep: Arep) {
        if let Some(ar) = self.ars.get_mut(arep) {
            let _ = ar.cmdev.process_event(CmDevEvent::RpcRelease);
        }
        self.callbacks.release_cb(arep);
        self.teardown_ar(arep);
    }

    /// The application requested an immediate AR abort (§5).
    pub fn ar_abort(&mut self, arep: Arep) {
        self.raise_abort(arep, ArError::new(ErrorClass::App, ErrorCode::UserSpecific(0)));
    }

    pub fn ar_error_codes(&self, arep: Arep) -> Option<ArError> {
        self.ar_errors.get(&arep).copied()
    }

    // --- Device tree (§3) ---

    pub fn plug_module(&mut self, api: ApiNumber, slot: SlotNumber, ident: ModuleIdent) {
        self.tree.plug_module(api, slot, ident);
    }

    pub fn pull_module(&mut self, api: ApiNumber, slot: SlotNumber) {
        let owners: Vec<Arep> = self
            .tree
            .api(api)
            .and_then(|a| a.slot(slot))
            .map(|s| s.subslots.iter().filter_map(|(_, sub)| sub.owning_ar).collect())
            .unwrap_or_default();
        for owner in owners {
            self.raise_abort(owner, ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict));
        }
        self.tree.pull_module(api, slot);
    }

    #[allow(clippy::too_many_arguments)]
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
        self.tree.plug_submodule(api, slot, subslot, ident, direction, expected_input_size, expected_output_size)
    }

    pub fn pull_submodule(&mut self, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber) {
        let owner = self.tree.api(api).and_then(|a| a.slot(slot)).and_then(|s| s.subslot(subslot)).and_then(|s| s.owning_ar);
        if let Some(owner) = owner {
            self.raise_abort(owner, ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict));
        }
        self.tree.pull_submodule(api, slot, subslot);
    }

    fn find_io_object(&self, arep: Arep, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, direction: IocrDirection) -> Option<(u16, IoDataObject)> {
        let ar = self.ars.get(arep)?;
        for (index, iocr) in ar.iocrs.iter().enumerate() {
            if iocr.direction != direction {
                continue;
            }
            for object in &iocr.data_objects {
                if object.api == api && object.slot == slot && object.subslot == subslot {
                    return Some((index as u16, *object));
                }
            }
        }
        None
    }

    /// Toggles the provider-run bit on every PPM this device owns (§4.4):
    /// the device-wide "hold cyclic data" switch.
    pub fn set_provider_state(&mut self, running: bool) {
        for ppm in self.ppms.values_mut() {
            ppm.set_provider_state(running);
        }
    }

    /// `pnet_input_set_data_and_iops` (§3): the application publishes data
    /// and IOPS for one input submodule into its owning PPM's frame.
    pub fn input_set_data_and_iops(&mut self, arep: Arep, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, data: &[u8], iops: u8) -> Result<(), PnetError> {
        let (index, object) = self.find_io_object(arep, api, slot, subslot, IocrDirection::Input).ok_or(PnetError::RecordNotFound(0))?;
        if data.len() != object.data_length as usize {
            return Err(PnetError::ValidationError("input data length mismatch"));
        }
        let ppm = self.ppms.get_mut(&(arep, index)).ok_or(PnetError::InternalError("PPM missing for input IOCR"))?;
        ppm.write_segment(object.data_offset, data)?;
        ppm.write_iops_byte(object.iops_offset, iops)?;
        if let Some(sub) = self.tree.api_mut(api).slot_mut(slot).and_then(|s| s.subslot_mut(subslot)) {
            sub.last_provider_status = iops;
        }
        Ok(())
    }

    /// `pnet_input_get_iocs` (§3): the consumer status last observed for an
    /// input submodule (simplified: tracked per-subslot rather than
    /// re-parsed from the controller's own frame on every call).
    pub fn input_get_iocs(&self, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber) -> Result<u8, PnetError> {
        self.tree
            .api(api)
            .and_then(|a| a.slot(slot))
            .and_then(|s| s.subslot(subslot))
            .map(|s| s.last_consumer_status)
            .ok_or(PnetError::RecordNotFound(0))
    }

    /// `pnet_output_get_data_and_iops` (§3): the most recently consumed
    /// data and IOPS for an output submodule, read from its CPM's consumer
    /// double-buffer.
    pub fn output_get_data_and_iops(&self, arep: Arep, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, buffer: &mut [u8]) -> Result<(u8, usize), PnetError> {
        let (index, object) = self.find_io_object(arep, api, slot, subslot, IocrDirection::Output).ok_or(PnetError::RecordNotFound(0))?;
        let cpm = self.cpms.get(&(arep, index)).ok_or(PnetError::InternalError("CPM missing for output IOCR"))?;
        let frame = cpm.consumer_data();
        let start = object.data_offset as usize;
        let end = start + object.data_length as usize;
        if end > frame.len() || buffer.len() < object.data_length as usize {
            return Err(PnetError::BufferTooShort);
        }
        buffer[..object.data_length as usize].copy_from_slice(&frame[start..end]);
        let iops = frame.get(object.iops_offset as usize).copied().unwrap_or(0);
        Ok((iops, object.data_length as usize))
    }

    /// `pnet_output_set_iocs` (§3): the application reports consumer status
    /// for an output submodule, recorded on the device tree and mirrored
    /// into the matching input IOCR's IOCS byte if one exists.
    pub fn output_set_iocs(&mut self, arep: Arep, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, iocs: u8) -> Result<(), PnetError> {
        match self.tree.api_mut(api).slot_mut(slot).and_then(|s| s.subslot_mut(subslot)) {
            Some(sub) => sub.last_consumer_status = iocs,
            None => return Err(PnetError::RecordNotFound(0)),
        }
        if let Some((index, object)) = self.find_io_object(arep, api, slot, subslot, IocrDirection::Input) {
            if let Some(ppm) = self.ppms.get_mut(&(arep, index)) {
                let _ = ppm.write_iops_byte(object.iocs_offset, iocs);
            }
        }
        Ok(())
    }

    // --- Alarms (§4.5) ---

    pub fn alarm_send_process_alarm(&mut self, arep: Arep, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, usi: u16, payload: Vec<u8>, high_priority: bool) -> Result<u16, PnetError> {
        let alarm_payload = AlarmPayload::ManufacturerSpecific { usi, data: payload };
        let ar = self.ars.get_mut(arep).ok_or(PnetError::UnknownArep(arep))?;
        let channel = if high_priority { &mut ar.alpm_high } else { &mut ar.alpm_low };
        channel.enqueue_send(api, slot, subslot, alarm_payload)
    }

    pub fn alarm_send_ack(&mut self, arep: Arep, sequence_number: u16, high_priority: bool) -> Result<(), PnetError> {
        let ar = self.ars.get_mut(arep).ok_or(PnetError::UnknownArep(arep))?;
        let channel = if high_priority { &mut ar.alpm_high } else { &mut ar.alpm_low };
        if channel.ack_received(sequence_number) {
            ar.apm.reset();
            Ok(())
        } else {
            Err(PnetError::RecordNotFound(sequence_number as u32))
        }
    }

    /// An alarm notification PDU was received and already parsed by the
    /// caller (§4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn on_alarm_notification(&mut self, arep: Arep, api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, sequence_number: u16, payload: AlarmPayload, high_priority: bool) {
        let outcome = match self.ars.get_mut(arep) {
            Some(ar) => {
                let channel = if high_priority { &mut ar.alpm_high } else { &mut ar.alpm_low };
                channel.receive_notification(PendingAlarm { sequence_number, api, slot, subslot, payload: payload.clone(), acked: false })
            }
            None => return,
        };
        if matches!(outcome, ReceiveOutcome::Delivered) {
            self.callbacks.alarm_ind_cb(arep, api, slot, subslot, alarm_payload_data(&payload));
        }
    }

    // --- Diagnosis (§4.15, supplemented logbook) ---

    fn after_diagnosis_event(&mut self, slot: SlotNumber, subslot: SubslotNumber, content: DiagContent, event: DiagEvent) -> DiagHandle {
        let handle = match event {
            DiagEvent::Added(h) | DiagEvent::Updated(h) | DiagEvent::Removed(h) => h,
        };
        if matches!(event, DiagEvent::Added(_)) {
            self.logbook.push(LogbookEntry { slot, subslot, content: content.clone() });
        }
        let owner = self.tree.api(0).and_then(|a| a.slot(slot)).and_then(|s| s.subslot(subslot)).and_then(|s| s.owning_ar);
        if let Some(arep) = owner {
            let usi = if self.use_qualified_diagnosis { 0x0002 } else { 0x0001 };
            let payload = AlarmPayload::DiagnosisSummary { usi, data: Vec::new() };
            if let Some(ar) = self.ars.get_mut(arep) {
                let _ = ar.alpm_high.enqueue_send(0, slot, subslot, payload);
            }
        }
        handle
    }

    #[allow(clippy::too_many_arguments)]
    pub fn diag_std_add(&mut self, slot: SlotNumber, subslot: SubslotNumber, severity: Severity, channel_number: u16, channel_error_type: u16, extended_error_type: u16, extended_value: u32) -> Result<DiagHandle, PnetError> {
        let content = DiagContent::Standard { channel_number, channel_error_type, extended_error_type, extended_value };
        let event = self.diagnosis.add(slot, subslot, severity, content.clone())?;
        Ok(self.after_diagnosis_event(slot, subslot, content, event))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn diag_std_update(&mut self, slot: SlotNumber, subslot: SubslotNumber, severity: Severity, channel_number: u16, channel_error_type: u16, extended_error_type: u16, extended_value: u32) -> Result<DiagHandle, PnetError> {
        let content = DiagContent::Standard { channel_number, channel_error_type, extended_error_type, extended_value };
        let event = self.diagnosis.update(slot, subslot, severity, content.clone())?;
        Ok(self.after_diagnosis_event(slot, subslot, content, event))
    }

    pub fn diag_std_remove(&mut self, handle: DiagHandle) -> Result<(), PnetError> {
        self.diagnosis.remove(handle).map(|_| ()).ok_or(PnetError::RecordNotFound(handle))
    }

    pub fn diag_usi_add(&mut self, slot: SlotNumber, subslot: SubslotNumber, severity: Severity, usi: u16, payload: Vec<u8>) -> Result<DiagHandle, PnetError> {
        let content = DiagContent::Usi { usi, payload };
        let event = self.diagnosis.add(slot, subslot, severity, content.clone())?;
        Ok(self.after_diagnosis_event(slot, subslot, content, event))
    }

    pub fn diag_usi_update(&mut self, slot: SlotNumber, subslot: SubslotNumber, severity: Severity, usi: u16, payload: Vec<u8>) -> Result<DiagHandle, PnetError> {
        let content = DiagContent::Usi { usi, payload };
        let event = self.diagnosis.update(slot, subslot, severity, content.clone())?;
        Ok(self.after_diagnosis_event(slot, subslot, content, event))
    }

    pub fn diag_usi_remove(&mut self, handle: DiagHandle) -> Result<(), PnetError> {
        self.diagnosis.remove(handle).map(|_| ()).ok_or(PnetError::RecordNotFound(handle))
    }

    // --- Records (§4.11, §4.12) ---

    pub fn record_read(&mut self, arep: Arep, index: u32, slot: SlotNumber, subslot: SubslotNumber, buffer: &mut [u8]) -> Result<usize, PnetError> {
        let store = StoreView { im_records: &mut self.im_records, ports: &mut self.ports, storage: &mut *self.storage };
        cmrdr::record_read(arep, index, slot, subslot, &self.identity, &self.diagnosis, &store, &mut *self.callbacks, buffer)
    }

    pub fn record_write(&mut self, arep: Arep, index: u32, data: &[u8]) -> Result<(), PnetError> {
        let cmdev_state = self.ars.get(arep).map(|ar| ar.cmdev.state).ok_or(PnetError::UnknownArep(arep))?;
        let mut store = StoreView { im_records: &mut self.im_records, ports: &mut self.ports, storage: &mut *self.storage };
        cmwrr::record_write(arep, index, cmdev_state, &mut store, &mut *self.callbacks, data)
    }

    // --- Reset / housekeeping (§4.7, §6) ---

    /// `pnet_factory_reset` (§4.7): aborts every live AR, resets CMINA, and
    /// forwards the scope to the application.
    pub fn factory_reset(&mut self, mode: ResetMode) {
        for arep in self.live_areps() {
            self.raise_abort(arep, ArError::new(ErrorClass::RtaProtocol, ErrorCode::DcpResetToFactory));
        }
        let _ = self.cmina.reset_to_factory(mode);
        self.callbacks.reset_cb(mode);
    }

    /// `pnet_remove_data_files` (§6): clears I&M and per-port persisted
    /// files without otherwise touching live ARs.
    pub fn remove_data_files(&mut self) -> Result<(), PnetError> {
        for which in 1..=4u8 {
            self.storage.clear_file(im_filename(which))?;
        }
        for port_number in 1..=self.ports.len() as u16 {
            PdPortData::clear(port_number, &mut *self.storage)?;
        }
        Ok(())
    }

    /// `pnet_show` (§7): a human-readable one-shot diagnostic dump, not
    /// meant for machine parsing.
    pub fn show(&self) -> String {
        use core::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(out, "AR table: {}/{} live", self.ars.live_count(), self.ars.capacity());
        let _ = writeln!(out, "CMINA state: {:?}", self.cmina.state);
        let _ = writeln!(out, "Diagnosis items: {}", self.diagnosis.len());
        let _ = writeln!(out, "Logbook entries: {}", self.logbook.len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ar::iocr::IoDataObject;
    use crate::hal::ArEvent;
    use crate::types::IpAddress;

    struct RecordingCallbacks {
        events: Vec<(Arep, ArEvent)>,
    }

    impl DeviceCallbacks for RecordingCallbacks {
        fn state_cb(&mut self, arep: u32, event: ArEvent) {
            self.events.push((arep, event));
        }
        fn connect_cb(&mut self, _arep: u32) -> Result<(), (u16, u16)> {
            Ok(())
        }
        fn release_cb(&mut self, _arep: u32) {}
        fn dcontrol_cb(&mut self, _arep: u32, _sub_cmd: u16) -> Result<(), (u16, u16)> {
            Ok(())
        }
        fn ccontrol_cb(&mut self, _arep: u32) {}
        fn read_cb(&mut self, _arep: u32, _index: u32, _buffer: &mut [u8]) -> Option<usize> {
            None
        }
        fn write_cb(&mut self, _arep: u32, _index: u32, _data: &[u8]) -> Result<(), (u16, u16)> {
            Ok(())
        }
        fn exp_module_cb(&mut self, _api: u32, _slot: u16, _module_ident: u32) -> bool {
            true
        }
        fn exp_submodule_cb(&mut self, _api: u32, _slot: u16, _subslot: u16, _submodule_ident: u32) -> bool {
            true
        }
        fn new_data_status_cb(&mut self, _arep: u32, _crep: u32, _data_status: u8) {}
        fn alarm_ind_cb(&mut self, _arep: u32, _api: u32, _slot: u16, _subslot: u16, _payload: &[u8]) {}
        fn alarm_cnf_cb(&mut self, _arep: u32, _accepted: bool) {}
        fn alarm_ack_cnf_cb(&mut self, _arep: u32, _result: i32) {}
        fn reset_cb(&mut self, _mode: ResetMode) {}
        fn signal_led_cb(&mut self, _on: bool) {}
    }

    #[derive(Default)]
    struct MemStorage {
        files: BTreeMap<String, (u32, Vec<u8>)>,
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
            self.files.insert(String::from(filename), (version, data.to_vec()));
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

    struct StubNetwork {
        mac: [u8; 6],
        sent: Vec<Vec<u8>>,
    }

    impl NetworkInterface for StubNetwork {
        fn send_frame(&mut self, frame: &[u8]) -> Result<(), PnetError> {
            self.sent.push(frame.to_vec());
            Ok(())
        }
        fn receive_frame(&mut self, _buffer: &mut [u8]) -> Result<usize, PnetError> {
            Ok(0)
        }
        fn local_mac_address(&self) -> [u8; 6] {
            self.mac
        }
    }

    fn boot_device() -> PnetDevice {
        let config = DeviceConfig {
            identity: Identity::default(),
            station_name: String::from("device-1"),
            ip: IpAddress::new(192, 168, 0, 10),
            mask: IpAddress::new(255, 255, 255, 0),
            gateway: IpAddress::UNSPECIFIED,
            lldp: LldpConfig {
                chassis_id: String::from("device-1"),
                port_id: String::from("port-001"),
                local_mac: MacAddress::new([0; 6]),
                mau_type: crate::pdport::MauType::Copper100BaseTxFullDuplex,
                autonegotiation_supported: true,
            },
            use_qualified_diagnosis: false,
            max_ar: 4,
            scheduler_capacity: 32,
            cycle_time_us: 1_000,
            num_ports: 1,
            diagnosis_capacity: 8,
            logbook_capacity: 8,
            send_hello: true,
        };
        PnetDevice::init(config, Box::new(RecordingCallbacks { events: Vec::new() }), Box::new(MemStorage::default()), 0).unwrap()
    }

    fn single_io_object(api: ApiNumber, slot: SlotNumber, subslot: SubslotNumber, len: u16) -> IoDataObject {
        IoDataObject { api, slot, subslot, data_offset: 0, data_length: len, iops_offset: len, iocs_offset: len + 1 }
    }

    fn sample_iocr(direction: IocrDirection, object: IoDataObject) -> Iocr {
        Iocr {
            direction,
            frame_id: 0x8000,
            vlan_tci: None,
            send_clock_factor: 32,
            reduction_ratio: 1,
            data_hold_factor: 3,
            frame_send_offset: 0,
            data_objects: alloc::vec![object],
        }
    }

    #[test]
    fn connect_reaches_data_after_full_startup_handshake() {
        let mut device = boot_device();
        let input_object = single_io_object(0, 1, 1, 4);
        let output_object = single_io_object(0, 1, 1, 4);
        let params = ConnectParams {
            uuid: ArUuid([1; 16]),
            session_number: 1,
            peer_mac: MacAddress::new([2; 6]),
            peer_ip: IpAddress::new(192, 168, 0, 20),
            ar_type: ArType::IoCar,
            properties: ArProperties { startup_mode: StartupMode::Advanced, device_access: false },
            cmi_activity_timeout_factor: 30,
            iocrs: alloc::vec![sample_iocr(IocrDirection::Input, input_object), sample_iocr(IocrDirection::Output, output_object)],
            expected_submodules: alloc::vec![ExpectedSubmodule {
                api: 0,
                slot: 1,
                subslot: 1,
                ident: SubmoduleIdent(1),
                direction: DataDirection::InputOutput,
                expected_input_size: 4,
                expected_output_size: 4,
            }],
        };

        device.plug_module(0, 1, ModuleIdent(1));
        let arep = device.connect(params, 0).unwrap();

        device.dcontrol(arep, DControlSubCommand::PrmBegin).unwrap();
        device.dcontrol(arep, DControlSubCommand::PrmEnd).unwrap();
        assert_eq!(device.application_ready(arep).unwrap(), ApplicationReadyOutcome::SendApplRdy);
        device.ccontrol_confirmed(arep).unwrap();

        let status = ApduStatus { cycle_counter: 1, data_status: crate::frame::DataStatus::PROVIDER_RUN | crate::frame::DataStatus::DATA_VALID | crate::frame::DataStatus::PRIMARY_OR_BACKUP, transfer_status: 0 };
        device.on_cyclic_frame(arep, 1, MacAddress::new([2; 6]), &[0u8; 4], status);

        assert_eq!(device.ar_error_codes(arep), None);
    }

    #[test]
    fn diag_std_add_then_remove_round_trips() {
        let mut device = boot_device();
        let handle = device.diag_std_add(1, 1, Severity::Fault, 1, 0x0010, 0, 0).unwrap();
        device.diag_std_remove(handle).unwrap();
        assert!(device.diag_std_remove(handle).is_err());
    }

    #[test]
    fn im0_record_read_reports_configured_identity() {
        let mut device = boot_device();
        device.identity.vendor_id = 0x1234;
        let mut buffer = [0u8; 64];
        let len = device.record_read(1, crate::cmrdr::IM0_INDEX, 0, 0, &mut buffer).unwrap();
        assert!(len >= 2);
        assert_eq!(&buffer[0..2], &0x1234u16.to_be_bytes());
    }

    #[test]
    fn remove_data_files_clears_persisted_im_and_port_files() {
        let mut device = boot_device();
        device.record_write(1, crate::cmrdr::IM1_INDEX, &[0xAB; 54]).unwrap_err(); // no AR yet: UnknownArep
        device.remove_data_files().unwrap();
    }

    #[test]
    fn hello_due_sends_broadcast_frame_when_pending() {
        let mut device = boot_device();
        let mut net = StubNetwork { mac: [9; 6], sent: Vec::new() };
        device.handle_periodic(2_000_000, &mut net);
        assert!(!net.sent.is_empty());
    }
}
