//! CMSM — Connection Startup Monitor (§4.13): a per-AR single-shot liveness
//! watchdog of length `cm_initiator_activity_timeout_factor × 100 ms`.

use crate::error::ArError;
use crate::scheduler::SchedulerHandle;

/// Armed on CMDEV entering W_CIND, restarted on every RPC read/write/
/// DControl, disarmed on CMDEV reaching DATA or ABORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmSm {
    handle: SchedulerHandle,
    timeout_factor: u32,
}

impl CmSm {
    pub fn new(timeout_factor: u32) -> Self {
        CmSm { handle: SchedulerHandle::NONE, timeout_factor }
    }

    pub fn timeout_us(&self) -> u64 {
        self.timeout_factor as u64 * 100_000
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_running()
    }

    pub fn arm(&mut self, handle: SchedulerHandle) {
        self.handle = handle;
    }

    pub fn disarm(&mut self) -> Option<SchedulerHandle> {
        if self.handle.is_running() {
            let h = self.handle;
            self.handle = SchedulerHandle::NONE;
            Some(h)
        } else {
            None
        }
    }

    /// The watchdog expired (§4.13): sets `err_cls`/`err_code` to
    /// `ABORT_AR_CMI_TIMEOUT`.
    pub fn expiry_error() -> ArError {
        ArError::CMI_TIMEOUT
    }
}
