//! Wire-level error taxonomy (§7): the `(ErrorClass, ErrorCode)` pair that
//! rides in RPC responses, alarm frames and the `state_ind` callback. This
//! is deliberately smaller and flatter than [`crate::hal::PnetError`], which
//! is the Rust-level plumbing error used internally.

use crate::hal::PnetError;

/// `err_cls` (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorClass {
    RtaProtocol = 0x01,
    CtlDiNa = 0x02,
    CmDev = 0x03,
    CmRpc = 0x04,
    Cpm = 0x05,
    Ppm = 0x06,
    Alpm = 0x07,
    CmSu = 0x08,
    App = 0x09,
}

/// `err_code` (§7), scoped within its [`ErrorClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // RtaProtocol
    AbortArConsumerDhtExpired,
    AbortArCmiTimeout,
    AbortArReleaseInd,
    DcpStationNameChanged,
    DcpResetToFactory,
    // CtlDiNa
    MultipleUsersOfIp,
    // CmDev
    StateConflict,
    InvalidIndexForState,
    // CmRpc
    DecodeError,
    UnknownOpnum,
    FragmentMismatch,
    // Cpm
    Invalid,
    InvalidState,
    // Ppm
    PpmInvalid,
    PpmInvalidState,
    // Alpm
    AlpmInvalid,
    AlpmQueueOverflow,
    // CmSu
    ArAddProviderFailed,
    ArAddConsumerFailed,
    AlarmOpenFailed,
    // App
    ReadError,
    WriteError,
    UserSpecific(u16),
}

/// An AR-scoped error pair, set on the AR before CMDEV raises ABORT (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArError {
    pub class: ErrorClass,
    pub code: ErrorCode,
}

impl ArError {
    pub const fn new(class: ErrorClass, code: ErrorCode) -> Self {
        ArError { class, code }
    }

    pub const DHT_EXPIRED: ArError = ArError::new(ErrorClass::RtaProtocol, ErrorCode::AbortArConsumerDhtExpired);
    pub const CMI_TIMEOUT: ArError = ArError::new(ErrorClass::RtaProtocol, ErrorCode::AbortArCmiTimeout);
    pub const RELEASE_IND: ArError = ArError::new(ErrorClass::RtaProtocol, ErrorCode::AbortArReleaseInd);
}

impl From<PnetError> for ArError {
    fn from(err: PnetError) -> Self {
        match err {
            PnetError::InvalidPdu | PnetError::FragmentMismatch | PnetError::InvalidOpnum(_) => {
                ArError::new(ErrorClass::CmRpc, ErrorCode::DecodeError)
            }
            PnetError::UnknownArep(_) => ArError::new(ErrorClass::CmRpc, ErrorCode::UnknownOpnum),
            PnetError::InvalidState => ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict),
            PnetError::RecordNotFound(_) => ArError::new(ErrorClass::App, ErrorCode::ReadError),
            PnetError::ValidationError(_) => ArError::new(ErrorClass::App, ErrorCode::WriteError),
            PnetError::StorageError(_) => ArError::new(ErrorClass::App, ErrorCode::WriteError),
            _ => ArError::new(ErrorClass::CmDev, ErrorCode::StateConflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_map_to_cmrpc_class() {
        let ar_err: ArError = PnetError::InvalidPdu.into();
        assert_eq!(ar_err.class, ErrorClass::CmRpc);
        assert_eq!(ar_err.code, ErrorCode::DecodeError);
    }

    #[test]
    fn storage_errors_map_to_app_class() {
        let ar_err: ArError = PnetError::StorageError("disk full").into();
        assert_eq!(ar_err.class, ErrorClass::App);
    }
}
