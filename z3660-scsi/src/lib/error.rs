use std::fmt;

/// Errors reported back through an I/O request. Each maps onto the
/// `io_Error` value the native device returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The addressed unit is not enabled or not present.
    OpenFailed,
    /// The request was aborted before it reached the hardware.
    Aborted,
    /// Unknown command code.
    NoCommand,
    /// A buffer, response or CDB is shorter than required.
    BadLength,
    /// Missing buffer or CDB, or a block outside the unit.
    BadAddress,
    /// The CDB is malformed for its command, or the command or mode page
    /// is not emulated.
    BadStatus,
    /// The controller did not finish a transfer within the configured bound.
    Timeout,
}

pub type IoResult<T> = Result<T, IoError>;

impl IoError {
    /// The signed error byte stored in `io_Error`.
    pub fn code(self) -> i8 {
        match self {
            IoError::OpenFailed => -1,
            IoError::Aborted => -2,
            IoError::NoCommand => -3,
            IoError::BadLength => -4,
            IoError::BadAddress => -5,
            IoError::Timeout => 42,
            IoError::BadStatus => 45,
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            IoError::OpenFailed => "unit is not available",
            IoError::Aborted => "request was aborted",
            IoError::NoCommand => "command not supported",
            IoError::BadLength => "bad length",
            IoError::BadAddress => "bad address",
            IoError::BadStatus => "bad SCSI status",
            IoError::Timeout => "controller timed out",
        };
        write!(f, "{} (error {})", msg, self.code())
    }
}

impl std::error::Error for IoError {}
