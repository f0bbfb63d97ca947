use std::fmt;
use std::io;

/// Status of a tag, session, connection or request. `Ok` and `Pending` are
/// the two non-error states; everything else maps to a negative code on the
/// numeric surface.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Status {
    Ok,
    Pending,
    NullPtr,
    BadParam,
    BadDevice,
    BadData,
    OutOfBounds,
    NoMem,
    NoData,
    Timeout,
    Create,
    RemoteErr,
    Open,
    Read,
    Write,
}

impl Status {
    /// Numeric code as exposed to callers that want an integer.
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Pending => 1,
            Status::NullPtr => -1,
            Status::BadParam => -2,
            Status::BadDevice => -3,
            Status::BadData => -4,
            Status::OutOfBounds => -5,
            Status::NoMem => -6,
            Status::NoData => -7,
            Status::Timeout => -8,
            Status::Create => -9,
            Status::RemoteErr => -10,
            Status::Open => -11,
            Status::Read => -12,
            Status::Write => -13,
        }
    }

    /// True for any state that ends an in-flight operation.
    pub fn is_terminal(self) -> bool {
        self != Status::Pending
    }

    pub fn is_err(self) -> bool {
        self != Status::Ok && self != Status::Pending
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::Pending => "pending",
            Status::NullPtr => "null pointer",
            Status::BadParam => "bad parameter",
            Status::BadDevice => "bad device",
            Status::BadData => "bad data",
            Status::OutOfBounds => "out of bounds",
            Status::NoMem => "out of memory",
            Status::NoData => "no data",
            Status::Timeout => "timeout",
            Status::Create => "creation failed",
            Status::RemoteErr => "remote error",
            Status::Open => "open failed",
            Status::Read => "read failed",
            Status::Write => "write failed",
        };
        write!(f, "{}", name)
    }
}

pub type TxResult<T> = Result<T, TxError>;

/// Result of one transmit/receive attempt. `Wait` is the non-fatal "would
/// block" arm, retried on the next tasklet pass. `Fatal` carries the status
/// recorded on the owning entity.
#[derive(Debug, Eq, PartialEq)]
pub enum TxError {
    Wait,
    Fatal(Status),
}

impl From<io::Error> for TxError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => TxError::Wait,
            io::ErrorKind::Interrupted => TxError::Wait,
            _ => TxError::Fatal(Status::Read),
        }
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for TxResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(TxError::Wait) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Pending.code(), 1);
        assert_eq!(Status::NullPtr.code(), -1);
        assert_eq!(Status::Timeout.code(), -8);
        assert_eq!(Status::RemoteErr.code(), -10);
    }

    #[test]
    fn test_wouldblock_folds_to_wait() {
        let err: TxError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(err, TxError::Wait);

        let err: TxError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(err, TxError::Fatal(Status::Read));
    }

    #[test]
    fn test_wait_has_not_failed() {
        let wait: TxResult<()> = Err(TxError::Wait);
        assert!(!wait.has_failed());

        let fatal: TxResult<()> = Err(TxError::Fatal(Status::Read));
        assert!(fatal.has_failed());

        let ok: TxResult<()> = Ok(());
        assert!(!ok.has_failed());
    }
}
