//! The public result taxonomy: a closed set of non-positive codes so
//! that an out-parameter can carry either a count or an error, plus the
//! string table used by `result_to_str`.

use thiserror::Error;

/// One of the eight outcomes the library ever reports. Negative values
/// mirror the codes of the public contract exactly; `Success` is zero so
/// count out-parameters and result codes share a single integer space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum ResultCode {
    #[error("success")]
    Success = 0,
    #[error("unclassified platform failure")]
    OtherError = -1,
    #[error("bus reset: generation changed mid-transaction")]
    BusReset = -2,
    #[error("permission denied on one or more firewire nodes")]
    NoPerm = -3,
    #[error("target node reported busy")]
    Busy = -4,
    #[error("transport error")]
    IoError = -5,
    #[error("request size rejected by kernel or target")]
    IoSize = -6,
    #[error("timed out waiting for completion")]
    IoTimeout = -7,
}

/// Indexed by the negated code.
const MESSAGES: [&str; 8] = [
    "success",
    "unclassified platform failure",
    "bus reset: generation changed mid-transaction",
    "permission denied on one or more firewire nodes",
    "target node reported busy",
    "transport error",
    "request size rejected by kernel or target",
    "timed out waiting for completion",
];

impl ResultCode {
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Recover a `ResultCode` from its integer encoding. `None` for any
    /// value outside the closed set (including positive device counts).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            -1 => Some(Self::OtherError),
            -2 => Some(Self::BusReset),
            -3 => Some(Self::NoPerm),
            -4 => Some(Self::Busy),
            -5 => Some(Self::IoError),
            -6 => Some(Self::IoSize),
            -7 => Some(Self::IoTimeout),
            _ => None,
        }
    }
}

/// Human-readable string for a result code, or `None` ("NULL" in the
/// public contract) if `code` is out of range.
pub fn result_to_str(code: i32) -> Option<&'static str> {
    if code > 0 {
        return None;
    }
    MESSAGES.get((-code) as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_code() {
        for code in -7..=0 {
            let rc = ResultCode::from_code(code).expect("in-range code");
            assert_eq!(rc.code(), code);
            assert_eq!(result_to_str(code), Some(rc.to_string()).as_deref());
        }
    }

    #[test]
    fn out_of_range_resolves_to_none() {
        assert_eq!(ResultCode::from_code(-8), None);
        assert_eq!(result_to_str(-8), None);
        assert_eq!(result_to_str(1), None);
    }
}
