//! Fatal errors. Hardware aborts are handled by the retry policy and never show up here; these are
//! the mistakes that are detected before any transactional work starts.

use thiserror::Error;

/// Result alias for fallible group setup.
pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    #[error("a barrier group needs at least one thread")]
    ZeroThreads,

    #[error("the speculation budget must be at least 1")]
    ZeroSpeculationBudget,

    #[error("environment variable `{var}` has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("thread id {thread_id} is out of range for a group of {thread_count} threads")]
    ThreadIdOutOfRange { thread_id: usize, thread_count: u32 },

    #[error("thread id {0} has already joined the group")]
    AlreadyJoined(usize),
}

impl Error {
    /// Returns true for errors caused by an invalid `Config`.
    #[inline]
    pub fn is_configuration(&self) -> bool {
        match self {
            Error::ZeroThreads | Error::ZeroSpeculationBudget | Error::InvalidEnv { .. } => true,
            Error::ThreadIdOutOfRange { .. } | Error::AlreadyJoined(_) => false,
        }
    }

    /// Returns true for errors caused by a thread joining a group it does not fit in.
    #[inline]
    pub fn is_group_mismatch(&self) -> bool {
        !self.is_configuration()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::ZeroThreads.is_configuration());
        assert!(Error::InvalidEnv {
            var:   "HTBARRIER_MAX_RETRIES",
            value: "many".to_owned(),
        }
        .is_configuration());
        assert!(Error::AlreadyJoined(3).is_group_mismatch());
        assert!(!Error::ThreadIdOutOfRange {
            thread_id:    9,
            thread_count: 4,
        }
        .is_configuration());
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::ThreadIdOutOfRange {
                thread_id:    9,
                thread_count: 4,
            }
            .to_string(),
            "thread id 9 is out of range for a group of 4 threads"
        );
        assert_eq!(
            Error::InvalidEnv {
                var:   "HTBARRIER_BACKOFF_MAX_US",
                value: "-1".to_owned(),
            }
            .to_string(),
            "environment variable `HTBARRIER_BACKOFF_MAX_US` has invalid value \"-1\""
        );
    }
}
