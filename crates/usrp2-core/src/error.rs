//! Error types for the USRP2 host driver.
//!
//! All fallible operations across the driver return [`Result<T>`], which uses
//! [`Error`] as the error type. Transport failures, device negative
//! acknowledgments, tuning failures and streaming state-machine misuse are all
//! captured here.

/// The error type for all USRP2 driver operations.
///
/// Every configuration call of the device session maps the "false" outcome of
/// a boolean-returning API onto one of these variants, so callers can tell a
/// lost acknowledgment apart from a rejected parameter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No acknowledgment arrived within the retry budget, or a bounded wait
    /// (TX flow control) expired.
    #[error("timeout waiting for device")]
    Timeout,

    /// The device returned a negative acknowledgment.
    #[error("device rejected command 0x{opcode:02X}: {reason}")]
    Rejected {
        /// Opcode of the rejected command.
        opcode: u16,
        /// Reason text supplied by the device (may be empty).
        reason: String,
    },

    /// The frequency planner cannot reach the requested frequency.
    #[error("frequency {requested} Hz out of range ({min} Hz to {max} Hz)")]
    FrequencyOutOfRange {
        /// Requested frequency in hertz.
        requested: f64,
        /// Lowest reachable frequency in hertz.
        min: f64,
        /// Highest reachable frequency in hertz.
        max: f64,
    },

    /// The channel is not streaming (TX submission on an unconfigured channel).
    #[error("channel {0} is not streaming")]
    NotStreaming(u8),

    /// The channel is already streaming.
    #[error("channel {0} is already streaming")]
    AlreadyStreaming(u8),

    /// A network send or receive failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Discovery found zero or more than one candidate where exactly one was
    /// required.
    #[error("device not found or ambiguous: {0}")]
    AmbiguousOrNotFound(String),

    /// An invalid parameter was passed before any I/O took place.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A malformed or unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session has been closed.
    #[error("not connected")]
    NotConnected,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for device");
    }

    #[test]
    fn error_display_rejected() {
        let e = Error::Rejected {
            opcode: 0x05,
            reason: "bad decimation".into(),
        };
        assert_eq!(
            e.to_string(),
            "device rejected command 0x05: bad decimation"
        );
    }

    #[test]
    fn error_display_frequency_out_of_range() {
        let e = Error::FrequencyOutOfRange {
            requested: 7.0e9,
            min: 50.0e6,
            max: 2.2e9,
        };
        assert_eq!(
            e.to_string(),
            "frequency 7000000000 Hz out of range (50000000 Hz to 2200000000 Hz)"
        );
    }

    #[test]
    fn error_display_streaming_state() {
        assert_eq!(
            Error::NotStreaming(3).to_string(),
            "channel 3 is not streaming"
        );
        assert_eq!(
            Error::AlreadyStreaming(0).to_string(),
            "channel 0 is already streaming"
        );
    }

    #[test]
    fn error_display_ambiguous() {
        let e = Error::AmbiguousOrNotFound("2 devices found".into());
        assert_eq!(e.to_string(), "device not found or ambiguous: 2 devices found");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("refused"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
