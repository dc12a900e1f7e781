//! Operating mode tracking for the native driver.
//!
//! The radio boots into CCDI. Entering CCR is an explicit command; leaving it
//! requires a reset. The driver never trusts a stale belief: anything that
//! might have moved the radio drops the cached mode back to `Unknown`, and the
//! next operation re-queries the device.

use serde::Serialize;
use std::fmt;

use super::RadioError;

/// Prefix of a CCDI status-query reply.
pub const CCDI_STATUS_PREFIX: &[u8] = b".m08";
/// A CCR radio answers the CCDI status query with a negative ack.
pub const NEGATIVE_ACK: u8 = b'-';
/// Positive acknowledgment in CCR mode.
pub const POSITIVE_ACK: u8 = b'+';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RadioMode {
    /// Computer-controlled data interface: preprogrammed channels.
    Ccdi,
    /// Computer-controlled radio: direct VFO control.
    Ccr,
    /// Must be re-queried before use.
    Unknown,
}

/// Things that change what the driver may believe about the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// A status query was answered and classified.
    Observed(RadioMode),
    /// The CCR entry command was echoed correctly.
    EnteredCcr,
    /// A reset was sent; the radio is rebooting.
    ResetIssued,
    /// A query failed or could not be parsed.
    QueryFailed,
    /// A CCDI status line arrived while CCR was expected.
    RevertedToCcdi,
    /// Caller asked for a fresh look at the device.
    Invalidate,
}

impl RadioMode {
    pub fn is_known(self) -> bool {
        self != RadioMode::Unknown
    }

    /// The transition table. Everything except a confirmed observation or a
    /// confirmed CCR entry lands in `Unknown`.
    pub fn on(self, event: ModeEvent) -> RadioMode {
        match event {
            ModeEvent::Observed(mode) => mode,
            ModeEvent::EnteredCcr => RadioMode::Ccr,
            ModeEvent::ResetIssued
            | ModeEvent::QueryFailed
            | ModeEvent::RevertedToCcdi
            | ModeEvent::Invalidate => RadioMode::Unknown,
        }
    }
}

impl fmt::Display for RadioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RadioMode::Ccdi => "CCDI",
            RadioMode::Ccr => "CCR",
            RadioMode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Classify a raw reply to the status query.
pub fn classify_status(response: &[u8]) -> Result<RadioMode, RadioError> {
    if response.first() == Some(&NEGATIVE_ACK) {
        Ok(RadioMode::Ccr)
    } else if response.starts_with(CCDI_STATUS_PREFIX) {
        Ok(RadioMode::Ccdi)
    } else {
        Err(RadioError::UnknownMode {
            response: String::from_utf8_lossy(response).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(b"-\r").unwrap(), RadioMode::Ccr);
        assert_eq!(classify_status(b".m0812345678\r").unwrap(), RadioMode::Ccdi);
        assert!(matches!(
            classify_status(b"?\r"),
            Err(RadioError::UnknownMode { .. })
        ));
        assert!(classify_status(b"").is_err());
    }

    #[test]
    fn test_transitions() {
        let all = [RadioMode::Ccdi, RadioMode::Ccr, RadioMode::Unknown];
        for mode in all {
            assert_eq!(mode.on(ModeEvent::EnteredCcr), RadioMode::Ccr);
            assert_eq!(mode.on(ModeEvent::ResetIssued), RadioMode::Unknown);
            assert_eq!(mode.on(ModeEvent::QueryFailed), RadioMode::Unknown);
            assert_eq!(mode.on(ModeEvent::RevertedToCcdi), RadioMode::Unknown);
            assert_eq!(mode.on(ModeEvent::Invalidate), RadioMode::Unknown);
            for observed in all {
                assert_eq!(mode.on(ModeEvent::Observed(observed)), observed);
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(RadioMode::Ccdi.to_string(), "CCDI");
        assert!(!RadioMode::Unknown.is_known());
    }
}
