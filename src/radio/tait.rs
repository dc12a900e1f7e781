//! Native driver for Tait radios over the CCDI/CCR serial protocol.
//!
//! The control channel on some units drops or mangles commands, so every
//! command goes through [`TaitRadio::send_command`], which drains stray
//! input, retries on silence, and bails out immediately if the radio has
//! fallen back into CCDI behind our back.

use std::thread;
use std::time::Duration;

use super::frame;
use super::link::{PortLink, SerialLink};
use super::mode::{
    classify_status, ModeEvent, RadioMode, CCDI_STATUS_PREFIX, POSITIVE_ACK,
};
use super::{RadioError, Rig};

/// Command letters.
mod cmd {
    pub const GO_TO_CHANNEL: char = 'g';
    pub const QUERY: char = 'q';
    pub const MODE_SWITCH: char = 'f';
    pub const RX_FREQUENCY: char = 'R';
    pub const TX_FREQUENCY: char = 'T';
    pub const BANDWIDTH: char = 'H';
    pub const POWER: char = 'P';
    pub const TX_TONE: char = 'B';
    pub const RX_TONE: char = 'A';
    pub const PULSE: char = 'Q';
}

/// Reset is sent bare, without length or checksum.
const RESET: &[u8] = b"^\r";
const CCR_ENTRY_ARG: &str = "00";
/// Exact echo of a successful CCR entry.
const CCR_ENTRY_ECHO: &[u8] = b".M01R00\r";

const MAX_CHANNEL: u16 = 999;
const MIN_TONE_HZ: f64 = 67.0;
const MAX_TONE_HZ: f64 = 254.1;

/// Power used for simplex tuning.
const TUNE_POWER: PowerLevel = PowerLevel::Low;

/// Retry and settle timing.
#[derive(Debug, Clone)]
pub struct TaitTimings {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// How long a reset takes to come back.
    pub reset_settle: Duration,
}

impl Default for TaitTimings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_millis(500),
            reset_settle: Duration::from_secs(5),
        }
    }
}

/// Receive bandwidth in CCR mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Narrow = 1,
    Medium = 2,
    Wide = 3,
}

/// Transmit power in CCR mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerLevel {
    VeryLow = 1,
    Low = 2,
    Medium = 3,
    High = 4,
}

pub struct TaitRadio<L: SerialLink = PortLink> {
    link: L,
    mode: RadioMode,
    retries: u64,
    timings: TaitTimings,
}

impl TaitRadio<PortLink> {
    /// Open the radio on a serial port.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, RadioError> {
        Ok(Self::with_link(
            PortLink::open(path, baud_rate)?,
            TaitTimings::default(),
        ))
    }
}

impl<L: SerialLink> TaitRadio<L> {
    pub fn with_link(link: L, timings: TaitTimings) -> Self {
        Self {
            link,
            mode: RadioMode::Unknown,
            retries: 0,
            timings,
        }
    }

    /// Cached mode, without touching the device.
    pub fn cached_mode(&self) -> RadioMode {
        self.mode
    }

    pub fn retry_count(&self) -> u64 {
        self.retries
    }

    fn apply(&mut self, event: ModeEvent) {
        let next = self.mode.on(event);
        if next != self.mode {
            tracing::debug!("Radio mode {} -> {} ({:?})", self.mode, next, event);
        }
        self.mode = next;
    }

    /// Current mode, querying the radio only if the cache is empty.
    pub fn current_mode(&mut self) -> Result<RadioMode, RadioError> {
        if self.mode.is_known() {
            return Ok(self.mode);
        }
        self.query_mode()
    }

    /// Ask the radio which mode it is in.
    pub fn query_mode(&mut self) -> Result<RadioMode, RadioError> {
        self.link.clear_input()?;
        let observed = self
            .send_command(cmd::QUERY, "")
            .and_then(|reply| classify_status(&reply));

        match observed {
            Ok(mode) => {
                self.apply(ModeEvent::Observed(mode));
                Ok(mode)
            }
            Err(e) => {
                self.apply(ModeEvent::QueryFailed);
                Err(e)
            }
        }
    }

    /// Switch from CCDI to CCR. No-op if already there.
    pub fn enter_ccr_mode(&mut self) -> Result<(), RadioError> {
        if self.current_mode()? == RadioMode::Ccr {
            return Ok(());
        }

        tracing::debug!("Entering CCR mode");
        self.link.clear_input()?;
        self.link
            .write_frame(&frame::encode(cmd::MODE_SWITCH, CCR_ENTRY_ARG))?;
        let reply = self.link.read_reply()?;
        if reply != CCR_ENTRY_ECHO {
            self.apply(ModeEvent::Invalidate);
            return Err(RadioError::ModeTransition {
                response: lossy(&reply),
            });
        }

        self.apply(ModeEvent::EnteredCcr);
        Ok(())
    }

    /// Return to CCDI by resetting the radio. No-op if already in CCDI: a
    /// reset reboots the radio and drops whatever channel it was on.
    pub fn enter_ccdi_mode(&mut self) -> Result<(), RadioError> {
        if self.current_mode()? == RadioMode::Ccdi {
            return Ok(());
        }

        tracing::debug!("Resetting radio into CCDI mode");
        self.link.write_frame(RESET)?;
        thread::sleep(self.timings.reset_settle);
        self.apply(ModeEvent::ResetIssued);
        Ok(())
    }

    /// Frame and send one command, retrying until a usable reply arrives.
    pub fn send_command(&mut self, cmd: char, arg: &str) -> Result<Vec<u8>, RadioError> {
        let frame = frame::encode(cmd, arg);

        for attempt in 0..self.timings.max_attempts {
            let pending = self.link.bytes_pending()?;
            if pending > 0 {
                let junk = self.link.read_pending(pending)?;
                tracing::debug!("Discarding {} stray bytes: {:?}", pending, lossy(&junk));
            }

            tracing::debug!("Sending {:?}", lossy(&frame));
            self.link.write_frame(&frame)?;
            let reply = self.link.read_reply()?;

            let in_ccr = self.mode == RadioMode::Ccr;
            if !reply.is_empty() && (!in_ccr || reply.first() == Some(&POSITIVE_ACK)) {
                if attempt > 0 {
                    tracing::debug!("Command {} succeeded after {} retries", cmd, attempt);
                }
                tracing::debug!("Reply {:?}", lossy(&reply));
                return Ok(reply);
            }

            if in_ccr && reply.starts_with(CCDI_STATUS_PREFIX) {
                let drained = self.link.read_reply()?;
                tracing::debug!("Drained {:?} after unsolicited CCDI status", lossy(&drained));
                self.apply(ModeEvent::RevertedToCcdi);
                return Err(RadioError::UnexpectedMode {
                    response: lossy(&reply),
                });
            }

            tracing::debug!("Bad reply {:?} to {}, retrying", lossy(&reply), cmd);
            self.retries += 1;
            self.link.clear_input()?;
            thread::sleep(self.timings.retry_delay);
        }

        Err(RadioError::NoResponse {
            attempts: self.timings.max_attempts,
        })
    }

    fn expect_ack(&mut self, command: &'static str, cmd: char, arg: &str) -> Result<(), RadioError> {
        let reply = self.send_command(cmd, arg)?;
        if reply.first() != Some(&POSITIVE_ACK) {
            return Err(RadioError::Command {
                command,
                response: lossy(&reply),
            });
        }
        Ok(())
    }

    pub fn set_rx_frequency(&mut self, hz: u64) -> Result<(), RadioError> {
        let arg = frequency_arg(hz)?;
        tracing::info!("Tuning RX to {} Hz", hz);
        self.enter_ccr_mode()?;
        self.expect_ack("set RX frequency", cmd::RX_FREQUENCY, &arg)
    }

    pub fn set_tx_frequency(&mut self, hz: u64) -> Result<(), RadioError> {
        let arg = frequency_arg(hz)?;
        tracing::info!("Tuning TX to {} Hz", hz);
        self.enter_ccr_mode()?;
        self.expect_ack("set TX frequency", cmd::TX_FREQUENCY, &arg)
    }

    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), RadioError> {
        tracing::info!("Setting bandwidth to {:?}", bandwidth);
        self.enter_ccr_mode()?;
        self.expect_ack("set bandwidth", cmd::BANDWIDTH, &(bandwidth as u8).to_string())
    }

    pub fn set_power_level(&mut self, power: PowerLevel) -> Result<(), RadioError> {
        tracing::info!("Setting power level to {:?}", power);
        self.enter_ccr_mode()?;
        self.expect_ack("set power level", cmd::POWER, &(power as u8).to_string())
    }

    /// Transmit CTCSS tone in Hz; 0 disables.
    pub fn set_tx_tone(&mut self, hz: f64) -> Result<(), RadioError> {
        let arg = tone_arg(hz)?;
        self.enter_ccr_mode()?;
        self.expect_ack("set TX tone", cmd::TX_TONE, &arg)
    }

    /// Receive CTCSS tone in Hz; 0 disables. A set tone mutes audio unless
    /// the tone is present.
    pub fn set_rx_tone(&mut self, hz: f64) -> Result<(), RadioError> {
        let arg = tone_arg(hz)?;
        self.enter_ccr_mode()?;
        self.expect_ack("set RX tone", cmd::RX_TONE, &arg)
    }

    /// Pulse query: the radio acks with whether it has left its startup
    /// configuration.
    pub fn query_pulse(&mut self) -> Result<Vec<u8>, RadioError> {
        self.enter_ccr_mode()?;
        let reply = self.send_command(cmd::PULSE, "P")?;
        if reply.first() != Some(&POSITIVE_ACK) {
            return Err(RadioError::Command {
                command: "pulse query",
                response: lossy(&reply),
            });
        }
        Ok(reply)
    }

    /// Simplex tune: same RX and TX frequency at conservative power.
    pub fn tune_radio(&mut self, hz: u64) -> Result<(), RadioError> {
        frequency_arg(hz)?;
        self.apply(ModeEvent::Invalidate);
        self.set_rx_frequency(hz)?;
        self.set_tx_frequency(hz)?;
        self.set_power_level(TUNE_POWER)
    }

    /// Go to a preprogrammed channel (CCDI only).
    ///
    /// Any reply longer than the bare ack is a device error; its payload is
    /// passed up raw.
    pub fn set_channel(&mut self, channel: u16) -> Result<(), RadioError> {
        if channel > MAX_CHANNEL {
            return Err(RadioError::InvalidArgument(format!(
                "channel {} out of range 0-{}",
                channel, MAX_CHANNEL
            )));
        }

        self.enter_ccdi_mode()?;
        let reply = self.send_command(cmd::GO_TO_CHANNEL, &channel.to_string())?;
        let body = reply.strip_suffix(&[frame::TERMINATOR]).unwrap_or(&reply);
        if body.len() > 1 {
            return Err(RadioError::Command {
                command: "go to channel",
                response: lossy(&reply),
            });
        }

        tracing::info!("Changed to channel {}", channel);
        Ok(())
    }
}

impl<L: SerialLink> Rig for TaitRadio<L> {
    fn backend(&self) -> &'static str {
        "tait"
    }

    // The port stays open for the life of the driver.
    fn open(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_frequency(&mut self, hz: u64) -> Result<(), RadioError> {
        self.tune_radio(hz)
    }

    fn get_mode(&mut self) -> Result<String, RadioError> {
        Ok(self.current_mode()?.to_string())
    }

    fn set_channel(&mut self, channel: u16) -> Result<(), RadioError> {
        TaitRadio::set_channel(self, channel)
    }

    fn retries(&self) -> u64 {
        self.retries
    }
}

/// Frequencies go out as 8 or 9 decimal digits of Hz.
fn frequency_arg(hz: u64) -> Result<String, RadioError> {
    let arg = hz.to_string();
    if !(8..=9).contains(&arg.len()) {
        return Err(RadioError::InvalidArgument(format!(
            "frequency {} Hz must be 8 or 9 digits",
            hz
        )));
    }
    Ok(arg)
}

/// Tones go out as four digits of tenths of a Hz.
fn tone_arg(hz: f64) -> Result<String, RadioError> {
    if hz == 0.0 {
        return Ok("0000".to_string());
    }
    if !(MIN_TONE_HZ..=MAX_TONE_HZ).contains(&hz) {
        return Err(RadioError::InvalidArgument(format!(
            "CTCSS tone {} Hz outside {}-{} Hz",
            hz, MIN_TONE_HZ, MAX_TONE_HZ
        )));
    }
    Ok(format!("{:04}", (hz * 10.0).round() as u32))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
