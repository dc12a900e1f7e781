//! Radio control.
//!
//! Two backends sit behind the [`Rig`] trait: the native CCDI/CCR serial
//! driver and a Hamlib `rigctl` wrapper for everything else. The backend is
//! chosen once, in [`build_rig`]; nothing downstream knows which one it got.

mod exercise;
mod frame;
mod link;
mod mode;
mod rigctl;
mod tait;

pub use exercise::*;
pub use frame::{checksum, decode, encode, Frame, FrameError, TERMINATOR};
pub use link::{PortLink, SerialLink};
pub use mode::*;
pub use rigctl::*;
pub use tait::*;

#[cfg(test)]
pub use fake::FakeRig;
#[cfg(test)]
pub use link::scripted::ScriptedLink;

use std::io;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::{Node, RigConfig, RigModel};

/// Radio error types.
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("radio failed to respond after {attempts} attempts")]
    NoResponse { attempts: u32 },
    #[error("unknown response to status query: {response:?}")]
    UnknownMode { response: String },
    #[error("radio returned an invalid response when entering CCR: {response:?}")]
    ModeTransition { response: String },
    #[error("radio reverted to CCDI while CCR was expected: {response:?}")]
    UnexpectedMode { response: String },
    #[error("radio rejected {command}: {response:?}")]
    Command {
        command: &'static str,
        response: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error("rigctl error: {0}")]
    Rigctl(String),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("radio handle poisoned by an earlier panic")]
    Poisoned,
}

/// What the canary needs from a radio.
///
/// Calls block; async callers go through `spawn_blocking`.
pub trait Rig: Send {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Acquire the control port for a burst of commands.
    fn open(&mut self) -> Result<(), RadioError>;

    /// Release the control port so another process may use it.
    fn close(&mut self) -> Result<(), RadioError>;

    /// Simplex tune to `hz`.
    fn set_frequency(&mut self, hz: u64) -> Result<(), RadioError>;

    /// Human-readable operating mode.
    fn get_mode(&mut self) -> Result<String, RadioError>;

    /// Select a preprogrammed channel.
    fn set_channel(&mut self, _channel: u16) -> Result<(), RadioError> {
        Err(RadioError::Unsupported("channel select"))
    }

    /// Transient control-channel faults absorbed so far.
    fn retries(&self) -> u64 {
        0
    }
}

/// The one radio handle, shared between the scheduler and blocking tasks.
pub type SharedRig = Arc<Mutex<Box<dyn Rig>>>;

pub fn share(rig: Box<dyn Rig>) -> SharedRig {
    Arc::new(Mutex::new(rig))
}

/// Construct the configured backend.
pub fn build_rig(cfg: &RigConfig) -> Result<Box<dyn Rig>, RadioError> {
    match cfg.model {
        RigModel::Tait => {
            tracing::info!("Using native Tait driver on {}", cfg.port);
            Ok(Box::new(TaitRadio::open(&cfg.port, cfg.speed)?))
        }
        RigModel::Hamlib(model) => {
            tracing::info!("Using rigctl model {} on {}", model, cfg.port);
            Ok(Box::new(RigctlRig::new(
                &cfg.rigctl_bin,
                model,
                &cfg.port,
                cfg.speed,
            )))
        }
    }
}

/// Put the radio on `node`'s channel or frequency, holding the port only
/// for the duration.
pub fn tune(rig: &mut dyn Rig, node: &Node) -> Result<(), RadioError> {
    rig.open()?;
    let tuned = match node.channel {
        Some(channel) => rig.set_channel(channel),
        None => rig.set_frequency(node.frequency_hz()),
    };
    let closed = rig.close();
    tuned.and(closed)
}
