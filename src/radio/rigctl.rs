//! Hamlib backend for radios without a native driver.
//!
//! Each call runs the `rigctl` command, which opens the port, does one thing
//! and closes it again, so the port is free between probes.

use std::process::Command;

use super::{RadioError, Rig};

pub struct RigctlRig {
    binary: String,
    model: u32,
    port: String,
    speed: u32,
}

impl RigctlRig {
    pub fn new(binary: &str, model: u32, port: &str, speed: u32) -> Self {
        Self {
            binary: binary.to_string(),
            model,
            port: port.to_string(),
            speed,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, RadioError> {
        let output = Command::new(&self.binary)
            .args(["-m", &self.model.to_string()])
            .args(["-r", &self.port])
            .args(["-s", &self.speed.to_string()])
            .args(args)
            .output()
            .map_err(|e| RadioError::Rigctl(format!("failed to execute {}: {}", self.binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RadioError::Rigctl(format!(
                "{} {:?} exited with {}: {}",
                self.binary,
                args,
                output.status,
                stderr.trim()
            )));
        }
        // rigctl reports some failures in-band
        if let Some(line) = stdout.lines().find(|l| l.starts_with("RPRT -")) {
            return Err(RadioError::Rigctl(format!("{} {:?}: {}", self.binary, args, line)));
        }

        Ok(stdout)
    }
}

impl Rig for RigctlRig {
    fn backend(&self) -> &'static str {
        "rigctl"
    }

    fn open(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_frequency(&mut self, hz: u64) -> Result<(), RadioError> {
        tracing::info!("rigctl: tuning to {} Hz", hz);
        self.run(&["F", &hz.to_string()])?;
        Ok(())
    }

    fn get_mode(&mut self) -> Result<String, RadioError> {
        let out = self.run(&["m"])?;
        Ok(out.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_reach_rigctl() {
        // echo prints its arguments, standing in for rigctl
        let mut rig = RigctlRig::new("echo", 1035, "/dev/ttyUSB0", 19200);
        assert_eq!(
            rig.get_mode().unwrap(),
            "-m 1035 -r /dev/ttyUSB0 -s 19200 m"
        );
        assert!(rig.set_frequency(145_050_000).is_ok());
    }

    #[test]
    fn test_failure_exit() {
        let mut rig = RigctlRig::new("false", 1, "/dev/null", 9600);
        assert!(matches!(rig.set_frequency(145_050_000), Err(RadioError::Rigctl(_))));
    }

    #[test]
    fn test_missing_binary() {
        let mut rig = RigctlRig::new("/nonexistent/rigctl", 1, "/dev/null", 9600);
        assert!(rig.get_mode().is_err());
    }

    #[test]
    fn test_channel_select_unsupported() {
        let mut rig = RigctlRig::new("echo", 1, "/dev/null", 9600);
        assert!(matches!(rig.set_channel(3), Err(RadioError::Unsupported(_))));
    }
}
