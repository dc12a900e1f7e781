//! Control-channel stress test.
//!
//! Walks every node repeatedly, tuning and reading back the mode, to shake
//! out a flaky serial link without putting anything on the air.

use std::thread;
use std::time::Duration;

use serde::Serialize;

use super::{tune, Rig};
use crate::config::Node;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExerciseReport {
    pub passes: u32,
    pub commands: u32,
    pub failures: u32,
    /// Transient faults the driver absorbed.
    pub retries: u64,
}

pub fn exercise(
    rig: &mut dyn Rig,
    nodes: &[Node],
    passes: u32,
    between_commands: Duration,
    between_passes: Duration,
) -> ExerciseReport {
    let mut report = ExerciseReport::default();

    for pass in 0..passes {
        for node in nodes {
            report.commands += 1;
            if let Err(e) = tune(rig, node) {
                report.failures += 1;
                tracing::error!("Tune to {} ({}) failed: {}", node.name, node.describe_tuning(), e);
            }

            report.commands += 1;
            match rig.get_mode() {
                Ok(mode) => tracing::debug!("Mode after tuning {}: {}", node.name, mode),
                Err(e) => {
                    report.failures += 1;
                    tracing::error!("Mode query after tuning {} failed: {}", node.name, e);
                }
            }

            thread::sleep(between_commands);
        }

        report.passes += 1;
        tracing::info!("End of radio test pass {}", pass + 1);
        if pass + 1 < passes {
            thread::sleep(between_passes);
        }
    }

    report.retries = rig.retries();
    report
}
