//! Execution logging
//!
//! When logging is enabled before a run, a sampler thread records voltage,
//! per-joint current and per-joint speed for the duration of that run. The
//! finished session is persisted as a CSV file and can be reduced to an
//! energy summary.

use crate::common::types::{JointVector, JOINT_COUNT};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::channel::{RobotLink, RobotState};

/// One sampled row of a log session
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Time since the session started (s)
    pub elapsed_s: f64,
    /// Supply voltage (V)
    pub voltage: f64,
    /// Per-joint motor current (A)
    pub joint_currents: JointVector,
    /// Per-joint speed (rad/s)
    pub joint_speeds_rad_s: JointVector,
}

/// Aggregates of a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct EnergySummary {
    /// Total electrical energy over the run (J)
    pub total_energy_j: f64,
    /// Largest instantaneous power draw (W)
    pub peak_power_w: f64,
    /// Time covered by the samples (s)
    pub duration_s: f64,
    /// Number of samples
    pub samples: usize,
}

/// A sampler running alongside one execution
pub struct ActiveLogSession {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Vec<LogRecord>>,
}

impl ActiveLogSession {
    /// Start sampling `link` every `period` until stopped. The session
    /// opens with one synchronous baseline sample, so even a run shorter
    /// than the period is logged.
    pub fn begin(link: Arc<dyn RobotLink>, period: Duration) -> Self {
        let started = Instant::now();
        let mut records = Vec::new();
        if let Ok(state) = link.sample_state() {
            records.push(Self::record(&started, state));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                std::thread::sleep(period);
                // a failed sample is skipped, not fatal to the run
                if let Ok(state) = link.sample_state() {
                    records.push(Self::record(&started, state));
                }
            }
            records
        });
        ActiveLogSession { stop, handle }
    }

    fn record(started: &Instant, state: RobotState) -> LogRecord {
        LogRecord {
            elapsed_s: started.elapsed().as_secs_f64(),
            voltage: state.voltage,
            joint_currents: state.joint_currents,
            joint_speeds_rad_s: state.joint_speeds_rad_s,
        }
    }

    /// Stop the sampler and collect the finished session
    pub fn finish(self) -> LogSession {
        self.stop.store(true, Ordering::Relaxed);
        let records = self.handle.join().unwrap_or_default();
        LogSession { records }
    }
}

/// A finished log session
#[derive(Debug, Clone, PartialEq)]
pub struct LogSession {
    records: Vec<LogRecord>,
}

impl LogSession {
    /// Session from already collected records
    pub fn from_records(records: Vec<LogRecord>) -> Self {
        LogSession { records }
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the session to `directory` as `{prefix}_{unix_seconds}.csv`
    /// and return the file path.
    pub fn write_csv(&self, directory: &Path, prefix: &str) -> std::io::Result<PathBuf> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = directory.join(format!("{prefix}_{stamp}.csv"));
        let mut file = std::fs::File::create(&path)?;

        let mut header = String::from("timestamp,voltage");
        for j in 1..=JOINT_COUNT {
            header.push_str(&format!(",current_{j}"));
        }
        for j in 1..=JOINT_COUNT {
            header.push_str(&format!(",speed_{j}"));
        }
        writeln!(file, "{header}")?;

        for record in &self.records {
            let mut row = format!("{:.3},{:.3}", record.elapsed_s, record.voltage);
            for current in &record.joint_currents {
                row.push_str(&format!(",{current:.4}"));
            }
            for speed in &record.joint_speeds_rad_s {
                row.push_str(&format!(",{speed:.4}"));
            }
            writeln!(file, "{row}")?;
        }
        log::info!("wrote {} log rows to {}", self.records.len(), path.display());
        Ok(path)
    }

    /// Integrate power over the session.
    ///
    /// Instantaneous power is voltage times the mean joint current; each
    /// sample contributes power times the interval since the previous one.
    pub fn energy_summary(&self) -> EnergySummary {
        let mut total_energy_j = 0.0;
        let mut peak_power_w: f64 = 0.0;
        let mut previous_elapsed = None;
        for record in &self.records {
            let mean_current =
                record.joint_currents.iter().sum::<f64>() / JOINT_COUNT as f64;
            let power = record.voltage * mean_current;
            peak_power_w = peak_power_w.max(power);
            if let Some(previous) = previous_elapsed {
                total_energy_j += power * (record.elapsed_s - previous);
            }
            previous_elapsed = Some(record.elapsed_s);
        }
        EnergySummary {
            total_energy_j,
            peak_power_w,
            duration_s: self
                .records
                .last()
                .map(|r| r.elapsed_s)
                .unwrap_or(0.0),
            samples: self.records.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::channel::mock::MockLink;
    use approx::assert_relative_eq;

    fn record(elapsed_s: f64, voltage: f64, current: f64) -> LogRecord {
        LogRecord {
            elapsed_s,
            voltage,
            joint_currents: [current; JOINT_COUNT],
            joint_speeds_rad_s: [0.0; JOINT_COUNT],
        }
    }

    #[test]
    fn energy_integrates_power_over_time() {
        let session = LogSession::from_records(vec![
            record(0.0, 48.0, 1.0),
            record(1.0, 48.0, 1.0),
            record(3.0, 48.0, 0.5),
        ]);
        let summary = session.energy_summary();
        // 48 W for the first second, then 24 W for two seconds
        assert_relative_eq!(summary.total_energy_j, 48.0 + 48.0, epsilon = 1e-9);
        assert_relative_eq!(summary.peak_power_w, 48.0);
        assert_relative_eq!(summary.duration_s, 3.0);
        assert_eq!(summary.samples, 3);
    }

    #[test]
    fn empty_session_has_zero_energy() {
        let summary = LogSession::from_records(Vec::new()).energy_summary();
        assert_relative_eq!(summary.total_energy_j, 0.0);
        assert_eq!(summary.samples, 0);
    }

    #[test]
    fn csv_has_a_header_and_one_row_per_record() {
        let session = LogSession::from_records(vec![
            record(0.0, 48.0, 1.0),
            record(0.5, 48.1, 1.1),
        ]);
        let path = session
            .write_csv(&std::env::temp_dir(), "logsession_test")
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,voltage,current_1"));
        assert!(lines[1].starts_with("0.000,48.000"));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn sampler_collects_states_until_finished() {
        let link = Arc::new(MockLink::with_states(vec![MockLink::at_rest([0.0; 6])]));
        let active = ActiveLogSession::begin(link, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        let session = active.finish();
        assert!(!session.is_empty());
        assert_relative_eq!(session.records()[0].voltage, 48.0);
    }
}
