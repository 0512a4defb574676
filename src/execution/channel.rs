//! Robot execution channel
//!
//! The controller accepts motion programs as single `movej(...)` lines on
//! its command port and serves newline-delimited JSON state frames on its
//! state port. Both sides are wrapped behind [`RobotLink`] so the execution
//! stack can be driven against a scripted link in tests.

use crate::common::types::JointVector;
use crate::common::{max_abs_diff, to_degrees, to_radians};
use crate::config::RobotProfile;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Tolerance used to decide a target was reached (deg)
pub const DEFAULT_REACH_TOLERANCE_DEG: f64 = 0.5;

/// Errors on the robot channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error on {endpoint}: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed state frame: {0}")]
    Protocol(String),
    #[error("robot did not reach the target within {timeout_s:.1} s")]
    ReachTimeout { timeout_s: f64 },
}

/// One state frame from the controller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotState {
    /// Joint angles (rad)
    pub joints_rad: JointVector,
    /// Supply voltage (V)
    pub voltage: f64,
    /// Per-joint motor current (A)
    pub joint_currents: JointVector,
    /// Per-joint speed (rad/s)
    pub joint_speeds_rad_s: JointVector,
}

impl RobotState {
    /// Joint angles in degrees
    pub fn joints_deg(&self) -> JointVector {
        to_degrees(&self.joints_rad)
    }
}

/// The channel to a robot controller
pub trait RobotLink: Send + Sync {
    /// Send one motion program line
    fn send_program(&self, line: &str) -> Result<(), ChannelError>;

    /// Sample the current controller state
    fn sample_state(&self) -> Result<RobotState, ChannelError>;

    /// Whether the controller answers on the command port
    fn is_reachable(&self) -> bool;

    /// Name of this link for log output
    fn name(&self) -> &str;
}

/// Format a `movej` program line. Angles go out in radians; `accel` and
/// `velocity` are absolute rad/s^2 and rad/s.
pub fn format_movej(q_deg: &JointVector, accel: f64, velocity: f64) -> String {
    let q_rad = to_radians(q_deg);
    let joints = q_rad
        .iter()
        .map(|angle| format!("{angle:.6}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("movej([{joints}], a={accel:.4}, v={velocity:.4})")
}

/// Poll the link until every joint is within `tolerance_deg` of the target.
pub fn wait_until_reached(
    link: &dyn RobotLink,
    target_deg: &JointVector,
    tolerance_deg: f64,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<(), ChannelError> {
    let started = Instant::now();
    loop {
        let state = link.sample_state()?;
        if max_abs_diff(&state.joints_deg(), target_deg) < tolerance_deg {
            return Ok(());
        }
        if started.elapsed() > timeout {
            return Err(ChannelError::ReachTimeout {
                timeout_s: timeout.as_secs_f64(),
            });
        }
        std::thread::sleep(poll_interval);
    }
}

/// TCP link to the robot controller
pub struct TcpRobotLink {
    address: String,
    command_port: u16,
    state_port: u16,
    connect_timeout: Duration,
}

impl TcpRobotLink {
    pub fn new(address: impl Into<String>, command_port: u16, state_port: u16) -> Self {
        TcpRobotLink {
            address: address.into(),
            command_port,
            state_port,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Link to the endpoints named in a robot profile
    pub fn from_profile(profile: &RobotProfile) -> Self {
        Self::new(
            profile.address.clone(),
            profile.command_port,
            profile.state_port,
        )
    }

    fn endpoint(&self, port: u16) -> String {
        format!("{}:{}", self.address, port)
    }

    fn connect(&self, port: u16) -> Result<TcpStream, ChannelError> {
        let endpoint = self.endpoint(port);
        let mut addrs = endpoint
            .to_socket_addrs()
            .map_err(|source| ChannelError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;
        let addr = addrs.next().ok_or_else(|| ChannelError::Connect {
            endpoint: endpoint.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
        })?;
        TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|source| ChannelError::Connect { endpoint, source })
    }
}

impl RobotLink for TcpRobotLink {
    /// One fresh connection per program line, the way the controller
    /// expects script snippets
    fn send_program(&self, line: &str) -> Result<(), ChannelError> {
        let mut stream = self.connect(self.command_port)?;
        let endpoint = self.endpoint(self.command_port);
        stream
            .write_all(line.as_bytes())
            .and_then(|_| stream.write_all(b"\n"))
            .map_err(|source| ChannelError::Io { endpoint, source })
    }

    fn sample_state(&self) -> Result<RobotState, ChannelError> {
        let stream = self.connect(self.state_port)?;
        let endpoint = self.endpoint(self.state_port);
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|source| ChannelError::Io { endpoint, source })?;
        serde_json::from_str(line.trim())
            .map_err(|e| ChannelError::Protocol(format!("bad state frame: {e}")))
    }

    fn is_reachable(&self) -> bool {
        self.connect(self.command_port).is_ok()
    }

    fn name(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted link: replays a fixed sequence of state frames, holding the
    /// last one once the script runs out, and records every program sent.
    pub struct MockLink {
        states: Mutex<VecDeque<RobotState>>,
        last: Mutex<Option<RobotState>>,
        pub programs: Mutex<Vec<String>>,
    }

    impl MockLink {
        pub fn with_states(states: Vec<RobotState>) -> Self {
            MockLink {
                states: Mutex::new(states.into()),
                last: Mutex::new(None),
                programs: Mutex::new(Vec::new()),
            }
        }

        pub fn at_rest(joints_deg: JointVector) -> RobotState {
            RobotState {
                joints_rad: to_radians(&joints_deg),
                voltage: 48.0,
                joint_currents: [1.0; 6],
                joint_speeds_rad_s: [0.0; 6],
            }
        }
    }

    impl RobotLink for MockLink {
        fn send_program(&self, line: &str) -> Result<(), ChannelError> {
            self.programs.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn sample_state(&self) -> Result<RobotState, ChannelError> {
            let mut states = self.states.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(state) = states.pop_front() {
                *last = Some(state.clone());
                return Ok(state);
            }
            last.clone()
                .ok_or_else(|| ChannelError::Protocol("no scripted state".to_string()))
        }

        fn is_reachable(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "mock"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock::MockLink;

    #[test]
    fn movej_line_carries_radians_and_limits() {
        let mut q = [0.0; 6];
        q[1] = 90.0;
        let line = format_movej(&q, 1.3963, 2.0944);
        assert_eq!(
            line,
            "movej([0.000000,1.570796,0.000000,0.000000,0.000000,0.000000], a=1.3963, v=2.0944)"
        );
    }

    #[test]
    fn state_frame_round_trips_as_json() {
        let state = MockLink::at_rest([0.0, -90.0, 45.0, 0.0, 90.0, 0.0]);
        let text = serde_json::to_string(&state).unwrap();
        let back: RobotState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn wait_returns_once_within_tolerance() {
        let target = {
            let mut q = [0.0; 6];
            q[0] = 10.0;
            q
        };
        let approach = vec![
            MockLink::at_rest([0.0; 6]),
            MockLink::at_rest([5.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            MockLink::at_rest([9.8, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ];
        let link = MockLink::with_states(approach);
        wait_until_reached(
            &link,
            &target,
            DEFAULT_REACH_TOLERANCE_DEG,
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .unwrap();
    }

    #[test]
    fn wait_times_out_when_the_robot_stalls() {
        let target = {
            let mut q = [0.0; 6];
            q[0] = 10.0;
            q
        };
        let link = MockLink::with_states(vec![MockLink::at_rest([0.0; 6])]);
        let result = wait_until_reached(
            &link,
            &target,
            DEFAULT_REACH_TOLERANCE_DEG,
            Duration::from_millis(1),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(ChannelError::ReachTimeout { .. })));
    }
}
