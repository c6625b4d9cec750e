//! Producer process supervision.
//!
//! The consumer owns the ring files and the producer child. It creates the rings,
//! spawns `<program> producer …`, checks liveness once per poll tick and, depending
//! on the [`RestartPolicy`], either respawns a dead producer (bumping the restart
//! counter in the ring header) or reports the failure. Teardown sends SIGTERM,
//! waits for the configured grace period, then force-kills and unlinks the rings.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::MotionConfig;
use crate::error::{AppResult, MotionError};
use crate::hardware::producer::ProducerArgs;
use crate::transport::ring::RingBuffer;

/// What to do when the producer exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Respawn and keep going (detector)
    Restart,
    /// Surface the exit as an error (streaming commands)
    Fail,
}

/// Producer state observed by [`ProducerSupervisor::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerStatus {
    /// Child still running
    Running,
    /// Child had died and was respawned; carries the new restart count
    Restarted(u32),
}

/// Settings for spawning and tearing down the producer.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable that implements the hidden `producer` subcommand
    pub program: PathBuf,
    /// Directory for the ring files
    pub ring_dir: PathBuf,
    /// File name prefix for the ring files
    pub ring_prefix: String,
    /// Slots per ring
    pub capacity: usize,
    /// Whether to create and feed a gyroscope ring
    pub with_gyro: bool,
    /// Decimation factor applied by the producer
    pub decimate: u32,
    /// Sensor source selector
    pub source: String,
    /// Native sensor rate in Hz
    pub native_rate_hz: f64,
    /// Seed for simulated sources
    pub seed: u64,
    /// Grace period between SIGTERM and SIGKILL
    pub shutdown_timeout: Duration,
    /// Reaction to an unexpected producer exit
    pub policy: RestartPolicy,
}

impl SupervisorConfig {
    /// Build supervisor settings from the loaded configuration.
    pub fn from_config(
        config: &MotionConfig,
        program: PathBuf,
        decimate: u32,
        with_gyro: bool,
        policy: RestartPolicy,
    ) -> Self {
        Self {
            program,
            ring_dir: config.transport.ring_dir.clone(),
            ring_prefix: format!("motion_daq_{}", std::process::id()),
            capacity: config.transport.capacity,
            with_gyro,
            decimate,
            source: config.sampling.source.clone(),
            native_rate_hz: config.sampling.native_rate_hz,
            seed: config.sampling.mock_seed,
            shutdown_timeout: Duration::from_millis(config.transport.shutdown_timeout_ms),
            policy,
        }
    }

    fn ring_path(&self, channel: &str) -> PathBuf {
        self.ring_dir
            .join(format!("{}_{}.ring", self.ring_prefix, channel))
    }
}

/// Owns the rings and the producer child for one consumer.
#[derive(Debug)]
pub struct ProducerSupervisor {
    config: SupervisorConfig,
    accel: RingBuffer,
    gyro: Option<RingBuffer>,
    child: Option<Child>,
    restart_count: u32,
}

impl ProducerSupervisor {
    /// Create fresh rings and spawn the first producer.
    pub fn start(config: SupervisorConfig) -> AppResult<Self> {
        let accel = RingBuffer::create(&config.ring_path("accel"), config.capacity)?;
        let gyro = if config.with_gyro {
            match RingBuffer::create(&config.ring_path("gyro"), config.capacity) {
                Ok(ring) => Some(ring),
                Err(err) => {
                    let _ = accel.remove();
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let mut supervisor = Self {
            config,
            accel,
            gyro,
            child: None,
            restart_count: 0,
        };
        if let Err(err) = supervisor.spawn() {
            supervisor.unlink_rings();
            return Err(err);
        }
        Ok(supervisor)
    }

    fn producer_args(&self) -> ProducerArgs {
        ProducerArgs {
            accel_ring: self.accel.path().to_path_buf(),
            gyro_ring: self.gyro.as_ref().map(|ring| ring.path().to_path_buf()),
            restart_count: self.restart_count,
            decimate: self.config.decimate,
            source: self.config.source.clone(),
            native_rate: self.config.native_rate_hz,
            seed: self.config.seed,
        }
    }

    fn spawn(&mut self) -> AppResult<()> {
        self.accel.set_restart_count(self.restart_count);
        if let Some(gyro) = &self.gyro {
            gyro.set_restart_count(self.restart_count);
        }

        let child = Command::new(&self.config.program)
            .args(self.producer_args().to_command_line())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MotionError::Transport(format!(
                    "Failed to spawn producer {:?}: {}",
                    self.config.program, e
                ))
            })?;

        info!(
            pid = child.id(),
            restart_count = self.restart_count,
            "Producer spawned"
        );
        self.child = Some(child);
        Ok(())
    }

    /// Poll producer liveness; apply the restart policy if it has exited.
    pub fn check(&mut self) -> AppResult<ProducerStatus> {
        let Some(child) = self.child.as_mut() else {
            return Err(MotionError::ProducerExited("not running".to_string()));
        };

        match child.try_wait()? {
            None => Ok(ProducerStatus::Running),
            Some(status) => {
                self.child = None;
                match self.config.policy {
                    RestartPolicy::Fail => Err(MotionError::ProducerExited(status.to_string())),
                    RestartPolicy::Restart => {
                        self.restart_count += 1;
                        warn!(
                            status = %status,
                            restart_count = self.restart_count,
                            "Producer exited, restarting"
                        );
                        self.spawn()?;
                        Ok(ProducerStatus::Restarted(self.restart_count))
                    }
                }
            }
        }
    }

    /// Accelerometer ring.
    pub fn accel(&self) -> &RingBuffer {
        &self.accel
    }

    /// Gyroscope ring, when requested.
    pub fn gyro(&self) -> Option<&RingBuffer> {
        self.gyro.as_ref()
    }

    /// Number of producer respawns so far.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// OS pid of the current producer.
    pub fn producer_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Stop the producer and unlink the rings.
    pub async fn shutdown(mut self) -> AppResult<()> {
        let mut errors = Vec::new();

        if let Some(mut child) = self.child.take() {
            if let Err(err) = terminate(&mut child, self.config.shutdown_timeout).await {
                errors.push(err);
            }
        }

        let rings = std::iter::once(self.accel).chain(self.gyro);
        for ring in rings {
            let path = ring.path().to_path_buf();
            if let Err(err) = ring.remove() {
                warn!(path = ?path, error = %err, "Failed to unlink ring");
                errors.push(err.into());
            }
        }

        if errors.is_empty() {
            info!(restart_count = self.restart_count, "Producer supervisor stopped");
            Ok(())
        } else {
            Err(MotionError::ShutdownFailed(errors))
        }
    }

    fn unlink_rings(&self) {
        for path in std::iter::once(self.accel.path()).chain(self.gyro.as_ref().map(RingBuffer::path)) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) -> AppResult<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    request_terminate(child)?;
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            debug!(status = %status, "Producer terminated");
            Ok(())
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "Producer ignored SIGTERM, killing");
            child.start_kill()?;
            child.wait().await?;
            Ok(())
        }
    }
}

#[cfg(unix)]
fn request_terminate(child: &Child) -> AppResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) -> AppResult<()> {
    child.start_kill()?;
    Ok(())
}

/// Resolve the executable that hosts the `producer` subcommand.
pub fn current_program() -> AppResult<PathBuf> {
    Ok(std::env::current_exe()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(dir: &Path, program: &str) -> SupervisorConfig {
        SupervisorConfig {
            program: PathBuf::from(program),
            ring_dir: dir.to_path_buf(),
            ring_prefix: "unit".to_string(),
            capacity: 128,
            with_gyro: true,
            decimate: 8,
            source: "mock".to_string(),
            native_rate_hz: 800.0,
            seed: 1,
            shutdown_timeout: Duration::from_millis(200),
            policy: RestartPolicy::Fail,
        }
    }

    #[tokio::test]
    async fn spawn_failure_cleans_up_rings() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), "/nonexistent/motion_daq_binary");

        let err = ProducerSupervisor::start(cfg.clone()).unwrap_err();
        assert!(matches!(err, MotionError::Transport(_)));
        assert!(!cfg.ring_path("accel").exists());
        assert!(!cfg.ring_path("gyro").exists());
    }

    #[test]
    fn from_config_uses_transport_settings() {
        let mut motion = MotionConfig::default();
        motion.transport.capacity = 4000;
        motion.transport.shutdown_timeout_ms = 250;
        let cfg = SupervisorConfig::from_config(&motion, PathBuf::from("x"), 4, false, RestartPolicy::Restart);

        assert_eq!(cfg.capacity, 4000);
        assert_eq!(cfg.decimate, 4);
        assert_eq!(cfg.shutdown_timeout, Duration::from_millis(250));
        assert!(cfg.ring_path("accel").to_string_lossy().ends_with("_accel.ring"));
    }
}
