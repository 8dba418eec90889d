//! Foreground process supervision
//!
//! The application is spawned as the only child, with inherited stdio. The
//! launcher waits for it, forwards termination signals, runs the health
//! monitor on a side thread and reports the child's exit code unchanged.

use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::instance::{Binding, InstanceManager, InstanceRecord};
use super::render_command;
use crate::error::{BerthError, Result, EXIT_LAUNCHER_FAILED};
use crate::image::{HealthcheckSpec, ImageRecord, ImageStore, APP_DIR};
use crate::probe::{HealthMonitor, HttpProbe, MonitorHandle, MonitorSettings, ProbeTarget};

/// Pid of the current foreground child, 0 when there is none
static FOREGROUND: AtomicI32 = AtomicI32::new(0);
static SIGNAL_HANDLER: Once = Once::new();

/// Overrides for a single `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub name: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub no_healthcheck: bool,
}

/// Starts images as foreground processes
pub struct Launcher<'a> {
    store: &'a ImageStore,
    instances: InstanceManager,
}

impl<'a> Launcher<'a> {
    pub fn new(store: &'a ImageStore) -> Self {
        Self {
            store,
            instances: InstanceManager::new(store),
        }
    }

    /// Run an image to completion and return the finished instance
    pub fn run(&self, reference: &str, options: &RunOptions) -> Result<InstanceRecord> {
        let image = self.store.resolve(reference)?;
        let (template, default_address, env) = image
            .spec
            .entrypoint()
            .ok_or_else(|| BerthError::ConfigError(format!("image {} has no entrypoint", image.short_id())))?;

        let binding = Binding {
            address: options.address.clone().unwrap_or_else(|| default_address.to_string()),
            port: options.port.or(image.spec.port()).unwrap_or(crate::config::DEFAULT_PORT),
        };
        let command = render_command(template, &binding.address, binding.port);
        if command.is_empty() {
            return Err(BerthError::ConfigError("entrypoint command is empty".to_string()));
        }

        let tag = self.pick_tag(&image, reference)?;
        let record =
            self.instances
                .create(self.store, &image, tag, options.name.as_deref(), binding, command.clone())?;

        let workdir = self.store.rootfs(&image.digest).join(APP_DIR);
        info!(id = %record.id, image = %image.short_id(), command = %command.join(" "), "starting process");
        let spawned = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(&workdir)
            .envs(env)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                self.instances.remove(&record.id)?;
                return Err(BerthError::SpawnError {
                    program: command[0].clone(),
                    source,
                });
            }
        };

        let health = image.spec.healthcheck().filter(|_| !options.no_healthcheck);
        self.supervise(&mut child, record, health)
    }

    /// Follow a spawned child until it exits. Failures to persist state are
    /// logged; the child is always waited for and its record closed.
    fn supervise(
        &self,
        child: &mut Child,
        mut record: InstanceRecord,
        health: Option<&HealthcheckSpec>,
    ) -> Result<InstanceRecord> {
        let pid = child.id();
        if let Err(e) = record.mark_running(pid).and_then(|()| self.instances.save(&record)) {
            warn!(id = %record.id, error = %e, "failed to record running process");
        }
        forward_signals_to(pid);

        let shared = Arc::new(Mutex::new(record));
        let monitor = health.and_then(|health| match self.start_monitor(health, &shared) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "health monitor not started");
                None
            }
        });

        let status = child.wait();
        FOREGROUND.store(0, Ordering::SeqCst);
        if let Some(monitor) = monitor {
            monitor.stop();
        }

        let code = status.as_ref().ok().map(|s| exit_code(*s));
        let record = {
            let mut record = shared.lock();
            if let Err(e) = record.mark_exited(code).and_then(|()| self.instances.save(&record)) {
                warn!(id = %record.id, error = %e, "failed to record process exit");
            }
            record.clone()
        };
        status?;
        info!(id = %record.id, exit_code = ?record.exit_code, "process exited");
        Ok(record)
    }

    /// The tag the image was asked for by, else its first tag
    fn pick_tag(&self, image: &ImageRecord, reference: &str) -> Result<Option<String>> {
        let tags = self.store.tags_for(&image.digest)?;
        if tags.iter().any(|t| t == reference) {
            return Ok(Some(reference.to_string()));
        }
        Ok(tags.into_iter().next())
    }

    fn start_monitor(
        &self,
        health: &HealthcheckSpec,
        shared: &Arc<Mutex<InstanceRecord>>,
    ) -> Result<MonitorHandle> {
        let (host, port) = {
            let record = shared.lock();
            (probe_host(&record.address), record.port)
        };
        let target = ProbeTarget {
            host,
            port,
            path: health.path.clone(),
            timeout: Duration::from_secs(health.timeout_secs),
        };
        let probe = HttpProbe::new(&target)?;
        info!(url = %probe.url(), interval_secs = health.interval_secs, "health monitor started");

        let settings = MonitorSettings {
            interval: Duration::from_secs(health.interval_secs),
            start_period: Duration::from_secs(health.start_period_secs),
            retries: health.retries,
        };
        let instances = self.instances.clone();
        let shared = shared.clone();
        let handle = HealthMonitor::new(probe, settings).spawn(move |state, _| {
            let mut record = shared.lock();
            if record.lifecycle.is_terminal() {
                return;
            }
            record.health = Some(state.clone());
            if let Err(e) = instances.save(&record) {
                warn!(error = %e, "failed to persist health state");
            }
        });
        Ok(handle)
    }
}

/// Wildcard binds are probed over loopback
fn probe_host(address: &str) -> String {
    match address {
        "0.0.0.0" | "" => "127.0.0.1".to_string(),
        "::" | "[::]" => "::1".to_string(),
        other => other.trim_start_matches('[').trim_end_matches(']').to_string(),
    }
}

/// Forward SIGINT, SIGTERM and SIGHUP received by the launcher to the child
/// as SIGTERM. The launcher keeps waiting so the child's code still comes
/// through.
fn forward_signals_to(pid: u32) {
    FOREGROUND.store(pid as i32, Ordering::SeqCst);
    SIGNAL_HANDLER.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            let pid = FOREGROUND.load(Ordering::SeqCst);
            if pid > 0 {
                info!(pid, "forwarding termination to process");
                // SAFETY: kill(2) has no memory-safety preconditions
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
            }
        });
        if let Err(e) = installed {
            warn!(error = %e, "signal forwarding unavailable");
        }
    });
}

/// The child's exit code, or 128 + signal number when it was killed
#[cfg(unix)]
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => EXIT_LAUNCHER_FAILED,
    }
}

#[cfg(not(unix))]
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(EXIT_LAUNCHER_FAILED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BuildStep, ImageSpec, RECORD_FILE};
    use crate::launcher::{Lifecycle, CONTAINERS_DIR};
    use crate::probe::HealthStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::{fs, thread};

    fn fixture_image(store: &ImageStore, command: &[&str], health: Option<HealthcheckSpec>) -> ImageRecord {
        store.init().unwrap();
        let mut steps = vec![BuildStep::Expose { port: 8501 }];
        if let Some(health) = health {
            steps.push(BuildStep::Healthcheck(health));
        }
        steps.push(BuildStep::Entrypoint {
            command: command.iter().map(|s| s.to_string()).collect(),
            address: "127.0.0.1".to_string(),
            env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
        });
        let digest = format!("{:064x}", command.len() + 7);
        let record = ImageRecord {
            digest: digest.clone(),
            spec: ImageSpec { steps },
            created_at: Utc::now(),
            size_bytes: 0,
        };
        fs::create_dir_all(store.rootfs(&digest).join(APP_DIR)).unwrap();
        fs::write(
            store.image_dir(&digest).join(RECORD_FILE),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();
        store.tag("app", &digest).unwrap();
        record
    }

    #[test]
    fn test_exit_code_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        fixture_image(&store, &["sh", "-c", "exit 3"], None);

        let record = Launcher::new(&store).run("app", &RunOptions::default()).unwrap();
        assert_eq!(record.exit_code, Some(3));
        assert_eq!(record.lifecycle, Lifecycle::Exited);
        assert_eq!(record.tag.as_deref(), Some("app"));

        let saved = InstanceManager::new(&store).get(&record.id).unwrap();
        assert_eq!(saved.exit_code, Some(3));
        assert!(saved.pid.is_some());
    }

    #[test]
    fn test_killed_process_reports_signal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        fixture_image(&store, &["sh", "-c", "kill -9 $$"], None);

        let record = Launcher::new(&store).run("app", &RunOptions::default()).unwrap();
        assert_eq!(record.exit_code, Some(128 + 9));
    }

    #[test]
    fn test_runs_in_app_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let image = fixture_image(
            &store,
            &["sh", "-c", "test \"$GREETING\" = hello && test \"$(basename \"$(pwd)\")\" = app && echo {port} > port.txt"],
            None,
        );

        let options = RunOptions {
            port: Some(9000),
            ..RunOptions::default()
        };
        let record = Launcher::new(&store).run("app", &options).unwrap();
        assert_eq!(record.exit_code, Some(0));
        assert_eq!(record.port, 9000);
        let written = fs::read_to_string(store.rootfs(&image.digest).join(APP_DIR).join("port.txt")).unwrap();
        assert_eq!(written.trim(), "9000");
    }

    #[test]
    fn test_missing_program_leaves_no_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        fixture_image(&store, &["berth-test-no-such-program"], None);

        let err = Launcher::new(&store).run("app", &RunOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_NOT_FOUND);
        assert!(InstanceManager::new(&store).list().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_image() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        store.init().unwrap();
        let err = Launcher::new(&store).run("nothing", &RunOptions::default()).unwrap_err();
        assert!(matches!(err, BerthError::ImageNotFound(_)));
    }

    #[test]
    fn test_health_recorded_while_running() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let health = HealthcheckSpec {
            path: "/healthz".to_string(),
            interval_secs: 1,
            timeout_secs: 1,
            start_period_secs: 0,
            retries: 3,
        };
        fixture_image(&store, &["sh", "-c", "sleep 3"], Some(health));

        let options = RunOptions {
            port: Some(port),
            ..RunOptions::default()
        };
        let record = Launcher::new(&store).run("app", &options).unwrap();
        assert_eq!(record.exit_code, Some(0));
        let health = record.health.expect("health recorded");
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn test_child_followed_when_state_cannot_be_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path());
        let image = fixture_image(&store, &["sh", "-c", "exit 4"], None);
        let launcher = Launcher::new(&store);
        let binding = Binding {
            address: "127.0.0.1".to_string(),
            port: 8501,
        };
        let command = vec!["sh".to_string(), "-c".to_string(), "exit 4".to_string()];
        let record = launcher
            .instances
            .create(&store, &image, None, None, binding, command)
            .unwrap();

        // a file where the instance directory belongs makes every save fail
        let state_dir = dir.path().join(CONTAINERS_DIR).join(&record.id);
        fs::remove_dir_all(&state_dir).unwrap();
        fs::write(&state_dir, b"").unwrap();

        let mut child = Command::new("sh").args(["-c", "exit 4"]).spawn().unwrap();
        let record = launcher.supervise(&mut child, record, None).unwrap();
        assert_eq!(record.lifecycle, Lifecycle::Exited);
        assert_eq!(record.exit_code, Some(4));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_probe_host() {
        assert_eq!(probe_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(probe_host("::"), "::1");
        assert_eq!(probe_host("[::1]"), "::1");
        assert_eq!(probe_host("10.0.0.5"), "10.0.0.5");
    }
}
