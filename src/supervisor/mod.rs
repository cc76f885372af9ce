mod command;

pub use command::{render_command, split_command, INTERFACE_PLACEHOLDER};

use crate::config::StopPolicy;
use crate::errors::{AppError, AppResult};
use crate::models::{AutostartReport, LaunchFailure, Transition, WorkerState, WorkerStatus};
use crate::settings::{command_key, enabled_key, SettingsStore};
use command::spawn_worker;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::process::Child;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

struct RunningChild {
    child: Child,
    pid: Option<u32>,
}

impl RunningChild {
    fn is_alive(&mut self, parser: &str) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::info!(parser, status = %status, "parser exited");
                false
            }
            Err(error) => {
                tracing::warn!(parser, error = %error, "failed to query parser process");
                false
            }
        }
    }
}

struct Worker {
    name: String,
    slot: Mutex<Option<RunningChild>>,
    phase: StdMutex<WorkerState>,
}

impl Worker {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            slot: Mutex::new(None),
            phase: StdMutex::new(WorkerState::Stopped),
        }
    }

    fn set_phase(&self, state: WorkerState) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = state;
        }
    }

    fn phase(&self) -> WorkerState {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(WorkerState::Stopped)
    }

    fn refresh(&self, slot: &mut Option<RunningChild>) -> bool {
        let alive = slot
            .as_mut()
            .is_some_and(|running| running.is_alive(&self.name));
        if !alive {
            *slot = None;
            self.set_phase(WorkerState::Stopped);
        }
        alive
    }
}

pub struct Supervisor {
    workers: BTreeMap<String, Arc<Worker>>,
    store: Arc<dyn SettingsStore>,
    policy: StopPolicy,
    autostart_lock: Mutex<()>,
}

impl Supervisor {
    pub fn new(parsers: &[String], store: Arc<dyn SettingsStore>, policy: StopPolicy) -> Self {
        let workers = parsers
            .iter()
            .map(|name| (name.clone(), Arc::new(Worker::new(name))))
            .collect();
        Self {
            workers,
            store,
            policy,
            autostart_lock: Mutex::new(()),
        }
    }

    pub fn parsers(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    fn worker(&self, name: &str) -> AppResult<Arc<Worker>> {
        self.workers
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownWorker(name.to_string()))
    }

    fn command_line(&self, parser: &str) -> AppResult<String> {
        let template = self.store.get(&command_key(parser))?;
        if template.value().trim().is_empty() {
            return Err(AppError::launch(parser, "no command configured"));
        }
        let interface = self.store.get("listen_interface")?;
        Ok(render_command(template.value(), interface.value()))
    }

    pub async fn status(&self) -> AppResult<BTreeMap<String, WorkerStatus>> {
        let mut statuses = BTreeMap::new();
        for (name, worker) in &self.workers {
            let enabled = self.store.get(&enabled_key(name))?.bool_value();
            let command = self.store.get(&command_key(name))?.value().to_string();

            let (state, pid) = match worker.slot.try_lock() {
                Ok(mut slot) => {
                    if worker.refresh(&mut slot) {
                        (WorkerState::Running, slot.as_ref().and_then(|running| running.pid))
                    } else {
                        (WorkerState::Stopped, None)
                    }
                }
                // A transition holds the lock; report the phase it published.
                Err(_) => (worker.phase(), None),
            };

            statuses.insert(
                name.clone(),
                WorkerStatus {
                    enabled,
                    running: matches!(state, WorkerState::Running | WorkerState::Stopping),
                    state,
                    command,
                    pid,
                },
            );
        }
        Ok(statuses)
    }

    pub async fn start(&self, name: &str) -> AppResult<Transition> {
        let worker = self.worker(name)?;
        let mut slot = worker.slot.lock().await;
        self.start_locked(&worker, &mut slot).await
    }

    pub async fn stop(&self, name: &str) -> AppResult<Transition> {
        let worker = self.worker(name)?;
        let mut slot = worker.slot.lock().await;
        self.stop_locked(&worker, &mut slot).await
    }

    // Worker lock is held across both steps.
    pub async fn restart(&self, name: &str) -> AppResult<Transition> {
        let worker = self.worker(name)?;
        let mut slot = worker.slot.lock().await;
        self.stop_locked(&worker, &mut slot).await?;
        self.start_locked(&worker, &mut slot).await
    }

    pub async fn autostart(&self) -> AutostartReport {
        let _pass = self.autostart_lock.lock().await;
        let mut report = AutostartReport::default();

        for (name, worker) in &self.workers {
            let enabled = match self.store.get(&enabled_key(name)) {
                Ok(setting) => setting.bool_value(),
                Err(error) => {
                    tracing::warn!(parser = %name, error = %error, "cannot read enabled flag");
                    report.failed.push(LaunchFailure {
                        parser: name.clone(),
                        error: error.to_string(),
                    });
                    continue;
                }
            };

            let mut slot = worker.slot.lock().await;
            let alive = worker.refresh(&mut slot);
            if enabled && !alive {
                match self.start_locked(worker, &mut slot).await {
                    Ok(Transition::Started) => report.started.push(name.clone()),
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(parser = %name, error = %error, "autostart failed to launch parser");
                        report.failed.push(LaunchFailure {
                            parser: name.clone(),
                            error: error.to_string(),
                        });
                    }
                }
            } else if !enabled && alive {
                match self.stop_locked(worker, &mut slot).await {
                    Ok(Transition::Stopped) => report.stopped.push(name.clone()),
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(parser = %name, error = %error, "autostart failed to stop parser");
                        report.failed.push(LaunchFailure {
                            parser: name.clone(),
                            error: error.to_string(),
                        });
                    }
                }
            }
        }

        if !report.is_noop() {
            tracing::info!(
                started = ?report.started,
                stopped = ?report.stopped,
                failed = report.failed.len(),
                "autostart pass changed parser state"
            );
        }
        report
    }

    pub async fn shutdown(&self) {
        for (name, worker) in &self.workers {
            let mut slot = worker.slot.lock().await;
            match self.stop_locked(worker, &mut slot).await {
                Ok(Transition::Stopped) => tracing::info!(parser = %name, "parser stopped for shutdown"),
                Ok(_) => {}
                Err(error) => tracing::error!(parser = %name, error = %error, "parser survived shutdown"),
            }
        }
    }

    async fn start_locked(
        &self,
        worker: &Worker,
        slot: &mut MutexGuard<'_, Option<RunningChild>>,
    ) -> AppResult<Transition> {
        if worker.refresh(slot) {
            return Ok(Transition::AlreadyRunning);
        }

        worker.set_phase(WorkerState::Starting);
        let launched = self
            .command_line(&worker.name)
            .and_then(|line| spawn_worker(&worker.name, &line));
        match launched {
            Ok(child) => {
                let pid = child.id();
                tracing::info!(parser = %worker.name, pid = ?pid, "parser started");
                **slot = Some(RunningChild { child, pid });
                worker.set_phase(WorkerState::Running);
                Ok(Transition::Started)
            }
            Err(error) => {
                worker.set_phase(WorkerState::Stopped);
                Err(error)
            }
        }
    }

    async fn stop_locked(
        &self,
        worker: &Worker,
        slot: &mut MutexGuard<'_, Option<RunningChild>>,
    ) -> AppResult<Transition> {
        if !worker.refresh(slot) {
            return Ok(Transition::AlreadyStopped);
        }
        let Some(mut running) = slot.take() else {
            return Ok(Transition::AlreadyStopped);
        };

        worker.set_phase(WorkerState::Stopping);
        let exited = terminate_then_kill(&worker.name, &mut running, self.policy).await;
        settle_stop(worker, slot, running, exited)
    }
}

// A child that outlived SIGKILL stays in the slot so nothing relaunches next to it.
fn settle_stop(
    worker: &Worker,
    slot: &mut Option<RunningChild>,
    running: RunningChild,
    exited: bool,
) -> AppResult<Transition> {
    if !exited {
        let pid = running.pid;
        *slot = Some(running);
        worker.set_phase(WorkerState::Running);
        return Err(AppError::ProcessStop {
            name: worker.name.clone(),
            reason: format!("pid {:?} still alive after kill", pid),
        });
    }
    worker.set_phase(WorkerState::Stopped);
    tracing::info!(parser = %worker.name, pid = ?running.pid, "parser stopped");
    Ok(Transition::Stopped)
}

async fn terminate_then_kill(parser: &str, running: &mut RunningChild, policy: StopPolicy) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        signal_group(parser, running.pid, Signal::SIGTERM);
    }

    #[cfg(not(unix))]
    {
        let _ = running.child.start_kill();
    }

    if timeout(policy.grace, running.child.wait()).await.is_ok() {
        return true;
    }

    tracing::warn!(parser, grace_ms = policy.grace.as_millis() as u64, "parser ignored termination, killing");
    #[cfg(unix)]
    {
        use nix::sys::signal::Signal;
        signal_group(parser, running.pid, Signal::SIGKILL);
    }
    if let Err(error) = running.child.start_kill() {
        tracing::debug!(parser, error = %error, "parser already gone before kill");
    }
    if timeout(policy.kill_wait, running.child.wait()).await.is_err() {
        tracing::warn!(parser, "parser did not exit after kill");
        return false;
    }
    true
}

#[cfg(unix)]
fn signal_group(parser: &str, pid: Option<u32>, signal: nix::sys::signal::Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return false;
    };
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        Err(Errno::ESRCH) => {
            tracing::debug!(parser, pid, signal = ?signal, "parser exited before signal was delivered");
            false
        }
        Err(error) => {
            tracing::warn!(parser, pid, signal = ?signal, error = %error, "failed to signal parser");
            false
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::{settle_stop, signal_group, spawn_worker, terminate_then_kill, RunningChild, Supervisor};
    use crate::config::StopPolicy;
    use crate::db::Database;
    use crate::errors::AppError;
    use crate::models::{Transition, WorkerState};
    use crate::settings::SettingsStore;
    use nix::sys::signal::Signal;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn fixture(parsers: &[&str], settings: &[(&str, &str)]) -> (tempfile::TempDir, Arc<Database>, Arc<Supervisor>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("test.db")).expect("db"));
        let names: Vec<String> = parsers.iter().map(|name| name.to_string()).collect();
        db.ensure_parser_settings(&names).expect("seed parsers");
        let batch: BTreeMap<String, String> = settings
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        db.write_batch(&batch).expect("settings");

        let policy = StopPolicy {
            grace: Duration::from_millis(500),
            kill_wait: Duration::from_millis(1_000),
        };
        let supervisor = Arc::new(Supervisor::new(&names, db.clone(), policy));
        (dir, db, supervisor)
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (_dir, _db, supervisor) = fixture(&["feedparser"], &[("feedparser_command", "sleep 30")]);

        assert_eq!(supervisor.start("feedparser").await.expect("start"), Transition::Started);
        assert_eq!(
            supervisor.start("feedparser").await.expect("start again"),
            Transition::AlreadyRunning
        );
        let status = supervisor.status().await.expect("status");
        assert!(status["feedparser"].running);
        assert!(status["feedparser"].pid.is_some());

        assert_eq!(supervisor.stop("feedparser").await.expect("stop"), Transition::Stopped);
        assert_eq!(
            supervisor.stop("feedparser").await.expect("stop again"),
            Transition::AlreadyStopped
        );
        let status = supervisor.status().await.expect("status");
        assert!(!status["feedparser"].running);
        assert_eq!(status["feedparser"].state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn launch_failures_are_reported() {
        let (_dir, _db, supervisor) = fixture(
            &["missing", "blank", "broken"],
            &[
                ("missing_command", "/nonexistent/dofler-parser --flag"),
                ("broken_command", "driftnet 'unterminated"),
            ],
        );

        for name in ["missing", "blank", "broken"] {
            let err = supervisor.start(name).await.expect_err("launch should fail");
            assert!(matches!(err, AppError::ProcessLaunch { .. }), "{name}: {err}");
        }
        assert!(matches!(supervisor.start("nope").await, Err(AppError::UnknownWorker(_))));
        let status = supervisor.status().await.expect("status");
        assert!(status.values().all(|worker| !worker.running));
    }

    #[tokio::test]
    async fn exited_process_is_reported_not_running() {
        let (_dir, _db, supervisor) = fixture(&["oneshot"], &[("oneshot_command", "true")]);
        supervisor.start("oneshot").await.expect("start");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = supervisor.status().await.expect("status");
        assert!(!status["oneshot"].running);
        assert_eq!(supervisor.start("oneshot").await.expect("restart"), Transition::Started);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn autostart_reconciles_and_is_idempotent() {
        let (_dir, db, supervisor) = fixture(
            &["feedparser", "idle"],
            &[
                ("feedparser_enabled", "true"),
                ("feedparser_command", "sleep 30"),
                ("idle_command", "sleep 30"),
            ],
        );

        let first = supervisor.autostart().await;
        assert_eq!(first.started, vec!["feedparser".to_string()]);
        assert!(first.stopped.is_empty());
        assert!(supervisor.status().await.expect("status")["feedparser"].running);

        let second = supervisor.autostart().await;
        assert!(second.is_noop(), "{second:?}");

        let mut disable = BTreeMap::new();
        disable.insert("feedparser_enabled".to_string(), "0".to_string());
        db.write_batch(&disable).expect("disable");
        let third = supervisor.autostart().await;
        assert_eq!(third.stopped, vec!["feedparser".to_string()]);
        assert!(!supervisor.status().await.expect("status")["feedparser"].running);
    }

    #[tokio::test]
    async fn autostart_collects_launch_failures() {
        let (_dir, _db, supervisor) = fixture(
            &["bad", "good"],
            &[
                ("bad_enabled", "1"),
                ("bad_command", "/nonexistent/parser"),
                ("good_enabled", "1"),
                ("good_command", "sleep 30"),
            ],
        );

        let report = supervisor.autostart().await;
        assert_eq!(report.started, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].parser, "bad");
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_stops_terminate_once() {
        let (_dir, _db, supervisor) = fixture(&["x"], &[("x_command", "sleep 30")]);
        supervisor.start("x").await.expect("start");

        let (a, b) = tokio::join!(supervisor.stop("x"), supervisor.stop("x"));
        let mut outcomes = vec![a.expect("stop a"), b.expect("stop b")];
        outcomes.sort_by_key(|outcome| *outcome == Transition::AlreadyStopped);
        assert_eq!(outcomes, vec![Transition::Stopped, Transition::AlreadyStopped]);
    }

    #[tokio::test]
    async fn interface_placeholder_is_rendered() {
        let (_dir, _db, supervisor) = fixture(
            &["sniffer"],
            &[("sniffer_command", "sleep {interface}"), ("listen_interface", "30")],
        );
        assert_eq!(supervisor.start("sniffer").await.expect("start"), Transition::Started);
        supervisor.shutdown().await;
        assert!(!supervisor.status().await.expect("status")["sniffer"].running);
    }

    #[tokio::test]
    async fn signalling_a_reaped_parser_is_harmless() {
        let mut child = spawn_worker("gone", "true").expect("spawn");
        let pid = child.id();
        child.wait().await.expect("wait");

        assert!(!signal_group("gone", pid, Signal::SIGTERM));
        assert!(!signal_group("gone", None, Signal::SIGKILL));
    }

    #[tokio::test]
    async fn stopping_a_parser_that_already_exited_is_clean() {
        let (_dir, _db, supervisor) = fixture(&["brief"], &[("brief_command", "sleep 0.2")]);
        supervisor.start("brief").await.expect("start");
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(supervisor.stop("brief").await.expect("stop"), Transition::AlreadyStopped);
        assert_eq!(supervisor.status().await.expect("status")["brief"].state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn exited_between_check_and_signal_still_stops() {
        let child = spawn_worker("racer", "true").expect("spawn");
        let pid = child.id();
        let mut running = RunningChild { child, pid };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let policy = StopPolicy {
            grace: Duration::from_millis(200),
            kill_wait: Duration::from_millis(200),
        };
        assert!(terminate_then_kill("racer", &mut running, policy).await);
    }

    #[tokio::test]
    async fn survivor_of_kill_keeps_its_slot() {
        let (_dir, _db, supervisor) = fixture(&["stuck"], &[("stuck_command", "sleep 30")]);
        let worker = supervisor.worker("stuck").expect("worker");
        let child = spawn_worker("stuck", "sleep 30").expect("spawn");
        let pid = child.id();

        let err = {
            let mut slot = worker.slot.lock().await;
            settle_stop(&worker, &mut slot, RunningChild { child, pid }, false).expect_err("still alive")
        };
        assert!(matches!(err, AppError::ProcessStop { .. }));

        let status = supervisor.status().await.expect("status");
        assert!(status["stuck"].running);
        assert_eq!(status["stuck"].pid, pid);
        assert_eq!(supervisor.start("stuck").await.expect("start"), Transition::AlreadyRunning);

        assert_eq!(supervisor.stop("stuck").await.expect("stop"), Transition::Stopped);
    }
}
