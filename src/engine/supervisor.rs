//! Run supervisor
//!
//! Owns the execution status and the single active run. Every terminal
//! transition goes through [`Supervisor::conclude`], which takes the active run
//! out under the lock, so the final hook fires exactly once per run no matter
//! which path (completion, error, timeout or stop) gets there first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rc_shared::status::is_valid_transition;
use rc_shared::ExecutionStatus;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::error::{RunOutcome, ScriptError};
use super::hooks::{Hook, LifecycleHooks, LogHooks};
use super::runner::{self, CompiledScript, TaskHandle};
use super::script::{ModuleRegistry, RunEnv};

struct ActiveRun {
    id: u64,
    task: TaskHandle,
    cancel: CancellationToken,
    started: Instant,
    timeout: Option<Duration>,
}

/// What the poll loop found on one tick
enum Check {
    Running,
    TimedOut,
    StopRequested,
    Finished,
}

pub struct Supervisor {
    status: watch::Sender<ExecutionStatus>,
    active: Mutex<Option<ActiveRun>>,
    hooks: RwLock<LifecycleHooks>,
    timeout: Mutex<Option<Duration>>,
    poll_interval: Duration,
    log: LogHooks,
    last_run_id: AtomicU64,
}

impl Supervisor {
    pub fn new(poll_interval: Duration, log: LogHooks) -> Self {
        let (status, _) = watch::channel(ExecutionStatus::Idle);
        Self {
            status,
            active: Mutex::new(None),
            hooks: RwLock::new(LifecycleHooks::default()),
            timeout: Mutex::new(None),
            poll_interval,
            log,
            last_run_id: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.status.subscribe()
    }

    /// Id of the current run, or of the last one; 0 before the first run
    pub fn run_id(&self) -> u64 {
        self.last_run_id.load(Ordering::SeqCst)
    }

    pub fn set_start_hook(&self, hook: Option<Hook>) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.start = hook;
        }
    }

    pub fn set_final_hook(&self, hook: Option<Hook>) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.finish = hook;
        }
    }

    /// Applies from the next run on
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        if let Ok(mut current) = self.timeout.lock() {
            *current = timeout;
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Start a compiled script: RUNNING, start hook, spawn, then supervise
    ///
    /// A run still active at this point is concluded as cancelled first, so at
    /// most one task ever exists.
    pub fn start(
        self: &Arc<Self>,
        script: CompiledScript,
        modules: Arc<ModuleRegistry>,
    ) -> u64 {
        if let Some(previous) = self.active_id() {
            self.log
                .warn(&format!("[EXEC]Run {previous} still active, cancelling it first"));
            self.finish(previous, RunOutcome::ManualCancel);
        }

        let id = self.last_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let timeout = self.timeout.lock().ok().and_then(|t| *t);

        self.transition(ExecutionStatus::Running);
        if let Some(hook) = self.hook(|h| h.start.clone()) {
            hook();
        }

        self.log.debug(&format!(
            "[EXEC]Run {id} starting, {} body lines",
            script.body().text.lines().count()
        ));
        let task = runner::spawn(
            script,
            RunEnv {
                modules,
                log: self.log.clone(),
                cancel: cancel.clone(),
            },
        );

        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveRun {
                id,
                task,
                cancel,
                started: Instant::now(),
                timeout,
            });
        }

        tokio::spawn(self.clone().supervise(id));
        id
    }

    /// Request cancellation of the active run
    ///
    /// Only sets the run's cancellation signal; the next poll observes it,
    /// forces the task down and concludes the run. With nothing running this
    /// only logs.
    pub fn stop(&self) {
        let signalled = match self.active.lock() {
            Ok(active) => match active.as_ref() {
                Some(run) if run.cancel.is_cancelled() => Some(false),
                Some(run) => {
                    run.cancel.cancel();
                    Some(true)
                }
                None => None,
            },
            Err(_) => None,
        };

        match signalled {
            Some(true) => self.log.debug("[EXEC]Stop requested"),
            Some(false) => self.log.debug("[EXEC]Stop already requested"),
            None => self.log.info("[EXEC]Execution already been stopped."),
        }
    }

    async fn supervise(self: Arc<Self>, id: u64) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let Some(check) = self.check(id) else {
                return;
            };
            match check {
                Check::Running => continue,
                Check::TimedOut => {
                    self.finish(id, RunOutcome::Timeout);
                }
                Check::StopRequested => {
                    self.finish(id, RunOutcome::ManualCancel);
                }
                Check::Finished => {
                    if let Some(mut run) = self.take_active(id) {
                        let outcome = run.task.outcome().await;
                        self.conclude(run, outcome);
                    }
                }
            }
            return;
        }
    }

    /// Timeout first, then the cancellation signal, then task completion
    fn check(&self, id: u64) -> Option<Check> {
        let active = self.active.lock().ok()?;
        let run = active.as_ref().filter(|run| run.id == id)?;

        let check = if run.timeout.is_some_and(|t| run.started.elapsed() >= t) {
            Check::TimedOut
        } else if run.cancel.is_cancelled() {
            Check::StopRequested
        } else if run.task.is_finished() {
            Check::Finished
        } else {
            Check::Running
        };
        Some(check)
    }

    fn active_id(&self) -> Option<u64> {
        self.active.lock().ok()?.as_ref().map(|run| run.id)
    }

    /// The single terminal-transition guard
    fn take_active(&self, id: u64) -> Option<ActiveRun> {
        let mut active = self.active.lock().ok()?;
        if active.as_ref().is_some_and(|run| run.id == id) {
            active.take()
        } else {
            None
        }
    }

    /// Force a run down with an outcome decided by the caller
    fn finish(&self, id: u64, outcome: RunOutcome) {
        if let Some(run) = self.take_active(id) {
            run.cancel.cancel();
            run.task.abort();
            self.conclude(run, outcome);
        }
    }

    fn conclude(&self, run: ActiveRun, outcome: RunOutcome) {
        let status = match &outcome {
            RunOutcome::Completed => {
                self.log.info("[EXEC]Execution done");
                ExecutionStatus::Done
            }
            RunOutcome::Failed(e @ ScriptError::Dependency { .. }) => {
                self.log
                    .error(&format!("[EXEC]Import Error: {}", run.task.describe(e)));
                ExecutionStatus::Error
            }
            RunOutcome::Failed(e @ ScriptError::Runtime { .. }) => {
                self.log
                    .error(&format!("[EXEC]Execution Error: {}", run.task.describe(e)));
                ExecutionStatus::Error
            }
            RunOutcome::Crashed(reason) => {
                self.log
                    .error(&format!("[EXEC]Execution Error: task crashed: {reason}"));
                ExecutionStatus::Error
            }
            RunOutcome::Timeout => {
                self.log.info("[EXEC]Command execution timed out.");
                ExecutionStatus::Cancelled
            }
            RunOutcome::ManualCancel => {
                self.log.info("[EXEC]Execution stopped manually.");
                ExecutionStatus::Cancelled
            }
        };

        // A finished task may still hold the signal; stop anything watching it
        run.cancel.cancel();
        self.log.debug(&format!(
            "[EXEC]Run {} {} after {:?}",
            run.id,
            outcome,
            run.started.elapsed()
        ));
        self.transition(status);

        if let Some(hook) = self.hook(|h| h.finish.clone()) {
            hook();
        }
    }

    fn transition(&self, to: ExecutionStatus) {
        let from = self.status();
        if !is_valid_transition(from, to) {
            self.log
                .debug(&format!("[EXEC]Unexpected status transition {from} -> {to}"));
        }
        self.status.send_replace(to);
    }

    /// Clone a hook out so it runs without the lock held
    fn hook(&self, pick: impl FnOnce(&LifecycleHooks) -> Option<Hook>) -> Option<Hook> {
        self.hooks.read().ok().and_then(|hooks| pick(&hooks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hooks::testing::CapturedLogs;
    use crate::engine::hooks::LogLevel;
    use crate::engine::rewrite::rewrite;
    use crate::engine::runner::compile;
    use std::sync::atomic::AtomicUsize;

    const POLL: Duration = Duration::from_millis(100);

    fn supervisor(logs: &CapturedLogs) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(POLL, logs.hooks()))
    }

    fn script(text: &str) -> CompiledScript {
        let preamble = vec!["import uasyncio as asyncio".to_string()];
        compile(rewrite(text, &[], &preamble)).unwrap()
    }

    fn modules() -> Arc<ModuleRegistry> {
        Arc::new(ModuleRegistry::with_defaults())
    }

    fn counter() -> (Arc<AtomicUsize>, Hook) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_reaches_done() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let (finals, hook) = counter();
        sup.set_final_hook(Some(hook));

        sup.start(script("x = 1\nawait asyncio.sleep(0.3)"), modules());
        assert_eq!(sup.status(), ExecutionStatus::Running);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sup.status(), ExecutionStatus::Done);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert!(!sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_error_reaches_error() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let (finals, hook) = counter();
        sup.set_final_hook(Some(hook));

        sup.start(script("import missing_module"), modules());
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(sup.status(), ExecutionStatus::Error);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        let errors = logs.at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("[EXEC]Import Error"));
        assert!(errors[0].contains("script line 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_near_deadline() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let (finals, hook) = counter();
        sup.set_final_hook(Some(hook));
        sup.set_timeout(Some(Duration::from_secs(2)));

        sup.start(script("time.sleep(10)"), modules());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sup.status(), ExecutionStatus::Running);
        assert_eq!(finals.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sup.status(), ExecutionStatus::Cancelled);
        assert_eq!(finals.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(finals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_timeout_race_fires_final_once() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let (finals, hook) = counter();
        sup.set_final_hook(Some(hook));
        sup.set_timeout(Some(Duration::from_millis(250)));

        sup.start(script("while True:\n    await asyncio.sleep(0.05)"), modules());
        tokio::time::sleep(Duration::from_millis(240)).await;
        sup.stop();
        sup.stop();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sup.status(), ExecutionStatus::Cancelled);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_concludes_active_run() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let (finals, hook) = counter();
        sup.set_final_hook(Some(hook));

        let first = sup.start(script("while True:\n    await asyncio.sleep(0.05)"), modules());
        let second = sup.start(script("await asyncio.sleep(0.3)\nprint('second')"), modules());

        assert_eq!((first, second), (1, 2));
        assert!(sup.is_running());
        assert_eq!(sup.active_id(), Some(2));
        assert_eq!(sup.run_id(), 2);
        assert_eq!(finals.load(Ordering::SeqCst), 1);
        assert_eq!(sup.status(), ExecutionStatus::Running);
        assert!(logs
            .at(LogLevel::Info)
            .contains(&"[EXEC]Execution stopped manually.".to_string()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sup.status(), ExecutionStatus::Done);
        assert_eq!(finals.load(Ordering::SeqCst), 2);
        assert!(logs.at(LogLevel::Info).contains(&"[SCRIPT] second".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_only_logs() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let mut status = sup.subscribe();

        sup.stop();
        sup.stop();

        assert_eq!(sup.status(), ExecutionStatus::Idle);
        assert!(!status.has_changed().unwrap());
        assert_eq!(logs.at(LogLevel::Info).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_hook_precedes_task() {
        let logs = CapturedLogs::default();
        let sup = supervisor(&logs);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o = order.clone();
        let sup_in_hook = sup.clone();
        sup.set_start_hook(Some(Arc::new(move || {
            o.lock().unwrap().push(format!("start:{}", sup_in_hook.status()));
        })));

        sup.start(script("print('body')"), modules());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*order.lock().unwrap(), vec!["start:RUNNING".to_string()]);
        assert!(logs.at(LogLevel::Info).contains(&"[SCRIPT] body".to_string()));
    }
}
