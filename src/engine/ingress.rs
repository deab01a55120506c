//! Ingress and dispatch loop
//!
//! [`Engine`] is the public handle of the execution engine. `run` only stores
//! the submitted text; the dispatch loop picks it up on its next tick, screens,
//! rewrites and compiles it, and hands it to the supervisor. A submission that
//! arrives while a run is active first stops that run and stays pending until
//! the status has left RUNNING.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rc_shared::{timing, ExecutionStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::error::SubmitError;
use super::hooks::LogHooks;
use super::rewrite::{rewrite, RemapRule, DEFAULT_PREAMBLE};
use super::runner::{self, CompiledScript};
use super::screen::screen;
use super::script::{Module, ModuleRegistry};
use super::supervisor::Supervisor;

/// Scheduling intervals of the engine
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub dispatch_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dispatch_interval: Duration::from_millis(timing::DISPATCH_INTERVAL_MS),
            poll_interval: Duration::from_millis(timing::SUPERVISOR_POLL_MS),
        }
    }
}

/// What one dispatch tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchAction {
    /// Nothing pending
    Idle,
    /// A run was active; it was asked to stop and the text stays pending
    Preempted,
    Started(u64),
    Rejected,
    CompileFailed,
}

struct Inner {
    pending: Mutex<String>,
    preamble: RwLock<Vec<String>>,
    remap: RwLock<Vec<RemapRule>>,
    denylist: RwLock<Vec<String>>,
    modules: RwLock<Arc<ModuleRegistry>>,
    supervisor: Arc<Supervisor>,
    dispatch_interval: Duration,
    log: LogHooks,
}

/// Handle to the execution engine; clones share the same engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(options: EngineOptions, log: LogHooks) -> Self {
        let supervisor = Arc::new(Supervisor::new(options.poll_interval, log.clone()));
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(String::new()),
                preamble: RwLock::new(DEFAULT_PREAMBLE.iter().map(|l| l.to_string()).collect()),
                remap: RwLock::new(Vec::new()),
                denylist: RwLock::new(Vec::new()),
                modules: RwLock::new(Arc::new(ModuleRegistry::with_defaults())),
                supervisor,
                dispatch_interval: options.dispatch_interval,
                log,
            }),
        }
    }

    /// Queue a script, replacing anything still pending; returns immediately
    pub fn run(&self, text: impl Into<String>) {
        let text = text.into();
        self.inner
            .log
            .info(&format!("[EXEC]RUN CODE SIZE:{}", text.len()));
        if let Ok(mut pending) = self.inner.pending.lock() {
            *pending = text;
        }
    }

    /// Request cancellation of the active run; a logged no-op when idle
    pub fn stop(&self) {
        self.inner.supervisor.stop();
    }

    pub fn status(&self) -> ExecutionStatus {
        self.inner.supervisor.status()
    }

    /// Receiver that observes every status transition
    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.inner.supervisor.subscribe()
    }

    pub fn run_id(&self) -> u64 {
        self.inner.supervisor.run_id()
    }

    pub fn register_start_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.supervisor.set_start_hook(Some(Arc::new(hook)));
    }

    pub fn register_final_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.supervisor.set_final_hook(Some(Arc::new(hook)));
    }

    /// Lines placed before every script body
    pub fn register_default_preamble<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        if let Ok(mut preamble) = self.inner.preamble.write() {
            *preamble = lines;
        }
    }

    /// Ordered `from -> to` symbol rules, applied to future runs
    pub fn register_remap_rules<I, K, V>(&self, rules: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let rules = rules
            .into_iter()
            .map(|(from, to)| RemapRule::new(from, to))
            .collect();
        if let Ok(mut remap) = self.inner.remap.write() {
            *remap = rules;
        }
    }

    pub fn register_denylist<I, S>(&self, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = entries.into_iter().map(Into::into).collect();
        if let Ok(mut denylist) = self.inner.denylist.write() {
            *denylist = entries;
        }
    }

    /// Wall-clock budget for each run; `None` disables it
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.inner.supervisor.set_timeout(timeout);
    }

    /// Make a host module importable by future runs
    pub fn register_module(&self, module: Module) {
        if let Ok(mut modules) = self.inner.modules.write() {
            Arc::make_mut(&mut modules).register(module);
        }
    }

    /// Run the dispatch loop on its own task
    pub fn spawn_dispatcher(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.inner.dispatch_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            engine.inner.log.debug("[EXEC]Dispatch loop started");
            loop {
                interval.tick().await;
                engine.dispatch_once();
            }
        })
    }

    /// One tick of the dispatch loop
    pub fn dispatch_once(&self) -> DispatchAction {
        let has_pending = self
            .inner
            .pending
            .lock()
            .map(|p| !p.is_empty())
            .unwrap_or(false);
        if !has_pending {
            return DispatchAction::Idle;
        }

        if self.status() == ExecutionStatus::Running {
            self.inner.supervisor.stop();
            return DispatchAction::Preempted;
        }

        let text = match self.inner.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return DispatchAction::Idle,
        };

        match self.prepare(&text) {
            Ok(script) => {
                let modules = self.modules();
                DispatchAction::Started(self.inner.supervisor.start(script, modules))
            }
            Err(SubmitError::RejectedUnsafe { entry, .. }) => {
                self.inner
                    .log
                    .debug(&format!("[EXEC]Submission rejected by '{entry}'"));
                DispatchAction::Rejected
            }
            Err(SubmitError::Compile { location, source }) => {
                self.inner.log.error(&format!(
                    "[EXEC]Compile Error at {}: {}",
                    location, source.message
                ));
                DispatchAction::CompileFailed
            }
        }
    }

    /// Screen, rewrite, screen the rewritten script again, compile
    fn prepare(&self, text: &str) -> Result<CompiledScript, SubmitError> {
        let denylist = read(&self.inner.denylist);
        screen(text, &denylist, &self.inner.log)?;

        let body = rewrite(text, &read(&self.inner.remap), &read(&self.inner.preamble));
        screen(&body.script_text(), &denylist, &self.inner.log)?;

        runner::compile(body)
    }

    fn modules(&self) -> Arc<ModuleRegistry> {
        self.inner
            .modules
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|_| Arc::new(ModuleRegistry::with_defaults()))
    }
}

fn read<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    lock.read().map(|v| v.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hooks::testing::CapturedLogs;
    use crate::engine::hooks::LogLevel;
    use crate::engine::script::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn engine(logs: &CapturedLogs) -> Engine {
        let engine = Engine::new(EngineOptions::default(), logs.hooks());
        engine.spawn_dispatcher();
        engine
    }

    fn events(engine: &Engine) -> Arc<std::sync::Mutex<Vec<String>>> {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let e = events.clone();
        engine.register_start_hook(move || e.lock().unwrap().push("start".to_string()));
        let e = events.clone();
        let observer = engine.clone();
        engine.register_final_hook(move || {
            e.lock().unwrap().push(format!("final:{}", observer.status()));
        });
        events
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_is_deferred_to_dispatch() {
        let logs = CapturedLogs::default();
        let engine = Engine::new(EngineOptions::default(), logs.hooks());

        engine.run("await asyncio.sleep(1)");
        assert_eq!(engine.status(), ExecutionStatus::Idle);

        assert!(matches!(engine.dispatch_once(), DispatchAction::Started(1)));
        assert_eq!(engine.status(), ExecutionStatus::Running);
        assert_eq!(engine.dispatch_once(), DispatchAction::Idle);
        assert_eq!(logs.at(LogLevel::Info)[0], "[EXEC]RUN CODE SIZE:22");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_keeps_loop_alive() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        let events = events(&engine);
        engine.register_denylist(["open"]);

        engine.run("open('/secret')");
        wait(300).await;

        assert_eq!(engine.status(), ExecutionStatus::Idle);
        assert_eq!(logs.at(LogLevel::Warn).len(), 1);
        assert!(events.lock().unwrap().is_empty());

        engine.run("print('still here')");
        wait(500).await;
        assert_eq!(engine.status(), ExecutionStatus::Done);
        assert!(logs
            .at(LogLevel::Info)
            .contains(&"[SCRIPT] still here".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remapped_text_is_screened_again() {
        let logs = CapturedLogs::default();
        let engine = Engine::new(EngineOptions::default(), logs.hooks());
        let events = events(&engine);
        engine.register_remap_rules([("Shout", "open")]);
        engine.register_denylist(["open"]);

        engine.run("Shout('x')");
        assert_eq!(engine.dispatch_once(), DispatchAction::Rejected);

        assert_eq!(engine.status(), ExecutionStatus::Idle);
        assert_eq!(
            logs.at(LogLevel::Warn),
            vec!["[EXEC]Unsafe command - open('x')".to_string()]
        );
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pathological_nesting_fails_to_compile() {
        let logs = CapturedLogs::default();
        let engine = Engine::new(EngineOptions::default(), logs.hooks());
        let events = events(&engine);

        let submissions = [
            format!("x = {}1{}", "(".repeat(20_000), ")".repeat(20_000)),
            format!("x = {}1", "not ".repeat(15_000)),
            format!("x = 1{}", "+1".repeat(30_000)),
            format!("x = {}1", "-".repeat(20_000)),
            format!("print({}1{})", "abs(".repeat(10_000), ")".repeat(10_000)),
        ];
        for text in submissions {
            engine.run(text);
            assert_eq!(engine.dispatch_once(), DispatchAction::CompileFailed);
            assert_eq!(engine.status(), ExecutionStatus::Idle);
        }
        assert_eq!(logs.at(LogLevel::Error).len(), 5);
        assert!(events.lock().unwrap().is_empty());

        engine.run("x = ((1 + 2) * -3)");
        assert!(matches!(engine.dispatch_once(), DispatchAction::Started(_)));
        wait(200).await;
        assert_eq!(engine.status(), ExecutionStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_long_sleep() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        engine.set_timeout(Some(Duration::from_secs(2)));
        let finished_at = Arc::new(std::sync::Mutex::new(Vec::new()));
        let f = finished_at.clone();
        engine.register_final_hook(move || f.lock().unwrap().push(Instant::now()));

        let submitted = Instant::now();
        engine.run("time.sleep(10)");

        wait(1000).await;
        assert_eq!(engine.status(), ExecutionStatus::Running);

        wait(1500).await;
        assert_eq!(engine.status(), ExecutionStatus::Cancelled);

        wait(10_000).await;
        let finished_at = finished_at.lock().unwrap();
        assert_eq!(finished_at.len(), 1);
        let elapsed = finished_at[0] - submitted;
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_observed_within_one_poll() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        let events = events(&engine);

        engine.run("n = 0\nwhile True:\n    n += 1\n    await asyncio.sleep(0.01)");
        wait(310).await;
        assert_eq!(engine.status(), ExecutionStatus::Running);

        engine.stop();
        assert_eq!(engine.status(), ExecutionStatus::Running);

        wait(100).await;
        assert_eq!(engine.status(), ExecutionStatus::Cancelled);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start".to_string(), "final:CANCELLED".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        let events = events(&engine);

        engine.run("await asyncio.sleep(0.1)");
        wait(500).await;
        assert_eq!(engine.status(), ExecutionStatus::Done);

        engine.stop();
        engine.stop();
        wait(500).await;

        assert_eq!(engine.status(), ExecutionStatus::Done);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["start".to_string(), "final:DONE".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_compile_error_leaves_status_unchanged() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        let events = events(&engine);

        engine.run("x = = 1");
        wait(300).await;
        assert_eq!(engine.status(), ExecutionStatus::Idle);
        assert!(events.lock().unwrap().is_empty());
        let errors = logs.at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("script line 1"));

        engine.run("pass");
        wait(500).await;
        assert_eq!(engine.status(), ExecutionStatus::Done);

        engine.run("while True\n    pass");
        wait(500).await;
        assert_eq!(engine.status(), ExecutionStatus::Done);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_submission_preempts_active_run() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        let events = events(&engine);

        engine.run("while True:\n    print('A')\n    await asyncio.sleep(0.05)");
        wait(500).await;
        engine.run("print('B')\nawait asyncio.sleep(5)");
        wait(1000).await;

        assert_eq!(engine.status(), ExecutionStatus::Running);
        assert_eq!(engine.run_id(), 2);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                "start".to_string(),
                "final:CANCELLED".to_string(),
                "start".to_string(),
            ]
        );

        let output: Vec<String> = logs
            .at(LogLevel::Info)
            .into_iter()
            .filter(|l| l.starts_with("[SCRIPT]"))
            .collect();
        let first_b = output.iter().position(|l| l == "[SCRIPT] B").unwrap();
        assert!(first_b > 0);
        assert!(output[first_b..].iter().all(|l| l != "[SCRIPT] A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remap_and_preamble_apply_to_runs() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        engine.register_remap_rules([("Shout", "print")]);
        engine.register_default_preamble(["import uasyncio as asyncio", "greeting = 'hi'"]);

        engine.run("Shout(greeting)");
        wait(500).await;

        assert_eq!(engine.status(), ExecutionStatus::Done);
        assert!(logs.at(LogLevel::Info).contains(&"[SCRIPT] hi".to_string()));
    }

    #[derive(Debug)]
    struct Counter(AtomicUsize);

    impl crate::engine::script::NativeObject for Counter {
        fn type_name(&self) -> &str {
            "Counter"
        }

        fn call(&self, _args: &[Value]) -> Result<Value, crate::engine::error::ScriptError> {
            Ok(Value::Int(self.0.fetch_add(1, Ordering::SeqCst) as i64 + 1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_module_is_importable() {
        let logs = CapturedLogs::default();
        let engine = engine(&logs);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        engine.register_module(Module::new("probe").with("tick", Value::Native(counter.clone())));

        engine.run("from probe import tick\nfor _ in range(3):\n    tick()");
        wait(500).await;

        assert_eq!(engine.status(), ExecutionStatus::Done);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }
}
