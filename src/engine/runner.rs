//! Task compiler and runner
//!
//! Compilation is synchronous and never touches the scheduler, so a malformed
//! script is reported before any lifecycle hook fires. Spawning hands the
//! program to the interpreter as a tokio task.

use std::any::Any;

use tokio::task::{JoinError, JoinHandle};

use super::error::{RunOutcome, ScriptError, SubmitError};
use super::rewrite::{ExecutableBody, BODY_INDENT};
use super::script::{parse, Interpreter, Program, RunEnv};

/// A body that parsed cleanly
#[derive(Debug)]
pub struct CompiledScript {
    program: Program,
    body: ExecutableBody,
}

impl CompiledScript {
    pub fn body(&self) -> &ExecutableBody {
        &self.body
    }
}

/// Compile an executable body; errors name the offending script line
pub fn compile(body: ExecutableBody) -> Result<CompiledScript, SubmitError> {
    match parse(&body.text, BODY_INDENT) {
        Ok(program) => Ok(CompiledScript { program, body }),
        Err(source) => Err(SubmitError::Compile {
            location: body.locate(source.line).to_string(),
            source,
        }),
    }
}

/// Schedule a compiled script on the current runtime
pub fn spawn(script: CompiledScript, env: RunEnv) -> TaskHandle {
    let CompiledScript { program, body } = script;
    let handle = tokio::spawn(async move {
        let mut interp = Interpreter::new(env);
        interp.run(&program).await
    });
    TaskHandle { handle, body }
}

/// Handle to a spawned script: completion polling and forced cancellation
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<Result<(), ScriptError>>,
    body: ExecutableBody,
}

impl TaskHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task at its next suspension point
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the task and classify how it ended
    pub async fn outcome(&mut self) -> RunOutcome {
        match (&mut self.handle).await {
            Ok(Ok(())) => RunOutcome::Completed,
            Ok(Err(e)) => RunOutcome::Failed(e),
            Err(e) if e.is_cancelled() => RunOutcome::ManualCancel,
            Err(e) => RunOutcome::Crashed(panic_message(e)),
        }
    }

    /// Describe a script error with its position in the submitted text
    pub fn describe(&self, error: &ScriptError) -> String {
        match error {
            ScriptError::Dependency { line, message } | ScriptError::Runtime { line, message } => {
                format!("{} ({})", message, self.body.locate(*line))
            }
        }
    }
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => payload_str(payload.as_ref()),
        Err(e) => e.to_string(),
    }
}

fn payload_str(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hooks::LogHooks;
    use crate::engine::rewrite::rewrite;
    use crate::engine::script::ModuleRegistry;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn preamble() -> Vec<String> {
        vec!["import uasyncio as asyncio".to_string()]
    }

    fn env() -> RunEnv {
        RunEnv {
            modules: Arc::new(ModuleRegistry::with_defaults()),
            log: LogHooks::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn test_compile_error_names_script_line() {
        let body = rewrite("x = 1\ny = (2 +", &[], &preamble());
        match compile(body) {
            Err(SubmitError::Compile { location, source }) => {
                assert_eq!(location, "script line 2");
                assert_eq!(source.line, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawned_script_completes() {
        let script = compile(rewrite("x = 1 + 1", &[], &preamble())).unwrap();
        let mut task = spawn(script, env());
        assert_eq!(task.outcome().await, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_runtime_error_described_in_script_terms() {
        let script = compile(rewrite("x = 1\ny = x / 0", &[], &preamble())).unwrap();
        let mut task = spawn(script, env());
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }

        let error = match task.outcome().await {
            RunOutcome::Failed(e) => e,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(error.line(), 3);
        assert_eq!(task.describe(&error), "division by zero (script line 2)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_reports_cancel() {
        let script = compile(rewrite("time.sleep(60)", &[], &preamble())).unwrap();
        let mut task = spawn(script, env());
        tokio::task::yield_now().await;

        task.abort();
        assert_eq!(task.outcome().await, RunOutcome::ManualCancel);
    }
}
