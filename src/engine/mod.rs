//! Script execution engine
//!
//! Submitted text flows through [`screen`], [`rewrite`] and [`runner`] and is
//! then owned by the [`supervisor`] until it reaches a terminal status. The
//! [`Engine`] handle in [`ingress`] is the only entry point the rest of the
//! controller uses.

pub mod error;
pub mod hooks;
pub mod ingress;
pub mod rewrite;
pub mod runner;
pub mod screen;
pub mod script;
pub mod supervisor;

pub use error::ScriptError;
pub use hooks::{LogHooks, LogLevel};
pub use ingress::{DispatchAction, Engine, EngineOptions};
pub use script::{Module, NativeObject, Value};
