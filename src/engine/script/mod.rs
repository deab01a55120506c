//! Script language subset
//!
//! Scripts are compiled once into a [`Program`] and evaluated by an async
//! [`Interpreter`] on the controller's scheduler.

pub mod ast;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::Program;
pub use interp::{Interpreter, RunEnv, STOP_EVENT_NAME};
pub use parser::parse;
pub use value::{Module, ModuleRegistry, NativeObject, Value};
