//! Runtime values and host modules

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::error::ScriptError;

/// Functions implemented by the interpreter itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Range,
    Int,
    Float,
    Str,
    Abs,
    Min,
    Max,
    /// `asyncio.sleep`: returns an awaitable, suspends only when awaited
    Sleep,
    /// `asyncio.sleep_ms`
    SleepMs,
    /// `time.sleep` reached without the rewrite (e.g. `from time import sleep`);
    /// still suspends cooperatively, the controller is never blocked
    TimeSleep,
    TimeSleepMs,
    TicksMs,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Range => "range",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sleep | Builtin::TimeSleep => "sleep",
            Builtin::SleepMs | Builtin::TimeSleepMs => "sleep_ms",
            Builtin::TicksMs => "ticks_ms",
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Some(match name {
            "print" => Builtin::Print,
            "range" => Builtin::Range,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            _ => return None,
        })
    }
}

/// Host object a script can call into
///
/// Implementations are shared with the rest of the controller, so they must
/// not block: every call runs on the scheduler thread.
pub trait NativeObject: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    /// `obj(...)`
    fn call(&self, _args: &[Value]) -> Result<Value, ScriptError> {
        Err(ScriptError::runtime(format!(
            "'{}' object is not callable",
            self.type_name()
        )))
    }

    /// `obj.method(...)`
    fn call_method(&self, method: &str, _args: &[Value]) -> Result<Value, ScriptError> {
        Err(ScriptError::runtime(format!(
            "'{}' object has no attribute '{}'",
            self.type_name(),
            method
        )))
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Range { start: i64, stop: i64, step: i64 },
    Builtin(Builtin),
    Module(Arc<Module>),
    Native(Arc<dyn NativeObject>),
    /// Pending cooperative suspension created by `asyncio.sleep`
    Sleep(Duration),
    /// The run's cancellation signal, exposed as `stop_event`
    StopEvent(CancellationToken),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Range { .. } => "range",
            Value::Builtin(_) => "builtin_function",
            Value::Module(_) => "module",
            Value::Native(obj) => obj.type_name(),
            Value::Sleep(_) => "coroutine",
            Value::StopEvent(_) => "Event",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Result<i64, ScriptError> {
        match self {
            Value::Int(n) => Ok(*n),
            Value::Bool(b) => Ok(*b as i64),
            other => Err(ScriptError::runtime(format!(
                "expected an integer, got '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn as_float(&self) -> Result<f64, ScriptError> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            Value::Bool(b) => Ok(*b as i64 as f64),
            other => Err(ScriptError::runtime(format!(
                "expected a number, got '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, ScriptError> {
        match self {
            Value::Str(s) => Ok(&**s),
            other => Err(ScriptError::runtime(format!(
                "expected a string, got '{}'",
                other.type_name()
            ))),
        }
    }

    /// Script-level equality; numbers compare across int/float
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                matches!((self.as_float(), other.as_float()), (Ok(a), Ok(b)) if a == b)
            }
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                matches!((self.as_int(), other.as_int()), (Ok(a), Ok(b)) if a == b)
            }
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{x:.1}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Range { start, stop, step } if *step == 1 => {
                write!(f, "range({start}, {stop})")
            }
            Value::Range { start, stop, step } => write!(f, "range({start}, {stop}, {step})"),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Value::Module(m) => write!(f, "<module '{}'>", m.name),
            Value::Native(obj) => write!(f, "<{} object>", obj.type_name()),
            Value::Sleep(_) => write!(f, "<coroutine sleep>"),
            Value::StopEvent(_) => write!(f, "<Event>"),
        }
    }
}

/// Number of values a range yields; the span of two i64 bounds always fits in a u64
pub fn range_len(start: i64, stop: i64, step: i64) -> u64 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let len = if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    len as u64
}

/// The `index`-th value of a range, if it is representable
pub fn range_nth(start: i64, step: i64, index: u64) -> Option<i64> {
    let value = start as i128 + (index as i128).checked_mul(step as i128)?;
    i64::try_from(value).ok()
}

/// Named collection of values a script can import
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    members: BTreeMap<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }
}

/// Modules available to `import`, keyed by import name
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<Module>>,
}

impl ModuleRegistry {
    /// Registry with the modules every script can rely on
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();

        let asyncio = Module::new("uasyncio")
            .with("sleep", Value::Builtin(Builtin::Sleep))
            .with("sleep_ms", Value::Builtin(Builtin::SleepMs));
        registry.register(asyncio.clone());
        registry.register_as("asyncio", asyncio);

        for name in ["time", "utime"] {
            registry.register(
                Module::new(name)
                    .with("sleep", Value::Builtin(Builtin::TimeSleep))
                    .with("sleep_ms", Value::Builtin(Builtin::TimeSleepMs))
                    .with("ticks_ms", Value::Builtin(Builtin::TicksMs)),
            );
        }

        registry
    }

    pub fn register(&mut self, module: Module) {
        let name = module.name.clone();
        self.modules.insert(name, Arc::new(module));
    }

    /// Register a module under an import name other than its own
    pub fn register_as(&mut self, import_name: impl Into<String>, module: Module) {
        self.modules.insert(import_name.into(), Arc::new(module));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name).cloned()
    }
}
