//! Async evaluator for compiled scripts
//!
//! Every loop iteration yields to the scheduler, so a script can never starve
//! the controller and a forced abort always finds a suspension point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::ast::{BinOp, Expr, Literal, Program, Stmt, StmtKind, UnaryOp};
use super::value::{range_len, range_nth, Builtin, ModuleRegistry, Value};
use crate::engine::error::ScriptError;
use crate::engine::hooks::LogHooks;

/// Name under which the run's cancellation signal is visible to scripts
pub const STOP_EVENT_NAME: &str = "stop_event";

/// Longest string a script may build with `*`
const MAX_STR_LEN: usize = 64 * 1024;

/// Everything a run can reach from the outside
#[derive(Debug, Clone)]
pub struct RunEnv {
    pub modules: Arc<ModuleRegistry>,
    pub log: LogHooks,
    pub cancel: CancellationToken,
}

enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    env: RunEnv,
    started: Instant,
}

impl Interpreter {
    pub fn new(env: RunEnv) -> Self {
        let mut globals = HashMap::new();
        globals.insert(
            STOP_EVENT_NAME.to_string(),
            Value::StopEvent(env.cancel.clone()),
        );
        if let Some(asyncio) = env.modules.get("uasyncio") {
            globals.insert("asyncio".to_string(), Value::Module(asyncio));
        }

        Self {
            globals,
            env,
            started: Instant::now(),
        }
    }

    pub async fn run(&mut self, program: &Program) -> Result<(), ScriptError> {
        match self.exec_block(&program.body).await? {
            Flow::Normal => Ok(()),
            Flow::Break | Flow::Continue => {
                Err(ScriptError::runtime("'break' or 'continue' outside loop"))
            }
        }
    }

    #[cfg(test)]
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn exec_block<'a>(&'a mut self, block: &'a [Stmt]) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            for stmt in block {
                let flow = self.exec(stmt).await.map_err(|e| e.at_line(stmt.line))?;
                if !matches!(flow, Flow::Normal) {
                    return Ok(flow);
                }
            }
            Ok(Flow::Normal)
        })
    }

    async fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        match &stmt.kind {
            StmtKind::Import(import) => {
                let module = self.env.modules.get(&import.name).ok_or_else(|| {
                    ScriptError::dependency(format!("no module named '{}'", import.name))
                })?;
                self.globals
                    .insert(import.binding().to_string(), Value::Module(module));
            }
            StmtKind::FromImport { module, names } => {
                let found = self.env.modules.get(module).ok_or_else(|| {
                    ScriptError::dependency(format!("no module named '{module}'"))
                })?;
                for import in names {
                    let value = found.get(&import.name).cloned().ok_or_else(|| {
                        ScriptError::dependency(format!(
                            "cannot import name '{}' from '{}'",
                            import.name, module
                        ))
                    })?;
                    self.globals.insert(import.binding().to_string(), value);
                }
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value).await?;
                self.globals.insert(target.clone(), value);
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.lookup(target)?;
                let rhs = self.eval(value).await?;
                let result = binary(*op, &current, &rhs)?;
                self.globals.insert(target.clone(), result);
            }
            StmtKind::Expr(expr) => {
                if let Value::Sleep(_) = self.eval(expr).await? {
                    self.env.log.warn(&format!(
                        "[EXEC]line {}: sleep() result was never awaited",
                        stmt.line
                    ));
                }
            }
            StmtKind::While { cond, body } => loop {
                if !self.eval(cond).await?.truthy() {
                    break;
                }
                let flow = self.exec_block(body).await?;
                tokio::task::yield_now().await;
                if let Flow::Break = flow {
                    break;
                }
            },
            StmtKind::For { var, iter, body } => {
                let (start, stop, step) = match self.eval(iter).await? {
                    Value::Range { start, stop, step } => (start, stop, step),
                    other => {
                        return Err(ScriptError::runtime(format!(
                            "'{}' object is not iterable",
                            other.type_name()
                        )))
                    }
                };
                for index in 0..range_len(start, stop, step) {
                    let current = range_nth(start, step, index)
                        .ok_or_else(|| ScriptError::runtime("integer overflow"))?;
                    self.globals.insert(var.clone(), Value::Int(current));
                    let flow = self.exec_block(body).await?;
                    tokio::task::yield_now().await;
                    if let Flow::Break = flow {
                        break;
                    }
                }
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond).await?.truthy() {
                        return self.exec_block(body).await;
                    }
                }
                return self.exec_block(orelse).await;
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        Builtin::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| ScriptError::runtime(format!("name '{name}' is not defined")))
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(lit) => Ok(match lit {
                    Literal::None => Value::None,
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Int(n) => Value::Int(*n),
                    Literal::Float(f) => Value::Float(*f),
                    Literal::Str(s) => Value::str(s.as_str()),
                }),
                Expr::Name(name) => self.lookup(name),
                Expr::Attr(target, attr) => {
                    let target = self.eval(target).await?;
                    attribute(&target, attr)
                }
                Expr::Call(callee, args) => {
                    if let Expr::Attr(target, method) = &**callee {
                        let target = self.eval(target).await?;
                        let args = self.eval_args(args).await?;
                        return self.call_method(&target, method, &args).await;
                    }
                    let callee = self.eval(callee).await?;
                    let args = self.eval_args(args).await?;
                    self.call_value(&callee, &args).await
                }
                Expr::Unary(op, operand) => {
                    let value = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                        UnaryOp::Neg => match value {
                            Value::Int(n) => n
                                .checked_neg()
                                .map(Value::Int)
                                .ok_or_else(|| ScriptError::runtime("integer overflow")),
                            Value::Bool(b) => Ok(Value::Int(-(b as i64))),
                            Value::Float(f) => Ok(Value::Float(-f)),
                            other => Err(ScriptError::runtime(format!(
                                "bad operand type for unary -: '{}'",
                                other.type_name()
                            ))),
                        },
                    }
                }
                Expr::Binary(op, lhs, rhs) => {
                    let lhs = self.eval(lhs).await?;
                    let rhs = self.eval(rhs).await?;
                    binary(*op, &lhs, &rhs)
                }
                Expr::And(lhs, rhs) => {
                    let lhs = self.eval(lhs).await?;
                    if !lhs.truthy() {
                        return Ok(lhs);
                    }
                    self.eval(rhs).await
                }
                Expr::Or(lhs, rhs) => {
                    let lhs = self.eval(lhs).await?;
                    if lhs.truthy() {
                        return Ok(lhs);
                    }
                    self.eval(rhs).await
                }
                Expr::Await(inner) => match self.eval(inner).await? {
                    Value::Sleep(duration) => {
                        tokio::time::sleep(duration).await;
                        Ok(Value::None)
                    }
                    other => Err(ScriptError::runtime(format!(
                        "object '{}' can't be used in 'await' expression",
                        other.type_name()
                    ))),
                },
            }
        })
    }

    async fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg).await?);
        }
        Ok(values)
    }

    async fn call_method(
        &mut self,
        target: &Value,
        method: &str,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        match target {
            Value::Native(obj) => obj.call_method(method, args),
            Value::StopEvent(token) if method == "is_set" => {
                expect_args(method, args, 0)?;
                Ok(Value::Bool(token.is_cancelled()))
            }
            other => {
                let member = attribute(other, method)?;
                self.call_value(&member, args).await
            }
        }
    }

    async fn call_value(&mut self, callee: &Value, args: &[Value]) -> Result<Value, ScriptError> {
        match callee {
            Value::Builtin(builtin) => self.call_builtin(*builtin, args).await,
            Value::Native(obj) => obj.call(args),
            other => Err(ScriptError::runtime(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    async fn call_builtin(&mut self, builtin: Builtin, args: &[Value]) -> Result<Value, ScriptError> {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                self.env.log.info(&format!("[SCRIPT] {line}"));
                Ok(Value::None)
            }
            Builtin::Range => {
                let ints = args
                    .iter()
                    .map(Value::as_int)
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => {
                        return Err(ScriptError::runtime(format!(
                            "range expected 1 to 3 arguments, got {}",
                            args.len()
                        )))
                    }
                };
                if step == 0 {
                    return Err(ScriptError::runtime("range() arg 3 must not be zero"));
                }
                Ok(Value::Range { start, stop, step })
            }
            Builtin::Int => {
                expect_args(name, args, 1)?;
                match &args[0] {
                    Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                    Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                        ScriptError::runtime(format!("invalid literal for int(): '{s}'"))
                    }),
                    other => other.as_int().map(Value::Int),
                }
            }
            Builtin::Float => {
                expect_args(name, args, 1)?;
                match &args[0] {
                    Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                        ScriptError::runtime(format!("could not convert string to float: '{s}'"))
                    }),
                    other => other.as_float().map(Value::Float),
                }
            }
            Builtin::Str => {
                expect_args(name, args, 1)?;
                Ok(Value::str(args[0].to_string()))
            }
            Builtin::Abs => {
                expect_args(name, args, 1)?;
                match &args[0] {
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => other
                        .as_int()?
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| ScriptError::runtime("integer overflow")),
                }
            }
            Builtin::Min | Builtin::Max => {
                let (first, rest) = args.split_first().ok_or_else(|| {
                    ScriptError::runtime(format!("{name}() expected at least 1 argument"))
                })?;
                let mut best = first.clone();
                for candidate in rest {
                    let ordering = compare(candidate, &best)?;
                    let better = match builtin {
                        Builtin::Min => ordering.is_lt(),
                        _ => ordering.is_gt(),
                    };
                    if better {
                        best = candidate.clone();
                    }
                }
                Ok(best)
            }
            Builtin::Sleep => {
                expect_args(name, args, 1)?;
                Ok(Value::Sleep(seconds(&args[0])?))
            }
            Builtin::SleepMs => {
                expect_args(name, args, 1)?;
                Ok(Value::Sleep(millis(&args[0])?))
            }
            Builtin::TimeSleep => {
                expect_args(name, args, 1)?;
                tokio::time::sleep(seconds(&args[0])?).await;
                Ok(Value::None)
            }
            Builtin::TimeSleepMs => {
                expect_args(name, args, 1)?;
                tokio::time::sleep(millis(&args[0])?).await;
                Ok(Value::None)
            }
            Builtin::TicksMs => {
                expect_args(name, args, 0)?;
                Ok(Value::Int(self.started.elapsed().as_millis() as i64))
            }
        }
    }
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), ScriptError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(ScriptError::runtime(format!(
            "{name}() takes {count} argument(s) but {} were given",
            args.len()
        )))
    }
}

/// Negative durations sleep for zero, like the scheduler does
fn seconds(value: &Value) -> Result<Duration, ScriptError> {
    let secs = value.as_float()?;
    if !secs.is_finite() {
        return Err(ScriptError::runtime("sleep length must be finite"));
    }
    Duration::try_from_secs_f64(secs.max(0.0))
        .map_err(|_| ScriptError::runtime("sleep length too large"))
}

fn millis(value: &Value) -> Result<Duration, ScriptError> {
    Ok(Duration::from_millis(value.as_int()?.max(0) as u64))
}

fn attribute(target: &Value, attr: &str) -> Result<Value, ScriptError> {
    match target {
        Value::Module(module) => module.get(attr).cloned().ok_or_else(|| {
            ScriptError::runtime(format!(
                "module '{}' has no attribute '{}'",
                module.name, attr
            ))
        }),
        other => Err(ScriptError::runtime(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            attr
        ))),
    }
}

enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(n) => *n as f64,
            Num::Float(f) => *f,
        }
    }
}

fn number(value: &Value) -> Option<Num> {
    match value {
        Value::Int(n) => Some(Num::Int(*n)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn type_error(op: BinOp, lhs: &Value, rhs: &Value) -> ScriptError {
    ScriptError::runtime(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, ScriptError> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => match (number(lhs), number(rhs)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => {
                let (a, b) = (a.as_f64(), b.as_f64());
                a.partial_cmp(&b)
                    .ok_or_else(|| ScriptError::runtime("cannot order NaN"))
            }
            _ => Err(ScriptError::runtime(format!(
                "'<' not supported between '{}' and '{}'",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, ScriptError> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs.equals(rhs))),
        BinOp::NotEq => return Ok(Value::Bool(!lhs.equals(rhs))),
        BinOp::Lt => return Ok(Value::Bool(compare(lhs, rhs)?.is_lt())),
        BinOp::LtEq => return Ok(Value::Bool(compare(lhs, rhs)?.is_le())),
        BinOp::Gt => return Ok(Value::Bool(compare(lhs, rhs)?.is_gt())),
        BinOp::GtEq => return Ok(Value::Bool(compare(lhs, rhs)?.is_ge())),
        _ => {}
    }

    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            return Ok(Value::str(format!("{a}{b}")));
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let count = (*n).max(0) as usize;
            if s.len().saturating_mul(count) > MAX_STR_LEN {
                return Err(ScriptError::runtime("string too long"));
            }
            return Ok(Value::str(s.repeat(count)));
        }
        _ => {}
    }

    let overflow = || ScriptError::runtime("integer overflow");
    let zero = || ScriptError::runtime("division by zero");

    match (number(lhs), number(rhs)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div if b == 0 => Err(zero()),
            BinOp::Div => Ok(Value::Float(a as f64 / b as f64)),
            BinOp::FloorDiv | BinOp::Mod if b == 0 => Err(zero()),
            BinOp::FloorDiv => {
                let q = a.checked_div(b).ok_or_else(overflow)?;
                let floored = if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q };
                Ok(Value::Int(floored))
            }
            BinOp::Mod => {
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
            }
            _ => Err(type_error(op, lhs, rhs)),
        },
        (Some(a), Some(b)) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            match op {
                BinOp::Add => Ok(Value::Float(a + b)),
                BinOp::Sub => Ok(Value::Float(a - b)),
                BinOp::Mul => Ok(Value::Float(a * b)),
                BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => Err(zero()),
                BinOp::Div => Ok(Value::Float(a / b)),
                BinOp::FloorDiv => Ok(Value::Float((a / b).floor())),
                BinOp::Mod => Ok(Value::Float(a - b * (a / b).floor())),
                _ => Err(type_error(op, lhs, rhs)),
            }
        }
        _ => Err(type_error(op, lhs, rhs)),
    }
}
