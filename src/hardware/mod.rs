//! Peripheral registry
//!
//! One [`HardwareContext`] is built at start-up and owns every peripheral,
//! indexed by channel. Scripts reach it through the `hardware` module, whose
//! constructors hand out the shared instances instead of creating new ones.

pub mod leds;
pub mod motors;
pub mod servos;

use std::sync::Arc;

use tracing::info;

use crate::engine::{Module, NativeObject, ScriptError, Value};

pub use leds::Led;
pub use motors::Motors;
pub use servos::Servos;

/// Import name of the peripheral module
pub const MODULE_NAME: &str = "hardware";

#[derive(Debug)]
pub struct HardwareContext {
    motors: Arc<Motors>,
    servos: Arc<Servos>,
    leds: Vec<Arc<Led>>,
}

impl HardwareContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            motors: Arc::new(Motors::default()),
            servos: Arc::new(Servos::default()),
            leds: leds::CHANNELS.iter().map(|ch| Arc::new(Led::new(ch))).collect(),
        })
    }

    pub fn motors(&self) -> Arc<Motors> {
        self.motors.clone()
    }

    pub fn servos(&self) -> Arc<Servos> {
        self.servos.clone()
    }

    pub fn led(&self, channel: &str) -> Option<Arc<Led>> {
        self.leds.iter().find(|led| led.channel() == channel).cloned()
    }

    /// Put outputs back to rest: motors stopped, LEDs off
    pub fn release(&self) {
        self.motors.stop_all();
        for led in &self.leds {
            led.off();
        }
        info!("[HW] Outputs released");
    }

    /// The `hardware` module exposed to scripts
    pub fn script_module(self: &Arc<Self>) -> Module {
        let factory = |kind| {
            Value::Native(Arc::new(Factory {
                kind,
                hw: self.clone(),
            }))
        };
        Module::new(MODULE_NAME)
            .with("Motors", factory(FactoryKind::Motors))
            .with("Servos", factory(FactoryKind::Servos))
            .with("Led", factory(FactoryKind::Led))
    }
}

#[derive(Debug, Clone, Copy)]
enum FactoryKind {
    Motors,
    Servos,
    Led,
}

/// Script-side constructor returning the registry's instance
#[derive(Debug)]
struct Factory {
    kind: FactoryKind,
    hw: Arc<HardwareContext>,
}

impl NativeObject for Factory {
    fn type_name(&self) -> &str {
        "type"
    }

    fn call(&self, args: &[Value]) -> Result<Value, ScriptError> {
        match self.kind {
            FactoryKind::Motors => {
                expect_none("Motors", args)?;
                Ok(Value::Native(self.hw.motors()))
            }
            FactoryKind::Servos => {
                expect_none("Servos", args)?;
                Ok(Value::Native(self.hw.servos()))
            }
            FactoryKind::Led => {
                let channel = match args {
                    [channel] => channel.as_str()?,
                    _ => return Err(ScriptError::runtime("Led() takes exactly one channel name")),
                };
                self.hw
                    .led(channel)
                    .map(|led| Value::Native(led))
                    .ok_or_else(|| {
                        ScriptError::runtime(format!("Invalid LED channel '{channel}'"))
                    })
            }
        }
    }
}

fn expect_none(name: &str, args: &[Value]) -> Result<(), ScriptError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ScriptError::runtime(format!("{name}() takes no arguments")))
    }
}

/// Integer argument `idx` of a method taking exactly `count` arguments
pub(crate) fn arg_int(
    method: &str,
    args: &[Value],
    idx: usize,
    count: usize,
) -> Result<i64, ScriptError> {
    if args.len() != count {
        return Err(ScriptError::runtime(format!(
            "{method}() takes {count} argument(s) but {} were given",
            args.len()
        )));
    }
    args[idx].as_int()
}

/// 1-based channel number to array index
pub(crate) fn channel_index(kind: &str, channel: i64, count: usize) -> Result<usize, ScriptError> {
    if channel >= 1 && channel <= count as i64 {
        Ok(channel as usize - 1)
    } else {
        Err(ScriptError::runtime(format!(
            "Invalid {kind} index {channel}. Must be between 1 and {count}."
        )))
    }
}
