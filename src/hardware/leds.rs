//! RGB status LEDs

use std::sync::Mutex;

use tracing::debug;

use crate::engine::{NativeObject, ScriptError, Value};

use super::arg_int;

/// Channel names a script may ask for
pub const CHANNELS: &[&str] = &["LED1", "LED2"];

#[derive(Debug)]
pub struct Led {
    channel: &'static str,
    rgb: Mutex<(u8, u8, u8)>,
}

impl Led {
    pub fn new(channel: &'static str) -> Self {
        Self {
            channel,
            rgb: Mutex::new((0, 0, 0)),
        }
    }

    pub fn channel(&self) -> &str {
        self.channel
    }

    pub fn set_color(&self, r: u8, g: u8, b: u8) {
        if let Ok(mut rgb) = self.rgb.lock() {
            *rgb = (r, g, b);
        }
        debug!("[HW] {} color=({}, {}, {})", self.channel, r, g, b);
    }

    pub fn off(&self) {
        self.set_color(0, 0, 0);
    }

    pub fn color(&self) -> (u8, u8, u8) {
        self.rgb.lock().map(|c| *c).unwrap_or_default()
    }
}

fn component(method: &str, args: &[Value], idx: usize) -> Result<u8, ScriptError> {
    let value = arg_int(method, args, idx, 3)?;
    u8::try_from(value)
        .map_err(|_| ScriptError::runtime(format!("[leds]color value {value} out of range (0..255)")))
}

impl NativeObject for Led {
    fn type_name(&self) -> &str {
        "Led"
    }

    fn call_method(&self, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        match method {
            "set_color" => {
                let (r, g, b) = (
                    component(method, args, 0)?,
                    component(method, args, 1)?,
                    component(method, args, 2)?,
                );
                self.set_color(r, g, b);
                Ok(Value::None)
            }
            "off" if args.is_empty() => {
                self.off();
                Ok(Value::None)
            }
            _ => Err(ScriptError::runtime(format!(
                "'Led' object has no attribute '{method}' taking {} argument(s)",
                args.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_components_checked() {
        let led = Led::new("LED1");
        led.call_method("set_color", &[Value::Int(255), Value::Int(0), Value::Int(8)])
            .unwrap();
        assert_eq!(led.color(), (255, 0, 8));

        assert!(led
            .call_method("set_color", &[Value::Int(256), Value::Int(0), Value::Int(0)])
            .is_err());
        assert!(led.call_method("set_color", &[Value::Int(1)]).is_err());

        led.call_method("off", &[]).unwrap();
        assert_eq!(led.color(), (0, 0, 0));
    }
}
