//! Four-channel hobby servo state

use std::sync::Mutex;

use tracing::debug;

use crate::engine::{NativeObject, ScriptError, Value};

use super::{arg_int, channel_index};

pub const CHANNELS: usize = 4;
pub const MAX_ANGLE: i64 = 180;

/// 50 Hz duty for an angle: 25 at 0 degrees, 127 at 180
pub fn duty_for(angle: i64) -> i64 {
    angle * 102 / MAX_ANGLE + 25
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServoState {
    /// `None` until the servo is first positioned
    pub angle: Option<i64>,
    pub duty: i64,
}

#[derive(Debug, Default)]
pub struct Servos {
    state: Mutex<[ServoState; CHANNELS]>,
}

impl Servos {
    pub fn set_angle(&self, channel: i64, angle: i64) -> Result<(), ScriptError> {
        let idx = channel_index("servo", channel, CHANNELS)?;
        if !(0..=MAX_ANGLE).contains(&angle) {
            return Err(ScriptError::runtime(format!(
                "[servos]angle {angle} out of range (0..{MAX_ANGLE})"
            )));
        }

        let duty = duty_for(angle);
        if let Ok(mut state) = self.state.lock() {
            state[idx] = ServoState {
                angle: Some(angle),
                duty,
            };
        }
        debug!("[HW] servo {} angle={} duty={}", channel, angle, duty);
        Ok(())
    }

    /// Release the servo: no pulse is sent
    pub fn stop(&self, channel: i64) -> Result<(), ScriptError> {
        let idx = channel_index("servo", channel, CHANNELS)?;
        if let Ok(mut state) = self.state.lock() {
            state[idx].duty = 0;
        }
        Ok(())
    }

    pub fn state(&self, channel: i64) -> Result<ServoState, ScriptError> {
        let idx = channel_index("servo", channel, CHANNELS)?;
        Ok(self.state.lock().map(|s| s[idx]).unwrap_or_default())
    }
}

impl NativeObject for Servos {
    fn type_name(&self) -> &str {
        "Servos"
    }

    fn call_method(&self, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        match method {
            "set_angle" => {
                self.set_angle(arg_int(method, args, 0, 2)?, arg_int(method, args, 1, 2)?)?;
                Ok(Value::None)
            }
            "stop" => {
                self.stop(arg_int(method, args, 0, 1)?)?;
                Ok(Value::None)
            }
            "angle" => Ok(self
                .state(arg_int(method, args, 0, 1)?)?
                .angle
                .map(Value::Int)
                .unwrap_or(Value::None)),
            _ => Err(ScriptError::runtime(format!(
                "'Servos' object has no attribute '{method}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_to_duty() {
        assert_eq!(duty_for(0), 25);
        assert_eq!(duty_for(90), 76);
        assert_eq!(duty_for(180), 127);
    }

    #[test]
    fn test_set_angle_validates() {
        let servos = Servos::default();
        servos.set_angle(4, 90).unwrap();
        assert_eq!(servos.state(4).unwrap().angle, Some(90));
        assert!(servos.set_angle(5, 90).is_err());
        assert!(servos.set_angle(1, 181).is_err());
        assert!(servos.set_angle(1, -1).is_err());

        servos.stop(4).unwrap();
        assert_eq!(servos.state(4).unwrap().duty, 0);
    }
}
