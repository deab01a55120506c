//! Two-channel DC motor driver state

use std::sync::Mutex;

use tracing::debug;

use crate::engine::{NativeObject, ScriptError, Value};

use super::{arg_int, channel_index};

/// Steps in one software PWM period
pub const PERIOD: i64 = 20;
/// Full-scale speed in either direction
pub const MAX_SPEED: i64 = 2048;
pub const CHANNELS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorState {
    pub speed: i64,
    /// Duty steps for the forward and reverse pins
    pub duty: (i64, i64),
}

/// Duty pair for a signed speed; only one pin is ever driven
pub fn duty_for(speed: i64) -> (i64, i64) {
    if speed > 0 {
        (speed * PERIOD / MAX_SPEED, 0)
    } else if speed < 0 {
        (0, -speed * PERIOD / MAX_SPEED)
    } else {
        (0, 0)
    }
}

#[derive(Debug, Default)]
pub struct Motors {
    state: Mutex<[MotorState; CHANNELS]>,
}

impl Motors {
    pub fn set_speed(&self, channel: i64, speed: i64) -> Result<(), ScriptError> {
        let idx = channel_index("motor", channel, CHANNELS)?;
        if !(-MAX_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(ScriptError::runtime(format!(
                "[motors]speed {speed} out of range (-{MAX_SPEED}..{MAX_SPEED})"
            )));
        }

        let duty = duty_for(speed);
        if let Ok(mut state) = self.state.lock() {
            state[idx] = MotorState { speed, duty };
        }
        debug!("[HW] motor {} speed={} duty={:?}", channel, speed, duty);
        Ok(())
    }

    pub fn stop(&self, channel: i64) -> Result<(), ScriptError> {
        let idx = channel_index("motor", channel, CHANNELS)?;
        if let Ok(mut state) = self.state.lock() {
            state[idx] = MotorState::default();
        }
        debug!("[HW] motor {} stopped", channel);
        Ok(())
    }

    pub fn stop_all(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = Default::default();
        }
    }

    pub fn state(&self, channel: i64) -> Result<MotorState, ScriptError> {
        let idx = channel_index("motor", channel, CHANNELS)?;
        Ok(self.state.lock().map(|s| s[idx]).unwrap_or_default())
    }
}

impl NativeObject for Motors {
    fn type_name(&self) -> &str {
        "Motors"
    }

    fn call_method(&self, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        match method {
            "set_speed" => {
                self.set_speed(arg_int(method, args, 0, 2)?, arg_int(method, args, 1, 2)?)?;
                Ok(Value::None)
            }
            "stop" => {
                self.stop(arg_int(method, args, 0, 1)?)?;
                Ok(Value::None)
            }
            "speed" => Ok(Value::Int(self.state(arg_int(method, args, 0, 1)?)?.speed)),
            _ => Err(ScriptError::runtime(format!(
                "'Motors' object has no attribute '{method}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_follows_direction() {
        assert_eq!(duty_for(2048), (20, 0));
        assert_eq!(duty_for(1024), (10, 0));
        assert_eq!(duty_for(-512), (0, 5));
        assert_eq!(duty_for(0), (0, 0));
    }

    #[test]
    fn test_channel_and_range_checked() {
        let motors = Motors::default();
        motors.set_speed(2, -2048).unwrap();
        assert_eq!(motors.state(2).unwrap().duty, (0, 20));

        assert!(motors.set_speed(3, 100).is_err());
        assert!(motors.set_speed(1, 4096).is_err());
        assert!(motors.stop(0).is_err());

        motors.stop(2).unwrap();
        assert_eq!(motors.state(2).unwrap(), MotorState::default());
    }
}
