//! Motor and servo actuators
//!
//! Both sit on a [`PwmOutput`](crate::pca9685::PwmOutput), never on the bus
//! directly, so a recording mock can stand in for the PCA9685.

pub mod motor;
pub mod servo;

pub use motor::{Motor, MotorChannels, MotorDirection, WheelChannels};
pub use servo::{Servo, ServoConfig};
