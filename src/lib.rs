//! CAN制御アクチュエータパイプライン
//!
//! CANバスから速度/ステアリングコマンドを受け取り、2台の PCA9685
//! （DCモーター用・サーボ用）を駆動し、ホイール速度を計測して
//! CANステータスとして送り返します。
//!
//! ペリフェラルは `embedded-hal` / `embedded-can` のトレイト越しに受け取るため、
//! ボード側のHALでもホストのシミュレータ（`sim` モジュール）でも動作します。
#![cfg_attr(not(test), no_std)]

#[cfg(feature = "std")]
extern crate std;

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

pub mod actuator;
pub mod can_protocol;
pub mod config;
pub mod error;
pub mod event_flags;
pub mod pca9685;
pub mod speed_sensor;
pub mod state;
pub mod tasks;

#[cfg(any(test, feature = "std"))]
pub mod sim;

#[cfg(test)]
mod mock;

pub use config::PipelineConfig;
pub use error::Error;
pub use state::PipelineContext;
