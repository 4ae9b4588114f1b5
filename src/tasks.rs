//! タスクモジュール
//!
//! 各タスクは `PipelineContext` への参照とペリフェラルを受け取る async 関数です。
//! エグゼキュータ（embassy の `#[task]` ラッパーやホストのシミュレータ）から
//! 起動されます。1サイクル分の処理は個別の関数に分けてあり、単体でテストできます。

pub mod can_rx;
pub mod can_tx;
pub mod motor_control;
pub mod speed_sensor;
pub mod steering;
pub mod supervisor;

// タスク関数を再エクスポート
pub use can_rx::can_rx_task;
pub use can_tx::can_tx_task;
pub use motor_control::motor_control_task;
pub use speed_sensor::speed_sensor_task;
pub use steering::steering_task;
pub use supervisor::supervisor_task;
