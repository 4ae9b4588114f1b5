//! アクチュエータ制御パイプラインの設定パラメータ（デフォルト値）

/// コマンドキューの容量（速度・ステアリング共通）
pub const QUEUE_CAPACITY: usize = 10;

/// CAN ID設定（接続する全デバイスで一致させること）
pub mod can {
    /// 速度コマンド (f32 [-1, 1] 4バイト、または左右PWMカウント i32×2 8バイト)
    pub const CMD_SPEED_ID: u32 = 0x2C;

    /// ステアリングコマンド (f32 角度[deg] 4バイト)
    pub const CMD_STEERING_ID: u32 = 0x2D;

    /// 車速ステータス (f32 [m/s] 4バイト)
    pub const STATUS_SPEED_ID: u32 = 0x201;
}

/// PCA9685 PWMコントローラ
pub mod pwm {
    /// デューティ分解能（12ビット）
    pub const COUNTS: u16 = 4096;

    /// "off"ティックの最大値
    pub const MAX_TICK: u16 = COUNTS - 1;

    /// モータードライバーの7ビットアドレス
    pub const MOTOR_ADDRESS: u8 = 0x60;

    /// サーボドライバーの7ビットアドレス
    pub const SERVO_ADDRESS: u8 = 0x40;

    /// 内部発振器の周波数 [Hz]
    pub const OSCILLATOR_HZ: f32 = 25_000_000.0;

    /// 設定可能な周波数範囲 [Hz]
    pub const MIN_FREQUENCY_HZ: f32 = 24.0;
    pub const MAX_FREQUENCY_HZ: f32 = 1526.0;

    /// 初期化時のプリスケーラ値（50Hz）
    pub const INIT_PRESCALE: u8 = 121;
}

/// DCモーターのチャネル割り当て（モーター用PCA9685上）
pub mod motor {
    pub const LEFT_PWM: u8 = 7;
    pub const LEFT_A: u8 = 5;
    pub const LEFT_B: u8 = 6;
    pub const RIGHT_PWM: u8 = 0;
    pub const RIGHT_A: u8 = 1;
    pub const RIGHT_B: u8 = 2;

    /// これ未満の指令値は停止として扱う
    pub const STOP_THRESHOLD: f32 = 1e-6;
}

/// ステアリングサーボ
pub mod servo {
    pub const CHANNEL: u8 = 0;

    /// 0度に対応するパルス幅 [counts]
    pub const DEFAULT_MIN_PULSE: u16 = 200;

    /// 180度に対応するパルス幅 [counts]
    pub const DEFAULT_MAX_PULSE: u16 = 500;

    /// サーボPWM周波数 [Hz]
    pub const DEFAULT_FREQUENCY_HZ: f32 = 50.0;

    pub const MAX_ANGLE_DEG: u16 = 180;
}

/// ホイール速度センサ（TIM1 外部クロックモードのフリーランカウンタ）
pub mod speed_sensor {
    /// ホイール外周 [m]
    pub const WHEEL_PERIMETER_M: f32 = 0.212;

    /// 1回転あたりのパルス数
    pub const PULSES_PER_REV: f32 = 30.0;

    /// 16ビットカウンタの最大値
    pub const TIMER_PERIOD: u32 = 65535;

    /// これ以下のサンプリング間隔 [s] では速度0を返す
    pub const MIN_SAMPLE_INTERVAL_S: f32 = 0.001;
}

/// タスク周期 [ms]
pub mod timing {
    pub const CAN_RX_POLL_MS: u64 = 50;
    pub const ACTUATOR_PERIOD_MS: u64 = 50;
    pub const SAMPLE_PERIOD_MS: u64 = 100;
    pub const CAN_TX_PERIOD_MS: u64 = 50;
    pub const SUPERVISOR_PERIOD_MS: u64 = 100;

    /// 統計ログを出す間隔（ハートビート回数）
    pub const SUPERVISOR_REPORT_EVERY: u32 = 10;
}

/// タスク優先度（数値が小さいほど高優先）
///
/// 優先度付きエグゼキュータ（割り込みエグゼキュータ等）を使うボード向けの目安。
/// 受信タスクがアクチュエータタスクより後回しにされてはならない。
pub mod priority {
    pub const CAN_RX: u8 = 2;
    pub const MOTOR: u8 = 4;
    pub const STEERING: u8 = 5;
    pub const SPEED_SENSOR: u8 = 6;
    pub const CAN_TX: u8 = 7;
    pub const SUPERVISOR: u8 = 10;
}
