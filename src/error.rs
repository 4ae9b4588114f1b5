//! エラー定義
//!
//! バス系エラー (I2C / CAN) はタスク境界でログに記録して握りつぶし、
//! `InvalidRange` は直近の呼び出し元へ返します。

use embedded_hal::i2c;

/// PCA9685初期化の各ステップ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitStep {
    /// MODE1 = SLEEP | AI | ALLCALL
    Sleep,
    /// PRESCALE書き込み
    Prescale,
    /// MODE1 = AI | ALLCALL (スリープ解除)
    Wake,
}

/// クレート共通エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// I2Cトランザクション失敗 (NACK、アービトレーション喪失、タイムアウト等)
    I2c(i2c::ErrorKind),
    /// CANコントローラのエラー
    Can(embedded_can::ErrorKind),
    /// CAN送信メールボックスが満杯
    CanTxFull,
    /// CANフレームを構築できない (ID範囲外、9バイト以上のペイロード)
    InvalidFrame,
    /// 角度・パルス幅・チャネル番号などの前提条件違反
    InvalidRange,
    /// キューが満杯で最新メッセージを破棄した
    QueueFull,
    /// PCA9685の必須初期化ステップが失敗した
    DeviceInit(InitStep),
}

impl Error {
    /// I2C/CANトランザクション起因のエラーかどうか
    pub fn is_bus_error(&self) -> bool {
        matches!(
            self,
            Error::I2c(_) | Error::Can(_) | Error::CanTxFull | Error::InvalidFrame
        )
    }
}

impl From<i2c::ErrorKind> for Error {
    fn from(kind: i2c::ErrorKind) -> Self {
        Error::I2c(kind)
    }
}

impl From<embedded_can::ErrorKind> for Error {
    fn from(kind: embedded_can::ErrorKind) -> Self {
        Error::Can(kind)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::I2c(kind) => write!(f, "I2C transaction failed: {:?}", kind),
            Error::Can(kind) => write!(f, "CAN error: {:?}", kind),
            Error::CanTxFull => f.write_str("CAN transmit mailbox full"),
            Error::InvalidFrame => f.write_str("invalid CAN frame"),
            Error::InvalidRange => f.write_str("parameter out of range"),
            Error::QueueFull => f.write_str("queue full, message dropped"),
            Error::DeviceInit(step) => write!(f, "PWM device init failed at {:?}", step),
        }
    }
}

// embedded-can の ErrorKind は defmt::Format を持たないため手書き
#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::I2c(kind) => defmt::write!(f, "I2c({})", kind),
            Error::Can(kind) => defmt::write!(f, "Can({})", defmt::Debug2Format(kind)),
            Error::CanTxFull => defmt::write!(f, "CanTxFull"),
            Error::InvalidFrame => defmt::write!(f, "InvalidFrame"),
            Error::InvalidRange => defmt::write!(f, "InvalidRange"),
            Error::QueueFull => defmt::write!(f, "QueueFull"),
            Error::DeviceInit(step) => defmt::write!(f, "DeviceInit({})", step),
        }
    }
}
