//! ホスト用の模擬ペリフェラル
//!
//! シミュレータ（`can-actuator-sim`）とユニットテストで共用します。
//! - [`SimI2cBus`]: PCA9685 のレジスタファイルを持つ I2C バス（NACK注入・転送ログ付き）
//! - [`SimCan`]: 受信FIFO/送信ログを持つ CAN ポート（クローンで rx/tx タスクに配る）
//! - [`SimCounter`]: 一定レートで進むパルスカウンタ
//! - [`SimLed`]: 状態を記録する LED ピン

use core::cell::RefCell;
use core::convert::Infallible;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};

use crate::can_protocol::CanFrame;
use crate::pca9685::regs;
use crate::speed_sensor::PulseCounter;

/// 1トランザクション内の操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Write(Vec<u8>),
    Read(usize),
}

/// 試行された I2C トランザクション（NACK されたものも含む）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub address: u8,
    pub ops: Vec<BusOp>,
    pub acked: bool,
}

struct SimDevice {
    regs: [u8; 256],
    pointer: u8,
    readable: bool,
}

impl SimDevice {
    /// PCA9685 のパワーオン状態
    fn pca9685() -> Self {
        let mut file = [0u8; 256];
        file[regs::MODE1 as usize] = 0x11;
        file[regs::MODE2 as usize] = 0x04;
        file[regs::PRESCALE as usize] = 0x1E;
        Self {
            regs: file,
            pointer: 0,
            readable: true,
        }
    }

    fn write(&mut self, value: u8) {
        self.regs[self.pointer as usize] = value;
        self.pointer = self.pointer.wrapping_add(1);
    }

    fn read(&mut self) -> u8 {
        let value = self.regs[self.pointer as usize];
        self.pointer = self.pointer.wrapping_add(1);
        value
    }
}

/// 模擬 I2C バス
///
/// 各トランザクションの最初の書き込みバイトがレジスタポインタになり、
/// 以降の書き込み・読み出しはオートインクリメントする。
/// ポインタはトランザクションをまたいで保持される。
#[derive(Default)]
pub struct SimI2cBus {
    devices: BTreeMap<u8, SimDevice>,
    log: Vec<Transfer>,
    fail_at: Vec<usize>,
    reject_block_writes: bool,
}

impl SimI2cBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// PCA9685 を接続
    pub fn with_pca9685(mut self, address: u8) -> Self {
        self.devices.insert(address, SimDevice::pca9685());
        self
    }

    /// アドレスにはACKするがレジスタ読み出しに応答しないデバイスを接続
    pub fn with_foreign_device(mut self, address: u8) -> Self {
        let mut device = SimDevice::pca9685();
        device.readable = false;
        self.devices.insert(address, device);
        self
    }

    /// ログ上のインデックス（0始まり）で指定したトランザクションを NACK する
    pub fn fail_transfers(&mut self, indices: &[usize]) {
        self.fail_at.extend_from_slice(indices);
    }

    /// アドレス指定ブロック書き込み（Write が2つ以上続くトランザクション）を NACK する
    pub fn reject_block_writes(&mut self, reject: bool) {
        self.reject_block_writes = reject;
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.log
    }

    /// 転送ログと NACK 指定をクリア
    pub fn clear_log(&mut self) {
        self.log.clear();
        self.fail_at.clear();
    }

    pub fn register(&self, address: u8, reg: u8) -> Option<u8> {
        self.devices.get(&address).map(|d| d.regs[reg as usize])
    }

    /// チャネルの (on, off) ティック
    pub fn channel(&self, address: u8, channel: u8) -> Option<(u16, u16)> {
        let device = self.devices.get(&address)?;
        let base = (regs::LED0_ON_L + 4 * channel) as usize;
        let r = &device.regs[base..base + 4];
        Some((
            u16::from_le_bytes([r[0], r[1]]),
            u16::from_le_bytes([r[2], r[3]]),
        ))
    }
}

impl i2c::ErrorType for SimI2cBus {
    type Error = ErrorKind;
}

impl i2c::I2c for SimI2cBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let index = self.log.len();
        let ops: Vec<BusOp> = operations
            .iter()
            .map(|op| match op {
                Operation::Write(bytes) => BusOp::Write(bytes.to_vec()),
                Operation::Read(buf) => BusOp::Read(buf.len()),
            })
            .collect();

        let is_block_write = ops.len() > 1 && ops.iter().all(|op| matches!(op, BusOp::Write(_)));
        let has_read = ops.iter().any(|op| matches!(op, BusOp::Read(_)));
        let acked = match self.devices.get(&address) {
            None => false,
            Some(device) => {
                !(self.fail_at.contains(&index)
                    || (self.reject_block_writes && is_block_write)
                    || (has_read && !device.readable))
            }
        };

        self.log.push(Transfer {
            address,
            ops,
            acked,
        });
        if !acked {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        let Some(device) = self.devices.get_mut(&address) else {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        };
        let mut pointer_set = false;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        if pointer_set {
                            device.write(byte);
                        } else {
                            device.pointer = byte;
                            pointer_set = true;
                        }
                    }
                }
                Operation::Read(buf) => {
                    for slot in buf.iter_mut() {
                        *slot = device.read();
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct CanState {
    rx: VecDeque<CanFrame>,
    tx: Vec<CanFrame>,
    rx_errors: VecDeque<embedded_can::ErrorKind>,
    tx_busy: bool,
}

/// 模擬 CAN ポート
///
/// クローンは同じFIFOを共有する。
#[derive(Clone)]
pub struct SimCan {
    state: Arc<Mutex<CriticalSectionRawMutex, RefCell<CanState>>>,
}

impl SimCan {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCell::new(CanState::default()))),
        }
    }

    /// 受信FIFOにフレームを積む（バスから届いた扱い）
    pub fn inject(&self, frame: CanFrame) {
        self.state.lock(|s| s.borrow_mut().rx.push_back(frame));
    }

    /// 次の `receive` を指定エラーで失敗させる
    pub fn inject_rx_error(&self, kind: embedded_can::ErrorKind) {
        self.state.lock(|s| s.borrow_mut().rx_errors.push_back(kind));
    }

    /// 送信メールボックスを満杯にする
    pub fn set_tx_busy(&self, busy: bool) {
        self.state.lock(|s| s.borrow_mut().tx_busy = busy);
    }

    pub fn pending_rx(&self) -> usize {
        self.state.lock(|s| s.borrow().rx.len())
    }

    /// 送信済みフレームを取り出す
    pub fn take_sent(&self) -> Vec<CanFrame> {
        self.state.lock(|s| core::mem::take(&mut s.borrow_mut().tx))
    }
}

impl Default for SimCan {
    fn default() -> Self {
        Self::new()
    }
}

impl embedded_can::nb::Can for SimCan {
    type Frame = CanFrame;
    type Error = embedded_can::ErrorKind;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.tx_busy {
                return Err(nb::Error::WouldBlock);
            }
            s.tx.push(*frame);
            Ok(None)
        })
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if let Some(kind) = s.rx_errors.pop_front() {
                return Err(nb::Error::Other(kind));
            }
            s.rx.pop_front().ok_or(nb::Error::WouldBlock)
        })
    }
}

/// 一定レートで進む 16ビットパルスカウンタ
pub struct SimCounter {
    started: Instant,
    pulses_per_sec: f32,
}

impl SimCounter {
    pub fn new(pulses_per_sec: f32) -> Self {
        Self {
            started: Instant::now(),
            pulses_per_sec,
        }
    }
}

impl PulseCounter for SimCounter {
    fn count(&mut self) -> u16 {
        let elapsed_s = self.started.elapsed().as_micros() as f32 / 1_000_000.0;
        let total = (elapsed_s * self.pulses_per_sec) as u64;
        (total % 0x1_0000) as u16
    }
}

/// 状態と切り替え回数を記録する LED
#[derive(Debug, Default)]
pub struct SimLed {
    pub is_high: bool,
    pub toggles: u32,
}

impl digital::ErrorType for SimLed {
    type Error = Infallible;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.is_high {
            self.toggles += 1;
        }
        self.is_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.is_high {
            self.toggles += 1;
        }
        self.is_high = true;
        Ok(())
    }
}
