//! ホストシミュレータ
//!
//! 模擬ペリフェラル（I2Cバス上の PCA9685 ×2、CANポート、パルスカウンタ、LED）で
//! パイプラインの全タスクを一定時間動かし、結果をログに出します。
//!
//! `cargo run --features std --bin can-actuator-sim`

use core::cell::RefCell;

use embassy_embedded_hal::shared_bus::blocking::i2c::I2cDevice;
use embassy_futures::block_on;
use embassy_futures::join::{join, join3};
use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Delay, Duration, Timer};
use log::{info, warn};

use can_actuator::actuator::{Motor, Servo};
use can_actuator::can_protocol::{
    decode_status_speed, encode_dual_pwm, encode_scalar_command, CanFrame,
};
use can_actuator::config::pwm;
use can_actuator::pca9685::Pca9685;
use can_actuator::sim::{SimCan, SimCounter, SimI2cBus, SimLed};
use can_actuator::tasks;
use can_actuator::{Error, PipelineConfig, PipelineContext};

/// シミュレーション時間
const RUN_FOR: Duration = Duration::from_millis(1500);

/// 模擬ホイールのパルスレート（5回転/秒）
const PULSES_PER_SEC: f32 = 150.0;

static CTX: PipelineContext<CriticalSectionRawMutex> = PipelineContext::new();
static CONFIG: PipelineConfig = PipelineConfig::DEFAULT;

fn command(id: u32, data: &[u8]) -> Result<CanFrame, Error> {
    CanFrame::from_raw(id, data).ok_or(Error::InvalidFrame)
}

fn main() -> Result<(), Error> {
    // RUST_LOG=debug で詳細ログ
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("CAN actuator simulator starting");

    let bus = Mutex::<CriticalSectionRawMutex, _>::new(RefCell::new(
        SimI2cBus::new()
            .with_pca9685(pwm::SERVO_ADDRESS)
            .with_pca9685(pwm::MOTOR_ADDRESS),
    ));

    let mut motor_pwm = Pca9685::new(I2cDevice::new(&bus), CONFIG.motor.address);
    motor_pwm.init(&mut Delay)?;

    let mut servo_pwm = Pca9685::new(I2cDevice::new(&bus), CONFIG.servo.address);
    servo_pwm.init(&mut Delay)?;
    servo_pwm.set_frequency(CONFIG.servo.frequency_hz, &mut Delay)?;

    let motor = Motor::new(motor_pwm, CONFIG.motor);
    let servo = Servo::new(servo_pwm, CONFIG.servo);

    // rx/tx タスクと検査用で同じポートを共有する
    let can = SimCan::new();
    let ids = CONFIG.can_ids;
    can.inject(command(ids.cmd_speed, &encode_scalar_command(0.5))?);
    can.inject(command(ids.cmd_steering, &encode_scalar_command(90.0))?);
    can.inject(command(0x123, &[0xAA; 4])?);
    can.inject(command(ids.cmd_speed, &encode_dual_pwm(2000, -1000))?);
    can.inject(command(ids.cmd_steering, &encode_scalar_command(45.0))?);

    let pipeline = join(
        join3(
            tasks::can_rx_task(can.clone(), &CTX, &CONFIG),
            tasks::motor_control_task(&CTX, motor, &CONFIG),
            tasks::steering_task(&CTX, servo, &CONFIG),
        ),
        join3(
            tasks::speed_sensor_task(&CTX, SimCounter::new(PULSES_PER_SEC), &CONFIG),
            tasks::can_tx_task(can.clone(), &CTX, &CONFIG),
            tasks::supervisor_task(&CTX, SimLed::default(), &CONFIG),
        ),
    );
    block_on(select(pipeline, Timer::after(RUN_FOR)));

    let sent = can.take_sent();
    info!("{} status frames sent", sent.len());
    if let Some(last) = sent.last() {
        match decode_status_speed(last.payload()) {
            Some(speed) => info!("Last status {:#x}: {} m/s", last.raw_id(), speed),
            None => warn!("Last status {:#x} has a short payload", last.raw_id()),
        }
    }

    bus.lock(|bus| {
        let bus = bus.borrow();
        let left = bus.channel(CONFIG.motor.address, CONFIG.motor.left.pwm);
        let right = bus.channel(CONFIG.motor.address, CONFIG.motor.right.pwm);
        let steer = bus.channel(CONFIG.servo.address, CONFIG.servo.channel);
        info!("Motor PWM left={:?} right={:?}", left, right);
        info!("Servo PWM {:?}", steer);
        info!("{} I2C transfers", bus.transfers().len());
    });

    let stats = CTX.stats.snapshot();
    info!("Final stats: {:?}", stats);
    Ok(())
}
