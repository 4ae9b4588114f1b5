//! イベントフラググループ
//!
//! 32ビットのフラグ集合。`set` はOR加算で待機中のタスクを起こし、
//! 待機側は自分のビットを読み出すと同時にクリアします（OR_CLEAR）。
//! 異なるビットを待つタスク同士は互いに干渉しません。

use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use embassy_time::{with_timeout, Duration};

/// パイプラインで使うフラグビット
pub mod flags {
    /// 速度コマンドがキューに入った
    pub const SPEED_CMD: u32 = 1 << 0;
    /// ステアリングコマンドがキューに入った
    pub const STEER_CMD: u32 = 1 << 1;
    /// 共有速度が更新された
    pub const SENSOR_UPDATE: u32 = 1 << 2;
}

/// 同時に待機できるタスク数（ビットごとに1タスク + 予備）
const WAKER_SLOTS: usize = 4;

/// フラグ待ちの方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// ビットが立つまでブロック
    Forever,
    /// 立っていれば取得、なければ即座に戻る（ポーリング）
    NoWait,
    /// 指定時間だけ待つ
    Timeout(Duration),
}

struct State {
    bits: u32,
    wakers: MultiWakerRegistration<WAKER_SLOTS>,
}

pub struct EventFlags<M: RawMutex> {
    state: Mutex<M, RefCell<State>>,
}

impl<M: RawMutex> EventFlags<M> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State {
                bits: 0,
                wakers: MultiWakerRegistration::new(),
            })),
        }
    }

    /// ビットをセットし、待機中のタスクを起こす
    pub fn set(&self, mask: u32) {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.bits |= mask;
            state.wakers.wake();
        });
    }

    /// 現在のフラグ値（クリアしない）
    pub fn get(&self) -> u32 {
        self.state.lock(|state| state.borrow().bits)
    }

    pub fn clear(&self, mask: u32) {
        self.state.lock(|state| state.borrow_mut().bits &= !mask);
    }

    /// `mask` のいずれかが立っていれば、それらをクリアして返す
    pub fn try_take(&self, mask: u32) -> Option<u32> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            let hit = state.bits & mask;
            if hit != 0 {
                state.bits &= !mask;
                Some(hit)
            } else {
                None
            }
        })
    }

    /// `mask` のいずれかが立つまで待ち、読み出しと同時にクリアする
    pub async fn wait_take(&self, mask: u32) -> u32 {
        poll_fn(|cx| {
            self.state.lock(|state| {
                let mut state = state.borrow_mut();
                let hit = state.bits & mask;
                if hit != 0 {
                    state.bits &= !mask;
                    Poll::Ready(hit)
                } else {
                    state.wakers.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await
    }

    /// 待ち方式に従ってフラグを取得する
    ///
    /// `None` はビットが観測されなかったこと（NoWait で未セット、またはタイムアウト）。
    pub async fn wait(&self, mask: u32, policy: WaitPolicy) -> Option<u32> {
        match policy {
            WaitPolicy::Forever => Some(self.wait_take(mask).await),
            WaitPolicy::NoWait => self.try_take(mask),
            WaitPolicy::Timeout(timeout) => with_timeout(timeout, self.wait_take(mask)).await.ok(),
        }
    }
}

impl<M: RawMutex> Default for EventFlags<M> {
    fn default() -> Self {
        Self::new()
    }
}
