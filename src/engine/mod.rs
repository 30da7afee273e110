//! 云台协议引擎
//!
//! 每台云台一个 [`GimbalEngine`]：持有一条 CAN 链路、六态连接
//! 状态机、一个 10 ms 工作线程和一个链路接收线程。公开操作可以
//! 从任意用户线程调用，内部在 zone-0 互斥锁下与两个后台线程
//! 串行。
//!
//! 线程模型：
//! - **用户线程**：调用公开操作；`queue_and_wait` 类操作挂在
//!   条件变量上直到事务完成
//! - **工作线程**：10 ms tick，推进状态机、超时与周期工作
//!   （位置轮询、运动刷新、对焦积分）
//! - **接收线程**：阻塞读链路，把 CAN 载荷交给校验器

mod core;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

pub use self::core::LinkState;
use self::core::{Shared, PERIOD};
use crate::can::{CanError, CanLink};
use crate::error::{value_validate, GimbalError};
use crate::gimbal::{
    AxisFlags, CalOperation, GimbalConfig, GimbalControl, GimbalInfo, Position, Speed,
};
use crate::protocol::transaction::{ReplyKind, Transaction};

/// 接收线程单次阻塞上限（决定停机响应速度）
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// 链路故障后的重试间隔
const RECEIVE_BACKOFF: Duration = Duration::from_millis(100);

/// 启动序列的整体重试次数
const ACTIVATE_ATTEMPTS: u32 = 2;

/// 单个启动事务的重试次数
const TRANSACTION_RETRIES: u32 = 2;

/// 一台云台的协议引擎
pub struct GimbalEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    rx_stop: Arc<AtomicBool>,
}

impl GimbalEngine {
    /// 绑定一条链路并用桥接器信息预置 Info 块
    ///
    /// 链路此时必须已完成 CAN 配置握手（过滤 `0x222`、掩码
    /// `0x7FF`、1 Mb/s）；读不到设备信息视为云台不可用。
    pub fn connect(link: Arc<dyn CanLink>) -> Result<Self, GimbalError> {
        let link_info = link.info().map_err(|e| {
            error!(error = %e, "bridge info unavailable");
            GimbalError::Gimbal
        })?;

        let shared = Arc::new(Shared::new(link));

        {
            let mut core = shared.zone0.lock();
            let info = core.model.info_mut();
            info.name = link_info.name;
            info.ipv4_address = link_info.ipv4_address;
            info.ipv4_gateway = link_info.ipv4_gateway;
            info.ipv4_netmask = link_info.ipv4_netmask;
        }

        Ok(Self {
            shared,
            worker: Mutex::new(None),
            rx_thread: Mutex::new(None),
            stop_tx: Mutex::new(None),
            rx_stop: Arc::new(AtomicBool::new(false)),
        })
    }

    // ===== 生命周期 =======================================================

    /// 启动：接收线程、工作线程、启动事务序列
    ///
    /// 版本查询整体最多尝试两轮，两轮之间做一次总线复位加冷却；
    /// 之后取回限位与刚度。任何一步失败都回到 INIT 并停掉线程。
    pub fn activate(&self) -> Result<(), GimbalError> {
        {
            let mut core = self.shared.zone0.lock();
            if core.state != LinkState::Init {
                return Err(GimbalError::State);
            }
            core.state_set(LinkState::Activating);
            core.running = true;
        }

        self.start_threads();

        let mut result = Ok(());
        for attempt in 0..ACTIVATE_ATTEMPTS {
            if attempt > 0 {
                let mut core = self.shared.zone0.lock();
                core.state_set(LinkState::ErrorCan);
                self.shared.reset_and_sleep_z0(&mut core, LinkState::Activating);
            }

            result = self.retry(Transaction::version);
            if result.is_ok() {
                break;
            }
        }

        if result.is_ok() {
            result = self.config_retrieve();
        }

        if let Err(e) = result {
            error!(error = %e, "activation failed");
            {
                let mut core = self.shared.zone0.lock();
                core.state_set(LinkState::Init);
            }
            self.stop_threads();
            return Err(e);
        }

        debug!("gimbal activated");
        Ok(())
    }

    /// 停机：停两个后台线程，回到 INIT
    ///
    /// 挂在条件变量上的用户线程得到 `Thread` 失败结果。
    pub fn release(&self) -> Result<(), GimbalError> {
        if self.worker.lock().is_none() {
            return Err(GimbalError::AlreadyStopped);
        }

        self.stop_threads();

        let mut core = self.shared.zone0.lock();
        core.current = None;
        core.next = None;
        core.rx.reset();
        core.state_set(LinkState::Init);
        Ok(())
    }

    fn start_threads(&self) {
        self.rx_stop.store(false, Ordering::Relaxed);

        let shared = self.shared.clone();
        let rx_stop = self.rx_stop.clone();
        *self.rx_thread.lock() = Some(std::thread::spawn(move || rx_loop(shared, rx_stop)));

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = self.shared.clone();
        *self.worker.lock() = Some(std::thread::spawn(move || worker_loop(shared, stop_rx)));
        *self.stop_tx.lock() = Some(stop_tx);
    }

    fn stop_threads(&self) {
        {
            let mut core = self.shared.zone0.lock();
            core.running = false;
        }
        self.shared.cond.notify_all();

        // 关掉停止通道，工作线程在下一个 tick 退出
        self.stop_tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }

        self.rx_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.lock().take() {
            let _ = handle.join();
        }
    }

    // ===== 启动事务 =======================================================

    /// 超时或设备侧失败时重试一次
    fn retry(&self, build: impl Fn() -> Transaction) -> Result<(), GimbalError> {
        let mut result = Ok(());

        for attempt in 0..TRANSACTION_RETRIES {
            result = self.shared.tr_queue_and_wait(build());
            match result {
                Err(GimbalError::Timeout) | Err(GimbalError::Gimbal) => {
                    debug!(attempt, "startup transaction retry");
                },
                _ => break,
            }
        }

        result
    }

    fn config_retrieve(&self) -> Result<(), GimbalError> {
        self.retry(Transaction::angle_limit_get)?;
        self.retry(Transaction::motor_stiffness_get)
    }

    // ===== 内部工具 =======================================================

    /// 软运动命令：队列占用视为被更新的命令安全顶替
    fn queue_soft(&self, tr: Transaction) -> Result<(), GimbalError> {
        match self.shared.tr_queue(tr) {
            Ok(_) => Ok(()),
            Err(GimbalError::NotReady) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn queue(&self, tr: Transaction) -> Result<(), GimbalError> {
        self.shared.tr_queue(tr).map(|_| ())
    }
}

impl GimbalControl for GimbalEngine {
    fn activate(&self) -> Result<(), GimbalError> {
        GimbalEngine::activate(self)
    }

    fn config_get(&self) -> GimbalConfig {
        *self.shared.zone0.lock().model.config()
    }

    fn config_set(&self, config: &GimbalConfig) -> Result<(), GimbalError> {
        {
            let mut core = self.shared.zone0.lock();
            core.model.config_set(config)?;
        }

        self.shared.state_check()?;

        self.retry(|| Transaction::angle_limit_set(config))?;
        self.retry(|| Transaction::motor_stiffness_set(config))
    }

    fn focus_cal(&self, operation: CalOperation) -> Result<(), GimbalError> {
        self.shared.state_check()?;
        self.queue(Transaction::focus_cal(operation))
    }

    fn focus_position_set(&self, position_pc: f64) -> Result<(), GimbalError> {
        {
            let mut core = self.shared.zone0.lock();
            core.model.focus_position_set(position_pc)?;
        }

        self.shared.state_check()?;
        self.queue(Transaction::focus_set(position_pc))
    }

    fn focus_speed_set(&self, speed_pc_s: f64) -> Result<(), GimbalError> {
        // 纯模型操作：工作线程随之开始/停止对焦积分
        let mut core = self.shared.zone0.lock();
        core.model.focus_speed_set(speed_pc_s)
    }

    fn info_get(&self) -> GimbalInfo {
        self.shared.zone0.lock().model.info().clone()
    }

    fn position_get(&self) -> Result<Position, GimbalError> {
        {
            let core = self.shared.zone0.lock();
            if let Ok(position) = core.model.position_get() {
                return Ok(position);
            }
        }

        self.shared.state_check()?;
        self.shared
            .tr_queue_and_wait(Transaction::angle_get(ReplyKind::PositionAndSignal))?;

        self.shared.zone0.lock().model.position_get()
    }

    fn position_set(
        &self,
        position: &Position,
        flags: AxisFlags,
        duration_ms: u32,
    ) -> Result<(), GimbalError> {
        let tr = {
            let mut core = self.shared.zone0.lock();
            core.model.position_set(position, flags)?;

            let computed = core.move_duration_for(flags);
            core.move_duration_ms = computed.max(duration_ms);

            // 线上带偏置后的目标，与周期刷新保持一致
            let target = core.model.position_target();
            Transaction::position_set(&target, flags, core.move_duration_ms).soft()
        };

        self.shared.state_check()?;
        self.queue_soft(tr)
    }

    fn speed_get(&self) -> Result<Speed, GimbalError> {
        self.shared.zone0.lock().model.speed_get()
    }

    fn speed_set(&self, speed: &Speed, flags: AxisFlags) -> Result<(), GimbalError> {
        let tr = {
            let mut core = self.shared.zone0.lock();
            core.model.speed_set(speed, flags)?;
            Transaction::speed_set(&core.model.speed()).soft()
        };

        self.shared.state_check()?;
        self.queue_soft(tr)
    }

    fn speed_stop(&self) -> Result<(), GimbalError> {
        let tr = {
            let mut core = self.shared.zone0.lock();
            core.model.speed_stop();
            Transaction::speed_set(&core.model.speed())
        };

        self.shared.state_check()?;
        self.queue(tr)
    }

    fn track_speed_set(&self, speed_pc: f64) -> Result<(), GimbalError> {
        value_validate(speed_pc, 0.0, 100.0)?;

        self.shared.state_check()?;
        self.retry(|| Transaction::tlv_set(speed_pc))
    }

    fn track_switch(&self) -> Result<(), GimbalError> {
        self.shared.state_check()?;
        self.queue(Transaction::track_switch())
    }

    fn debug_dump(&self, out: &mut dyn std::io::Write) -> Result<(), GimbalError> {
        let core = self.shared.zone0.lock();

        let mut write = || -> std::io::Result<()> {
            writeln!(out, "===== Debug Information =====")?;
            write!(out, "Rx Buffer     :")?;
            for byte in core.rx.bytes() {
                write!(out, " {:02x}", byte)?;
            }
            writeln!(out)?;
            writeln!(out, "Counter       : {}", core.counter)?;
            writeln!(out, "Rx Offset     : {} bytes", core.rx.offset())?;
            writeln!(out, "Rx Size       : {} bytes", core.rx.total())?;
            writeln!(out, "State         : {:?}", core.state)?;
            writeln!(out, "Liveness      : {}", core.state_counter)?;

            if let Ok(info) = self.shared.link.info() {
                writeln!(out, "Bridge        : {}", info.name)?;
                if let Some(addr) = info.ipv4_address {
                    writeln!(out, "IPv4 Address  : {}", addr)?;
                }
            }

            Ok(())
        };

        write().map_err(|_| GimbalError::Send)
    }
}

impl Drop for GimbalEngine {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// 工作线程：10 ms 节拍
///
/// 用停止通道的 `recv_timeout` 做节拍器，通道关闭即退出。tick 内
/// 的 panic 被捕获并记录，工作线程不因此终止。
fn worker_loop(shared: Arc<Shared>, stop_rx: Receiver<()>) {
    debug!("worker thread started");

    loop {
        match stop_rx.recv_timeout(PERIOD) {
            Err(RecvTimeoutError::Timeout) => {},
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        if catch_unwind(AssertUnwindSafe(|| shared.on_tick())).is_err() {
            error!("worker tick panicked");
        }
    }

    debug!("worker thread stopped");
}

/// 接收线程：链路 → 校验器
fn rx_loop(shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    debug!("receive thread started");

    while !stop.load(Ordering::Relaxed) {
        match shared.link.recv(RECEIVE_TIMEOUT) {
            Ok(frame) => shared.on_can_frame(&frame),

            Err(CanError::Timeout) => {},

            Err(e) => {
                warn!(error = %e, "link receive failed");

                {
                    let mut core = shared.zone0.lock();
                    if matches!(
                        core.state,
                        LinkState::Activated | LinkState::Transaction | LinkState::Activating
                    ) {
                        core.state_set(LinkState::ErrorEth);
                    }
                }

                std::thread::sleep(RECEIVE_BACKOFF);
            },
        }
    }

    debug!("receive thread stopped");
}
