//! zone-0 状态与连接状态机
//!
//! 引擎的全部共享可变状态集中在 [`Core`]，由每云台一把的互斥锁
//! （zone-0）保护。工作线程的 tick、链路接收线程的回调和用户线程
//! 的公开操作都在这把锁下串行。配对的条件变量在事务结果写入时
//! 唤醒等待者。
//!
//! 连接状态机：
//!
//! ```text
//!  --> INIT <--+     +---+==> ERROR_ETH <--+
//!       |      |     |   |        |        |
//!       +--> ACTIVATING  |  +-----|--> ERROR_CAN <--+
//!             |          |  |     |     |           |
//!             +--> TRANSACTION <==+     |           |
//!                   |             |     |           |
//!                   +----> ACTIVATED <--+           |
//!                                 |                 |
//!                                 +-----------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::can::{CanFrame, CanLink};
use crate::error::{GimbalError, QueueOutcome};
use crate::gimbal::model::PositionState;
use crate::gimbal::{Axis, AxisFlags, GimbalModel, Position};
use crate::protocol::constants::{CAN_ID_RX, CAN_ID_TX};
use crate::protocol::rx::{validate_progress, RxBuffer};
use crate::protocol::transaction::{ReplyKind, Transaction};
use crate::protocol::TxFrame;

/// 工作循环周期
pub(crate) const PERIOD_MS: u32 = 10;
pub(crate) const PERIOD: Duration = Duration::from_millis(PERIOD_MS as u64);

/// 活性计数初值：成功应答后重置
const LIVENESS_TICKS: u32 = 30;

/// 链路/总线恢复后的活性余量
const LIVENESS_AFTER_RECOVERY: u32 = 10;

/// 事务接收超时（1 秒，以 tick 计）
const RX_TIMEOUT_TICKS: u32 = 1000 / PERIOD_MS;

/// ERROR_CAN 恢复冷却
const BUS_RESET_COOLDOWN: Duration = Duration::from_secs(1);

/// 位置未知时的兜底移动时长
const MOVE_DURATION_FALLBACK_MS: u32 = 200;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Activated,
    Activating,
    ErrorCan,
    ErrorEth,
    Init,
    Transaction,
}

/// zone-0 保护的引擎状态
pub(crate) struct Core {
    pub state: LinkState,
    /// 活性计数：ACTIVATED tick 递减，归 1 触发 ERROR_CAN
    pub state_counter: u32,
    /// 周期计数，模 4 选择周期工作
    pub counter: u32,
    /// 最近一次位置命令的移动时长
    pub move_duration_ms: u32,
    pub rx: RxBuffer,
    /// 在途事务（至多一个）
    pub current: Option<Transaction>,
    /// 待发送事务（至多一个）
    pub next: Option<Transaction>,
    pub model: GimbalModel,
    /// 已完成的被等待事务：（等待者编号，结果）
    pub completed: Vec<(u64, Result<(), GimbalError>)>,
    /// 停机标志；置假后唤醒所有等待者
    pub running: bool,
}

impl Core {
    pub fn new() -> Self {
        Self {
            state: LinkState::Init,
            state_counter: LIVENESS_TICKS,
            counter: 0,
            move_duration_ms: 0,
            rx: RxBuffer::new(),
            current: None,
            next: None,
            model: GimbalModel::new(),
            completed: Vec::new(),
            running: false,
        }
    }

    /// 无条件状态迁移
    ///
    /// 高频的 ACTIVATED ⇌ TRANSACTION 往返不打日志，其余都记录。
    pub fn state_set(&mut self, to: LinkState) {
        match (self.state, to) {
            (LinkState::Activated, LinkState::Transaction)
            | (LinkState::Transaction, LinkState::Activated) => {},
            (from, to) if from == to => {},
            (from, to) => debug!(?from, ?to, "link state change"),
        }

        self.state = to;
    }

    /// 校验出发态的状态迁移
    pub fn state_change(&mut self, from: LinkState, to: LinkState) -> Result<(), GimbalError> {
        if self.state != from {
            warn!(actual = ?self.state, expected = ?from, ?to, "unexpected state on transition");
            return Err(GimbalError::State);
        }

        self.state_set(to);
        Ok(())
    }

    /// 把事务装入待发送槽
    fn queue_z0(&mut self, mut tr: Transaction) {
        debug_assert!(self.next.is_none());

        tr.arm_timeout(RX_TIMEOUT_TICKS);
        self.next = Some(tr);
    }

    /// 受控轴里最慢的一轴决定移动时长
    pub fn move_duration_for(&self, flags: AxisFlags) -> u32 {
        let current = match self.model.position_current() {
            Some(current) => current,
            None => return MOVE_DURATION_FALLBACK_MS,
        };

        let target = self.model.position_target();
        let mut result_ms = 0u32;

        for axis in Axis::ALL {
            if flags.ignores(axis) {
                continue;
            }

            let delta_deg = (target.get(axis) - current.get(axis)).abs();
            let speed = self.model.config().axis[axis.index()].speed_deg_s;
            let duration_ms = (delta_deg / speed * 1000.0) as u32;
            result_ms = result_ms.max(duration_ms);
        }

        result_ms
    }

    // ===== 应答解析 =======================================================

    /// 角度限位应答（偏移 {3,7,5}，各轴 max/min 两字节）
    fn apply_config_reply(&mut self) {
        const OFFSETS: [usize; 3] = [3, 7, 5];

        let view = self.rx.view();
        let mut limits = [(0.0f64, 0.0f64); 3];
        for axis in Axis::ALL {
            let offset = OFFSETS[axis.index()];
            limits[axis.index()] = (
                view.data(offset) as f64,
                -(view.data(offset + 1) as f64),
            );
        }

        let config = self.model.config_mut();
        for axis in Axis::ALL {
            config.axis[axis.index()].max_deg = limits[axis.index()].0;
            config.axis[axis.index()].min_deg = limits[axis.index()].1;
        }
    }

    /// 刚度应答（偏移 {3,5,4}）
    fn apply_stiffness_reply(&mut self) {
        const OFFSETS: [usize; 3] = [3, 5, 4];

        let view = self.rx.view();
        let mut stiffness = [0.0f64; 3];
        for axis in Axis::ALL {
            stiffness[axis.index()] = view.data(OFFSETS[axis.index()]) as f64;
        }

        let config = self.model.config_mut();
        for axis in Axis::ALL {
            config.axis[axis.index()].stiffness_pc = stiffness[axis.index()];
        }
    }

    /// 版本信息应答（版本四字节逆序在数据 2..6）
    fn apply_info_reply(&mut self) {
        let view = self.rx.view();
        let version = [view.data(5), view.data(4), view.data(3), view.data(2)];
        self.model.info_mut().version = version;
    }

    /// 位置应答：有效标志在数据偏移 3，轴角在 {8,6,4}
    fn position_parse(&mut self) -> Result<(), GimbalError> {
        const OFFSETS: [usize; 3] = [8, 6, 4];

        let view = self.rx.view();

        if view.data(3) == 0 {
            return Err(GimbalError::NotReady);
        }

        let mut position = Position::default();
        for axis in Axis::ALL {
            position.set(axis, view.angle(OFFSETS[axis.index()]));
        }

        self.model.position_validate(&position, AxisFlags::NONE)?;
        self.model.position_update(position);
        Ok(())
    }
}

/// 每云台的共享句柄：zone-0 锁、完成条件变量、链路
pub(crate) struct Shared {
    pub zone0: Mutex<Core>,
    pub cond: Condvar,
    pub link: Arc<dyn CanLink>,
}

impl Shared {
    pub fn new(link: Arc<dyn CanLink>) -> Self {
        Self {
            zone0: Mutex::new(Core::new()),
            cond: Condvar::new(),
            link,
        }
    }

    // ===== 发送 ===========================================================

    /// 封口并按 CAN 载荷发出一帧
    ///
    /// 任何发送失败都把状态机打到 ERROR_ETH。
    pub fn frame_send_z0(&self, core: &mut Core, frame: &mut TxFrame) -> Result<(), GimbalError> {
        frame.seal();

        for chunk in frame.chunks() {
            if let Err(e) = self.link.send(&CanFrame::new(CAN_ID_TX, chunk)) {
                error!(error = %e, "link send failed");
                core.state_set(LinkState::ErrorEth);
                return Err(GimbalError::Send);
            }
        }

        Ok(())
    }

    /// 启动一个事务：清接收缓冲、发出请求
    ///
    /// 无应答事务和发送失败的事务当场完成；其余驻留在在途槽等
    /// 应答或超时。
    pub fn tr_start_z0(&self, core: &mut Core, mut tr: Transaction) {
        core.rx.reset();

        let send_result = self.frame_send_z0(core, tr.frame_mut());

        if tr.rx_expected() == 0 || send_result.is_err() {
            tr.complete(send_result);
            self.finish_transaction(core, tr);
        } else {
            core.current = Some(tr);
        }
    }

    /// 待发送槽 → 在途：进入 TRANSACTION 并发出
    fn state_transaction_z0(&self, core: &mut Core) {
        debug_assert!(core.next.is_some());

        core.state_set(LinkState::Transaction);
        if let Some(tr) = core.next.take() {
            self.tr_start_z0(core, tr);
        }
    }

    // ===== 完成 ===========================================================

    /// 事务收尾：解析应答、交付结果、迁回 ACTIVATED
    ///
    /// 结果槽在进入前已写入；这里只按类别细化并路由。
    pub fn finish_transaction(&self, core: &mut Core, mut tr: Transaction) {
        if tr.is_ok() {
            match tr.kind() {
                ReplyKind::Config => core.apply_config_reply(),
                ReplyKind::ConfigStiffness => {
                    core.apply_stiffness_reply();
                    let config = *core.model.config();
                    tr.override_result(core.model.config_validate(&config));
                },
                ReplyKind::Info => core.apply_info_reply(),
                ReplyKind::Position | ReplyKind::PositionAndSignal => {
                    let parsed = core.position_parse();
                    tr.override_result(parsed);
                },
                ReplyKind::Release | ReplyKind::Signal => {},
            }
        }

        match tr.kind() {
            // 周期位置查询不动状态机，也不唤醒任何人
            ReplyKind::Position => {},

            ReplyKind::Release => {
                let _ = core.state_change(LinkState::Transaction, LinkState::Activated);
            },

            _ => {
                if let Some(id) = tr.waiter() {
                    let result = tr.result().unwrap_or(Err(GimbalError::Result));
                    core.completed.push((id, result));
                }
                self.cond.notify_all();
                let _ = core.state_change(LinkState::Transaction, LinkState::Activated);
            },
        }
    }

    /// 以给定结果完成在途事务
    fn complete_current(&self, core: &mut Core, result: Result<(), GimbalError>) {
        if let Some(mut tr) = core.current.take() {
            tr.complete(result);
            self.finish_transaction(core, tr);
        }
    }

    // ===== 接收 ===========================================================

    /// 链路接收线程的入口：一个 CAN 载荷
    pub fn on_can_frame(&self, frame: &CanFrame) {
        let mut core = self.zone0.lock();

        if frame.id != CAN_ID_RX || core.current.is_none() {
            return;
        }

        if !core.rx.insert(frame.data_slice()) {
            core.rx.reset();
            return;
        }

        let (cmd_id, serial, expected) = {
            let tr = core.current.as_ref().unwrap();
            (tr.frame().cmd_id(), tr.frame().serial(), tr.rx_expected())
        };

        match validate_progress(&mut core.rx, cmd_id, serial) {
            Ok(validated) => {
                if validated >= expected {
                    match core.state {
                        LinkState::ErrorEth => {
                            core.state_set(LinkState::Activated);
                            core.state_counter = LIVENESS_TICKS;
                        },
                        LinkState::Activated | LinkState::Transaction => {
                            core.state_counter = LIVENESS_TICKS;
                        },
                        state => debug_assert!(false, "reply completed in {:?}", state),
                    }

                    self.complete_current(&mut core, Ok(()));
                }
            },
            Err(e) => {
                self.complete_current(&mut core, Err(e));
            },
        }
    }

    // ===== 周期 ===========================================================

    /// 工作线程每 10 ms 调一次
    pub fn on_tick(&self) {
        let mut core = self.zone0.lock();

        match core.state {
            LinkState::Activated => self.tick_activated_z0(&mut core),

            LinkState::Activating | LinkState::ErrorEth => {
                if core.next.is_some() {
                    self.state_transaction_z0(&mut core);
                }
            },

            LinkState::Transaction => {
                let timed_out = match core.current.as_mut() {
                    Some(tr) => tr.tick(),
                    None => {
                        debug_assert!(false, "TRANSACTION without current");
                        false
                    },
                };

                if timed_out {
                    self.complete_current(&mut core, Err(GimbalError::Timeout));
                }
            },

            LinkState::Init => {},

            // ERROR_CAN 的恢复在检测到它的同一个 tick 内同步完成
            LinkState::ErrorCan => debug_assert!(false, "tick in ERROR_CAN"),
        }

        core.model.tick();
    }

    fn tick_activated_z0(&self, core: &mut Core) {
        if core.next.is_some() {
            self.state_transaction_z0(core);
            return;
        }

        self.tick_work_z0(core);

        match core.state_counter {
            0 | 1 => {
                debug_assert!(core.state_counter == 1);
                warn!("bus liveness lost");
                core.state_set(LinkState::ErrorCan);
                self.reset_and_sleep_z0(core, LinkState::Activated);
            },
            _ => core.state_counter -= 1,
        }
    }

    /// 周期工作：0/2 对焦积分，1 位置查询，3 运动刷新
    fn tick_work_z0(&self, core: &mut Core) {
        core.counter = core.counter.wrapping_add(1);

        match core.counter % 4 {
            0 | 2 => self.tick_focus_speed_z0(core),
            1 => self.tick_position_z0(core),
            3 => self.tick_speed_z0(core),
            _ => unreachable!(),
        }
    }

    /// 对焦速度积分：有速度时推进位置并下发对焦命令
    fn tick_focus_speed_z0(&self, core: &mut Core) {
        if let Some(position_pc) = core.model.focus_integrate(PERIOD_MS) {
            let mut tr = Transaction::focus_set(position_pc);
            let _ = self.frame_send_z0(core, tr.frame_mut());
        }
    }

    /// 周期位置查询：直接占用在途槽，不经过排队
    fn tick_position_z0(&self, core: &mut Core) {
        let tr = Transaction::angle_get(ReplyKind::Position);
        self.tr_start_z0(core, tr);
    }

    /// 运动刷新：MOVING 重发位置命令，SPEED 重发速度命令
    fn tick_speed_z0(&self, core: &mut Core) {
        match core.model.position_state() {
            PositionState::Known | PositionState::Unknown => {},

            PositionState::Moving => {
                let target = core.model.position_target();
                let flags = core.model.position_flags();
                let duration = core.move_duration_ms;
                let mut tr = Transaction::position_set(&target, flags, duration);
                let _ = self.frame_send_z0(core, tr.frame_mut());
            },

            PositionState::Speed => {
                let speed = core.model.speed();
                let mut tr = Transaction::speed_set(&speed);
                // 设备复位窗口内这条命令必然失败，忽略结果
                let _ = self.frame_send_z0(core, tr.frame_mut());
            },
        }
    }

    /// ERROR_CAN 恢复：总线复位 + 冷却
    ///
    /// 冷却期间持有 zone-0，用户调用会被一并挡住一秒。
    pub fn reset_and_sleep_z0(&self, core: &mut Core, next_state: LinkState) {
        debug_assert!(core.state == LinkState::ErrorCan);

        match self.link.bus_reset() {
            Ok(()) => {
                std::thread::sleep(BUS_RESET_COOLDOWN);
                core.state_counter = LIVENESS_AFTER_RECOVERY;
                core.state_set(next_state);
            },
            Err(e) => {
                error!(error = %e, "bus reset failed");
                core.state_set(LinkState::ErrorEth);
            },
        }
    }

    // ===== 排队 ===========================================================

    /// 提交一个即发即弃事务
    ///
    /// 槽位被占时：软命令顶软命令（`Replaced`），其余返回
    /// `NotReady`（软命令落后于硬事务时由调用方映射为成功）。
    pub fn tr_queue(&self, tr: Transaction) -> Result<QueueOutcome, GimbalError> {
        let mut core = self.zone0.lock();

        match core.next.as_ref().map(Transaction::is_soft) {
            None => {
                core.queue_z0(tr);
                Ok(QueueOutcome::Queued)
            },
            Some(true) if tr.is_soft() => {
                // 过时的运动命令可以安全丢弃
                core.next = None;
                core.queue_z0(tr);
                Ok(QueueOutcome::Replaced)
            },
            Some(_) => Err(GimbalError::NotReady),
        }
    }

    /// 提交事务并阻塞等待结果
    pub fn tr_queue_and_wait(&self, mut tr: Transaction) -> Result<(), GimbalError> {
        let mut core = self.zone0.lock();

        if core.next.is_some() {
            return Err(GimbalError::NotReady);
        }

        if !core.running {
            return Err(GimbalError::Thread);
        }

        let id = next_waiter_id();
        tr.set_waiter(id);
        core.queue_z0(tr);

        loop {
            self.cond.wait(&mut core);

            if let Some(index) = core.completed.iter().position(|(waiter, _)| *waiter == id) {
                return core.completed.swap_remove(index).1;
            }

            if !core.running {
                return Err(GimbalError::Thread);
            }
        }
    }

    /// 公开操作统一的入口检查
    ///
    /// ERROR_ETH 在这里内联尝试链路恢复：复位传输层，成功则带着
    /// 新的活性余量回 ACTIVATED。
    pub fn state_check(&self) -> Result<(), GimbalError> {
        let core = self.zone0.lock();

        match core.state {
            LinkState::Activated | LinkState::Transaction => Ok(()),

            LinkState::Activating | LinkState::Init => Err(GimbalError::State),

            LinkState::ErrorEth => {
                // 链路复位期间不持有 zone-0
                drop(core);
                let reset = self.link.reset();
                let mut core = self.zone0.lock();

                match reset {
                    Ok(()) => {
                        core.state_change(LinkState::ErrorEth, LinkState::Activated)?;
                        core.state_counter = LIVENESS_AFTER_RECOVERY;
                        Ok(())
                    },
                    Err(e) => {
                        error!(error = %e, "transport reset failed");
                        Err(GimbalError::State)
                    },
                }
            },

            // 总线恢复在 worker tick 内同步完成，用户线程几乎观察不到
            LinkState::ErrorCan => Err(GimbalError::State),
        }
    }
}

static WAITER_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn next_waiter_id() -> u64 {
    WAITER_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
}
