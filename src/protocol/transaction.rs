//! 请求/应答事务
//!
//! 一个事务拥有自己的出站帧、期望的应答字节数、以 tick 计的接收
//! 超时和一个至多写一次的结果槽。帧布局知识（各命令的数据段
//! 偏移）集中在这里的构造函数里。
//!
//! 序列号单调发放，进程内全局。

use std::sync::atomic::{AtomicU16, Ordering};

use super::constants::*;
use super::frame::TxFrame;
use super::focus_to_raw;
use crate::error::GimbalError;
use crate::gimbal::{Axis, AxisFlags, CalOperation, GimbalConfig, Position, Speed};

/// 事务完成后对应答的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// 即发即弃：完成时只释放事务槽
    Release,
    /// 完成时唤醒等待者
    Signal,
    /// 周期位置查询：解析位置，不唤醒任何人
    Position,
    /// 用户位置查询：解析位置并唤醒等待者
    PositionAndSignal,
    /// 解析角度限位应答
    Config,
    /// 解析刚度应答
    ConfigStiffness,
    /// 解析版本信息应答
    Info,
}

/// 数据段里三个轴的字段偏移（pitch/roll/yaw）
const AXIS_OFFSETS: [usize; 3] = [6, 4, 2];

/// 位置命令标志字节里的忽略位（pitch/roll/yaw）
const WIRE_IGNORE: [u8; 3] = [0x08, 0x04, 0x02];

/// 校准操作的设备编码
const CAL_OP_CODES: [(CalOperation, u8); 5] = [
    (CalOperation::AutoEnable, 0x01),
    (CalOperation::ManualEnable, 0x02),
    (CalOperation::SetMax, 0x05),
    (CalOperation::SetMin, 0x04),
    (CalOperation::Stop, 0x06),
];

static SERIAL: AtomicU16 = AtomicU16::new(0);

fn next_serial() -> u16 {
    SERIAL.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

/// 一次请求/应答往返
pub struct Transaction {
    frame: TxFrame,
    kind: ReplyKind,
    /// 期望的应答字节数（帧头 + 数据，不含帧尾）；0 = 无应答
    rx_expected: usize,
    /// 接收超时（tick）；0 = 不倒计时
    rx_timeout_tick: u32,
    /// 结果槽，至多写一次
    result: Option<Result<(), GimbalError>>,
    /// 等待者编号（`queue_and_wait` 的调用方）
    waiter: Option<u64>,
    /// 软运动命令：排队冲突时可被顶替/丢弃
    soft: bool,
}

impl Transaction {
    fn new(frame: TxFrame, kind: ReplyKind) -> Self {
        Self {
            frame,
            kind,
            rx_expected: 0,
            rx_timeout_tick: 0,
            result: None,
            waiter: None,
            soft: false,
        }
    }

    fn init_default(data_len: usize, cmd_type: u8, cmd_id: u8) -> TxFrame {
        TxFrame::init(data_len, cmd_type, CMD_SET_DEFAULT, cmd_id, next_serial())
    }

    // ===== 帧构造 =========================================================

    /// POSITION_SET：受控轴的角度 + 标志字节 + 时长
    pub fn position_set(position: &Position, flags: AxisFlags, duration_ms: u32) -> Self {
        let mut frame = Self::init_default(10, CMD_TYPE_NO_REPLY, CMD_POSITION_SET);

        frame.data_set(8, 0x01);

        for axis in Axis::ALL {
            if flags.ignores(axis) {
                frame.data_or(8, WIRE_IGNORE[axis.index()]);
            } else {
                frame.angle_set(AXIS_OFFSETS[axis.index()], position.get(axis));
            }
        }

        frame.data_set(9, (duration_ms / 100) as u8);

        Self::new(frame, ReplyKind::Release)
    }

    /// SPEED_SET：三轴角速度，标志字节固定 0x88
    pub fn speed_set(speed: &Speed) -> Self {
        let mut frame = Self::init_default(9, CMD_TYPE_NO_REPLY, CMD_SPEED_SET);

        for axis in Axis::ALL {
            frame.speed_set(AXIS_OFFSETS[axis.index()], speed.get(axis));
        }

        frame.data_set(8, 0x88);

        Self::new(frame, ReplyKind::Release)
    }

    /// ANGLE_GET：位置查询
    pub fn angle_get(kind: ReplyKind) -> Self {
        let mut frame = Self::init_default(3, CMD_TYPE_DO_REPLY, CMD_ANGLE_GET);
        frame.data_set(2, 0x01);

        Self::new(frame, kind).expect_reply(10)
    }

    /// ANGLE_LIMIT_GET：限位查询
    pub fn angle_limit_get() -> Self {
        let mut frame = Self::init_default(3, CMD_TYPE_DO_REPLY, CMD_ANGLE_LIMIT_GET);
        frame.data_set(2, 0x01);

        Self::new(frame, ReplyKind::Config).expect_reply(9)
    }

    /// ANGLE_LIMIT_SET：写限位
    pub fn angle_limit_set(config: &GimbalConfig) -> Self {
        const OFFSETS: [usize; 3] = [2, 7, 5];

        let mut frame = Self::init_default(8, CMD_TYPE_DO_REPLY, CMD_ANGLE_LIMIT_SET);

        for axis in Axis::ALL {
            let axis_config = &config.axis[axis.index()];
            let max = if axis_config.max_deg > 0.0 { axis_config.max_deg } else { 0.0 };
            let min = if axis_config.min_deg < 0.0 { -axis_config.min_deg } else { 0.0 };

            frame.data_set(OFFSETS[axis.index()], max as u8);
            frame.data_set(OFFSETS[axis.index()] + 1, min as u8);
        }

        // 子命令选择符，覆盖 pitch 槽位（设备侧如此定义）
        frame.data_set(2, 0x01);

        Self::new(frame, ReplyKind::Signal).expect_reply(3)
    }

    /// MOTOR_STIFFNESS_GET：刚度查询
    pub fn motor_stiffness_get() -> Self {
        let mut frame = Self::init_default(3, CMD_TYPE_DO_REPLY, CMD_MOTOR_STIFFNESS_GET);
        frame.data_set(2, 0x01);

        Self::new(frame, ReplyKind::ConfigStiffness).expect_reply(6)
    }

    /// MOTOR_STIFFNESS_SET：写刚度
    pub fn motor_stiffness_set(config: &GimbalConfig) -> Self {
        let mut frame = Self::init_default(6, CMD_TYPE_DO_REPLY, CMD_MOTOR_STIFFNESS_SET);

        for axis in Axis::ALL {
            frame.data_set(3 + axis.index(), config.axis[axis.index()].stiffness_pc as u8);
        }

        frame.data_set(2, 0x01);

        Self::new(frame, ReplyKind::Signal).expect_reply(3)
    }

    /// FOCUS SET：12 位对焦原始值
    pub fn focus_set(value_pc: f64) -> Self {
        debug_assert!((0.0..=100.0).contains(&value_pc));

        let raw = focus_to_raw(value_pc);

        let mut frame = Self::init_default(7, CMD_TYPE_NO_REPLY, CMD_FOCUS);
        frame.data_set(2, CMD_FOCUS_SET);
        frame.data_set(4, 0x02);
        frame.data_set(5, (raw & 0xFF) as u8);
        frame.data_set(6, (raw >> 8) as u8);

        Self::new(frame, ReplyKind::Release)
    }

    /// FOCUS CAL：校准操作
    pub fn focus_cal(operation: CalOperation) -> Self {
        let op_code = CAL_OP_CODES
            .iter()
            .find(|(op, _)| *op == operation)
            .map(|(_, code)| *code)
            .unwrap_or(0x06);

        let mut frame = Self::init_default(5, CMD_TYPE_NO_REPLY, CMD_FOCUS);
        frame.data_set(2, CMD_FOCUS_CAL);
        frame.data_set(4, op_code);

        Self::new(frame, ReplyKind::Release)
    }

    /// TLV_SET：跟踪速度，0..100% 映射到设备量程 1..30
    pub fn tlv_set(speed_pc: f64) -> Self {
        debug_assert!((0.0..=100.0).contains(&speed_pc));

        let mut frame = Self::init_default(5, CMD_TYPE_DO_REPLY, CMD_TLV_SET);
        frame.data_set(2, 0x75);
        frame.data_set(3, 1);
        frame.data_set(4, (speed_pc / 100.0 * 29.0 + 1.0) as u8);

        Self::new(frame, ReplyKind::Signal).expect_reply(1)
    }

    /// TRACK_SWITCH：画面跟踪目标切换
    pub fn track_switch() -> Self {
        let mut frame = Self::init_default(3, CMD_TYPE_NO_REPLY, CMD_TRACK_SWITCH);
        frame.data_set(2, 0x03);

        Self::new(frame, ReplyKind::Release)
    }

    /// VERSION：版本/信息查询
    pub fn version() -> Self {
        let mut frame = Self::init_default(6, CMD_TYPE_DO_REPLY, CMD_VERSION);
        frame.data_set(2, 1);

        Self::new(frame, ReplyKind::Info).expect_reply(11)
    }

    // ===== 配置 ===========================================================

    /// 期望 `data_len` 字节数据的应答
    ///
    /// 完成阈值是帧头加数据的字节数，帧尾不计入。
    fn expect_reply(mut self, data_len: usize) -> Self {
        debug_assert!(data_len > 0);
        debug_assert!(self.rx_expected == 0);

        self.rx_expected = frame_total_size(data_len) - FOOTER_SIZE;
        self
    }

    /// 标记为软运动命令
    pub fn soft(mut self) -> Self {
        self.soft = true;
        self
    }

    pub fn is_soft(&self) -> bool {
        self.soft
    }

    pub fn kind(&self) -> ReplyKind {
        self.kind
    }

    pub fn frame(&self) -> &TxFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut TxFrame {
        &mut self.frame
    }

    pub fn rx_expected(&self) -> usize {
        self.rx_expected
    }

    /// 入队时装定接收超时
    pub fn arm_timeout(&mut self, ticks: u32) {
        self.rx_timeout_tick = ticks;
    }

    pub fn waiter(&self) -> Option<u64> {
        self.waiter
    }

    pub fn set_waiter(&mut self, id: u64) {
        debug_assert!(self.waiter.is_none());

        self.waiter = Some(id);
    }

    // ===== 结果 ===========================================================

    /// 写结果槽（至多一次）
    pub fn complete(&mut self, result: Result<(), GimbalError>) {
        debug_assert!(self.result.is_none());

        self.result = Some(result);
    }

    /// 覆盖已写入的结果（应答解析阶段细化结果用）
    pub fn override_result(&mut self, result: Result<(), GimbalError>) {
        debug_assert!(self.result.is_some());

        self.result = Some(result);
    }

    pub fn result(&self) -> Option<Result<(), GimbalError>> {
        self.result
    }

    pub fn is_ok(&self) -> bool {
        self.result == Some(Ok(()))
    }

    /// 超时倒计时，每个 TRANSACTION tick 调一次
    ///
    /// 倒数到 1 时返回 `true`，调用方应以 `Timeout` 完成事务。
    pub fn tick(&mut self) -> bool {
        match self.rx_timeout_tick {
            0 => false,
            1 => true,
            _ => {
                self.rx_timeout_tick -= 1;
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serials_are_issued_monotonically() {
        // 其他测试并发取号，只验证单调前进而不验证步长
        let a = Transaction::version().frame().serial();
        let b = Transaction::version().frame().serial();
        assert_ne!(a, b);
        assert!(b.wrapping_sub(a) < 0x8000, "serial went backwards");
    }

    #[test]
    fn test_speed_set_layout() {
        let mut speed = Speed::default();
        speed.set(Axis::Pitch, 10.0);

        let tr = Transaction::speed_set(&speed);
        let frame = tr.frame();

        assert_eq!(frame.cmd_id(), CMD_SPEED_SET);
        // pitch 原始值 100 在偏移 6，roll/yaw 为 0
        assert_eq!(frame.data_get(6), 100);
        assert_eq!(frame.data_get(7), 0);
        assert_eq!(frame.data_get(4), 0);
        assert_eq!(frame.data_get(2), 0);
        assert_eq!(frame.data_get(8), 0x88);
        assert_eq!(tr.rx_expected(), 0);
    }

    #[test]
    fn test_position_set_layout_with_ignored_pitch() {
        let mut position = Position::default();
        position.set(Axis::Yaw, 90.0);

        let tr = Transaction::position_set(&position, AxisFlags::IGNORE_PITCH, 1500);
        let frame = tr.frame();

        assert_eq!(frame.cmd_id(), CMD_POSITION_SET);
        assert_eq!(frame.data_get(8), 0x01 | 0x08);
        // yaw 原始值 900 在偏移 2
        assert_eq!(frame.angle_get(2), 90.0);
        assert_eq!(frame.angle_get(4), 0.0);
        assert_eq!(frame.data_get(9), 15);
    }

    #[test]
    fn test_position_set_all_ignored() {
        let tr = Transaction::position_set(&Position::default(), AxisFlags::IGNORE_ALL, 0);
        assert_eq!(tr.frame().data_get(8), 0x01 | 0x08 | 0x04 | 0x02);
    }

    #[test]
    fn test_focus_set_layout() {
        let tr = Transaction::focus_set(100.0);
        let frame = tr.frame();

        assert_eq!(frame.cmd_id(), CMD_FOCUS);
        assert_eq!(frame.data_get(2), CMD_FOCUS_SET);
        assert_eq!(frame.data_get(4), 0x02);
        // 4095 = 0x0FFF
        assert_eq!(frame.data_get(5), 0xFF);
        assert_eq!(frame.data_get(6), 0x0F);
    }

    #[test]
    fn test_focus_cal_op_codes() {
        let cases = [
            (CalOperation::AutoEnable, 0x01),
            (CalOperation::ManualEnable, 0x02),
            (CalOperation::SetMax, 0x05),
            (CalOperation::SetMin, 0x04),
            (CalOperation::Stop, 0x06),
        ];

        for (op, code) in cases {
            let tr = Transaction::focus_cal(op);
            assert_eq!(tr.frame().data_get(2), CMD_FOCUS_CAL);
            assert_eq!(tr.frame().data_get(4), code, "{:?}", op);
        }
    }

    #[test]
    fn test_tlv_mapping() {
        // 0% → 1，100% → 30
        assert_eq!(Transaction::tlv_set(0.0).frame().data_get(4), 1);
        assert_eq!(Transaction::tlv_set(100.0).frame().data_get(4), 30);
        assert_eq!(Transaction::tlv_set(50.0).frame().data_get(4), 15);
    }

    #[test]
    fn test_expected_reply_excludes_footer() {
        assert_eq!(Transaction::version().rx_expected(), 12 + 11);
        assert_eq!(Transaction::angle_get(ReplyKind::Position).rx_expected(), 12 + 10);
        assert_eq!(Transaction::angle_limit_get().rx_expected(), 12 + 9);
        assert_eq!(Transaction::motor_stiffness_get().rx_expected(), 12 + 6);
        assert_eq!(Transaction::tlv_set(0.0).rx_expected(), 12 + 1);
    }

    #[test]
    fn test_timeout_countdown() {
        let mut tr = Transaction::version();
        tr.arm_timeout(3);

        assert!(!tr.tick());
        assert!(!tr.tick());
        assert!(tr.tick()); // 倒数到 1
    }

    #[test]
    fn test_timeout_zero_never_fires() {
        let mut tr = Transaction::speed_set(&Speed::default());
        for _ in 0..10 {
            assert!(!tr.tick());
        }
    }

    #[test]
    fn test_result_written_once() {
        let mut tr = Transaction::version();
        assert!(tr.result().is_none());

        tr.complete(Err(GimbalError::Timeout));
        assert_eq!(tr.result(), Some(Err(GimbalError::Timeout)));
        assert!(!tr.is_ok());
    }
}
