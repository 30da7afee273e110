//! 云台语义层类型
//!
//! 协议无关的轴、位置、速度、配置与能力定义。任何具体协议引擎
//! （见 [`crate::engine`]）都在这一层之上实现 [`GimbalControl`]。

use std::net::Ipv4Addr;

use crate::error::GimbalError;

pub mod model;

pub use model::GimbalModel;

/// 轴数量
pub const AXIS_COUNT: usize = 3;

/// 三个机械轴
///
/// 枚举判别值同时是所有按轴数组的下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Axis {
    Pitch = 0,
    Roll = 1,
    Yaw = 2,
}

impl Axis {
    /// 按下标序遍历
    pub const ALL: [Axis; AXIS_COUNT] = [Axis::Pitch, Axis::Roll, Axis::Yaw];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// 轴忽略掩码
///
/// 置位的轴不受当前命令控制。在线格式里同一信息编码在
/// 位置命令的标志字节中（另一套位值，见协议层）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisFlags(u8);

impl AxisFlags {
    /// 所有轴都受控
    pub const NONE: AxisFlags = AxisFlags(0);

    pub const IGNORE_PITCH: AxisFlags = AxisFlags(0x01);
    pub const IGNORE_ROLL: AxisFlags = AxisFlags(0x02);
    pub const IGNORE_YAW: AxisFlags = AxisFlags(0x04);

    /// 所有轴都被忽略
    pub const IGNORE_ALL: AxisFlags = AxisFlags(0x07);

    /// 忽略单个轴
    pub fn ignore(axis: Axis) -> AxisFlags {
        AxisFlags(1 << axis.index())
    }

    /// 只控制 `axis`，忽略其余两轴
    pub fn control_only(axis: Axis) -> AxisFlags {
        AxisFlags(Self::IGNORE_ALL.0 & !(1 << axis.index()))
    }

    /// `axis` 是否被忽略
    pub fn ignores(self, axis: Axis) -> bool {
        self.0 & (1 << axis.index()) != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// 并集（两边都忽略才忽略 → 交集语义在 [`intersect_controlled`]）
    ///
    /// [`intersect_controlled`]: AxisFlags::intersect_controlled
    pub fn union(self, other: AxisFlags) -> AxisFlags {
        AxisFlags(self.0 | other.0)
    }

    /// 受控轴的并集：任一侧控制的轴都算受控
    pub fn intersect_controlled(self, other: AxisFlags) -> AxisFlags {
        AxisFlags(self.0 & other.0)
    }
}

/// 三轴角位置（度）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub axis_deg: [f64; AXIS_COUNT],
}

impl Position {
    /// 单轴取值
    pub fn get(&self, axis: Axis) -> f64 {
        self.axis_deg[axis.index()]
    }

    pub fn set(&mut self, axis: Axis, value_deg: f64) {
        self.axis_deg[axis.index()] = value_deg;
    }

    /// 只覆盖受控轴
    pub fn copy_controlled(&mut self, from: &Position, flags: AxisFlags) {
        for axis in Axis::ALL {
            if !flags.ignores(axis) {
                self.axis_deg[axis.index()] = from.axis_deg[axis.index()];
            }
        }
    }
}

/// 三轴角速度（度/秒）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Speed {
    pub axis_deg_s: [f64; AXIS_COUNT],
}

impl Speed {
    pub fn get(&self, axis: Axis) -> f64 {
        self.axis_deg_s[axis.index()]
    }

    pub fn set(&mut self, axis: Axis, value_deg_s: f64) {
        self.axis_deg_s[axis.index()] = value_deg_s;
    }

    /// 只覆盖受控轴
    pub fn copy_controlled(&mut self, from: &Speed, flags: AxisFlags) {
        for axis in Axis::ALL {
            if !flags.ignores(axis) {
                self.axis_deg_s[axis.index()] = from.axis_deg_s[axis.index()];
            }
        }
    }

    /// 是否所有轴都静止
    pub fn is_stopped(&self) -> bool {
        self.axis_deg_s.iter().all(|&v| v == 0.0)
    }
}

/// 单轴配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisConfig {
    /// 角度上限（度）
    pub max_deg: f64,
    /// 角度下限（度）
    pub min_deg: f64,
    /// 装配偏置（度）；内部位置都含偏置
    pub offset_deg: f64,
    /// 该轴的移动速度（度/秒），用于估算移动时长
    pub speed_deg_s: f64,
    /// 电机刚度（0..100%）
    pub stiffness_pc: f64,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            max_deg: POSITION_MAX_DEG,
            min_deg: POSITION_MIN_DEG,
            offset_deg: 0.0,
            speed_deg_s: SPEED_DEFAULT_DEG_S,
            stiffness_pc: STIFFNESS_DEFAULT_PC,
        }
    }
}

/// 三轴配置
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GimbalConfig {
    pub axis: [AxisConfig; AXIS_COUNT],
}

/// 单轴的设备能力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisInfo {
    pub speed_max_deg_s: f64,
}

impl Default for AxisInfo {
    fn default() -> Self {
        Self {
            speed_max_deg_s: SPEED_MAX_DEG_S,
        }
    }
}

/// 云台设备信息
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GimbalInfo {
    pub name: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub ipv4_netmask: Option<Ipv4Addr>,
    /// 固件版本（主在前）
    pub version: [u8; 4],
    pub axis: [AxisInfo; AXIS_COUNT],
}

/// 对焦/变焦校准操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalOperation {
    AutoEnable,
    ManualEnable,
    SetMax,
    SetMin,
    Stop,
}

// ===== 量程常量 ===========================================================

pub const POSITION_MAX_DEG: f64 = 180.5;
pub const POSITION_MIN_DEG: f64 = -180.5;

pub const SPEED_MAX_DEG_S: f64 = 360.0;
pub const SPEED_MIN_DEG_S: f64 = -360.0;

pub const FOCUS_POSITION_MAX_PC: f64 = 100.0;
pub const FOCUS_POSITION_MIN_PC: f64 = 0.0;

pub const FOCUS_SPEED_MAX_PC_S: f64 = 100.0;
pub const FOCUS_SPEED_MIN_PC_S: f64 = -100.0;
pub const FOCUS_SPEED_STOP_PC_S: f64 = 0.0;

pub(crate) const SPEED_DEFAULT_DEG_S: f64 = 360.0;
pub(crate) const STIFFNESS_DEFAULT_PC: f64 = 50.0;

/// 配置校验用的最小轴速
pub(crate) const SPEED_CONFIG_MIN_DEG_S: f64 = 0.1;

/// 云台能力集
///
/// 协议引擎对上暴露的全部操作；映射层只依赖这个 trait，
/// 因此可以用任意实现（包括测试桩）顶替真实引擎。
pub trait GimbalControl: Send + Sync {
    /// 启动连接状态机并完成启动事务序列
    fn activate(&self) -> Result<(), GimbalError>;

    fn config_get(&self) -> GimbalConfig;
    fn config_set(&self, config: &GimbalConfig) -> Result<(), GimbalError>;

    fn focus_cal(&self, operation: CalOperation) -> Result<(), GimbalError>;
    fn focus_position_set(&self, position_pc: f64) -> Result<(), GimbalError>;
    fn focus_speed_set(&self, speed_pc_s: f64) -> Result<(), GimbalError>;

    fn info_get(&self) -> GimbalInfo;

    /// 读当前位置；位置不新鲜时返回前先向设备查询一次
    fn position_get(&self) -> Result<Position, GimbalError>;
    fn position_set(
        &self,
        position: &Position,
        flags: AxisFlags,
        duration_ms: u32,
    ) -> Result<(), GimbalError>;

    fn speed_get(&self) -> Result<Speed, GimbalError>;
    fn speed_set(&self, speed: &Speed, flags: AxisFlags) -> Result<(), GimbalError>;
    fn speed_stop(&self) -> Result<(), GimbalError>;

    fn track_speed_set(&self, speed_pc: f64) -> Result<(), GimbalError>;
    fn track_switch(&self) -> Result<(), GimbalError>;

    /// 诊断信息转储
    fn debug_dump(&self, out: &mut dyn std::io::Write) -> Result<(), GimbalError>;
}

/// 云台目录
///
/// 发现流程（具体探测器）在系统外；映射层在绑定阶段通过这个
/// 能力按序号或 IPv4 地址取得云台句柄。
pub trait GimbalProvider {
    fn gimbal_at(&self, index: usize) -> Option<std::sync::Arc<dyn GimbalControl>>;

    fn gimbal_by_ipv4(&self, addr: Ipv4Addr) -> Option<std::sync::Arc<dyn GimbalControl>>;
}
