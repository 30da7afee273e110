//! 云台语义模型
//!
//! 位于具体协议之上的状态层：配置限位校验、位置状态机、
//! 对焦位置积分。引擎在 zone-0 互斥锁内持有并驱动一个实例。
//!
//! 位置状态机：
//!
//! ```text
//!              +----+================> 位置更新
//!              |    |                   | | |
//!  --+==> UNKNOWN --|----+==> MOVING <--+ | |
//!    |     |   |    |    |                | |
//!    |     |   +----|--> KNOWN <----------+ |
//!    |     |        |    |                  |
//!    |     +--> SPEED <==+------------------+
//!    |           |
//!    +-----------+
//! ```
//!
//! 内部所有位置都含装配偏置；偏置在 `position_set` 进入时加上、
//! `position_get` 返回前减去。

use tracing::debug;

use super::*;
use crate::error::{value_validate, GimbalError};

/// 位置新鲜度窗口（tick）
const POSITION_FRESH_TICKS: u32 = 15;

/// 到位判定阈值：角度差的平方小于 0.1 deg² 视为到位
const ARRIVAL_THRESHOLD_DEG2: f64 = 0.1;

/// 位置状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    /// 有新鲜的位置且未在运动
    Known,
    /// 正在向目标位置移动
    Moving,
    /// 处于速度控制
    Speed,
    /// 没有可信的位置
    Unknown,
}

/// 协议无关的云台状态
pub struct GimbalModel {
    config: GimbalConfig,
    info: GimbalInfo,

    focus_position_pc: f64,
    focus_speed_pc_s: f64,

    /// 当前运动中仍未到位的轴（置位 = 忽略）
    position_flags: AxisFlags,
    position_target: Position,
    position_current: Position,
    /// 新鲜度计数，每 tick 递减
    position_count: u32,
    position_state: PositionState,

    speed: Speed,
}

impl Default for GimbalModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GimbalModel {
    pub fn new() -> Self {
        Self {
            config: GimbalConfig::default(),
            info: GimbalInfo::default(),
            focus_position_pc: FOCUS_POSITION_MIN_PC,
            focus_speed_pc_s: FOCUS_SPEED_STOP_PC_S,
            position_flags: AxisFlags::IGNORE_ALL,
            position_target: Position::default(),
            position_current: Position::default(),
            position_count: 0,
            position_state: PositionState::Unknown,
            speed: Speed::default(),
        }
    }

    // ===== 配置 ===========================================================

    pub fn config(&self) -> &GimbalConfig {
        &self.config
    }

    pub fn config_set(&mut self, config: &GimbalConfig) -> Result<(), GimbalError> {
        self.config_validate(config)?;
        self.config = *config;
        Ok(())
    }

    pub fn config_validate(&self, config: &GimbalConfig) -> Result<(), GimbalError> {
        for axis in Axis::ALL {
            axis_config_validate(&config.axis[axis.index()], &self.info.axis[axis.index()])?;
        }
        Ok(())
    }

    /// 启动事务得到的限位/刚度直接写入，绕过校验走不到的字段
    pub(crate) fn config_mut(&mut self) -> &mut GimbalConfig {
        &mut self.config
    }

    pub fn info(&self) -> &GimbalInfo {
        &self.info
    }

    pub(crate) fn info_mut(&mut self) -> &mut GimbalInfo {
        &mut self.info
    }

    // ===== 对焦 ===========================================================

    pub fn focus_position(&self) -> f64 {
        self.focus_position_pc
    }

    pub fn focus_position_set(&mut self, position_pc: f64) -> Result<(), GimbalError> {
        value_validate(position_pc, FOCUS_POSITION_MIN_PC, FOCUS_POSITION_MAX_PC)?;
        self.focus_position_pc = position_pc;
        Ok(())
    }

    pub fn focus_speed_set(&mut self, speed_pc_s: f64) -> Result<(), GimbalError> {
        value_validate(speed_pc_s, FOCUS_SPEED_MIN_PC_S, FOCUS_SPEED_MAX_PC_S)?;
        self.focus_speed_pc_s = speed_pc_s;
        Ok(())
    }

    pub fn is_focus_moving(&self) -> bool {
        self.focus_speed_pc_s != FOCUS_SPEED_STOP_PC_S
    }

    /// 按对焦速度积分一步，返回新的对焦位置
    ///
    /// 积分步长是两个 tick（工作循环每 4 tick 里做两次对焦），
    /// 结果限幅在量程内。对焦静止时返回 `None`。
    pub(crate) fn focus_integrate(&mut self, period_ms: u32) -> Option<f64> {
        if !self.is_focus_moving() {
            return None;
        }

        let next = self.focus_position_pc + self.focus_speed_pc_s * 2.0 * period_ms as f64 / 1000.0;
        self.focus_position_pc =
            crate::error::value_limit(next, FOCUS_POSITION_MIN_PC, FOCUS_POSITION_MAX_PC);

        Some(self.focus_position_pc)
    }

    // ===== 位置 ===========================================================

    pub fn position_state(&self) -> PositionState {
        self.position_state
    }

    /// 当前位置（含偏置）；只有新鲜时返回 `Some`
    pub fn position_current(&self) -> Option<Position> {
        match self.position_state {
            PositionState::Known | PositionState::Moving | PositionState::Speed => {
                (self.position_count > 0).then_some(self.position_current)
            },
            PositionState::Unknown => None,
        }
    }

    /// 用户视角的当前位置（去偏置）
    pub fn position_get(&self) -> Result<Position, GimbalError> {
        let current = self.position_current().ok_or(GimbalError::NotReady)?;

        let mut out = Position::default();
        for axis in Axis::ALL {
            out.set(
                axis,
                current.get(axis) - self.config.axis[axis.index()].offset_deg,
            );
        }

        Ok(out)
    }

    /// 记录新的目标位置并进入 MOVING
    ///
    /// 只校验受控轴；目标的被忽略轴保持上一次的值。受控轴集合
    /// 并入既有运动（一旦受控直到到位）。
    pub fn position_set(&mut self, position: &Position, flags: AxisFlags) -> Result<(), GimbalError> {
        let mut target = Position::default();
        for axis in Axis::ALL {
            if !flags.ignores(axis) {
                target.set(
                    axis,
                    position.get(axis) + self.config.axis[axis.index()].offset_deg,
                );
            }
        }

        self.position_validate(&target, flags)?;

        self.position_flags = self.position_flags.intersect_controlled(flags);
        self.position_state = PositionState::Moving;
        self.position_target.copy_controlled(&target, flags);

        Ok(())
    }

    pub fn position_validate(
        &self,
        position: &Position,
        flags: AxisFlags,
    ) -> Result<(), GimbalError> {
        for axis in Axis::ALL {
            if flags.ignores(axis) {
                continue;
            }

            let config = &self.config.axis[axis.index()];
            let value = position.get(axis);
            if value > config.max_deg {
                return Err(GimbalError::AngleMax);
            }
            if value < config.min_deg {
                return Err(GimbalError::AngleMin);
            }
        }

        Ok(())
    }

    /// 设备报来新的位置样本
    ///
    /// 刷新新鲜度；MOVING 状态下逐轴判定到位，所有受控轴到位后
    /// 回到 KNOWN。
    pub fn position_update(&mut self, position: Position) {
        self.position_count = POSITION_FRESH_TICKS;
        self.position_current = position;

        match self.position_state {
            PositionState::Known | PositionState::Speed => {},

            PositionState::Moving => {
                for axis in Axis::ALL {
                    if !self.position_flags.ignores(axis)
                        && angle_arrived(self.position_target.get(axis), position.get(axis))
                    {
                        self.position_flags = self.position_flags.union(AxisFlags::ignore(axis));
                    }
                }

                if self.position_flags == AxisFlags::IGNORE_ALL {
                    debug!("position state MOVING -> KNOWN");
                    self.position_state = PositionState::Known;
                }
            },

            PositionState::Unknown => {
                debug!("position state UNKNOWN -> KNOWN");
                self.position_state = PositionState::Known;
            },
        }
    }

    pub(crate) fn position_target(&self) -> Position {
        self.position_target
    }

    pub(crate) fn position_flags(&self) -> AxisFlags {
        self.position_flags
    }

    // ===== 速度 ===========================================================

    /// 当前速度视图
    ///
    /// KNOWN/UNKNOWN 下为零速，MOVING 下没有可报告的速度
    /// （返回 `State`），SPEED 下为命令速度。
    pub fn speed_get(&self) -> Result<Speed, GimbalError> {
        match self.position_state {
            PositionState::Known | PositionState::Unknown => Ok(Speed::default()),
            PositionState::Moving => Err(GimbalError::State),
            PositionState::Speed => Ok(self.speed),
        }
    }

    /// 记录新的速度命令
    ///
    /// 受控轴合入既有速度；任一轴非零则进入 SPEED，否则回 KNOWN。
    pub fn speed_set(&mut self, speed: &Speed, flags: AxisFlags) -> Result<(), GimbalError> {
        self.speed_validate(speed, flags)?;

        self.position_state = PositionState::Known;
        self.speed.copy_controlled(speed, flags);

        if !self.speed.is_stopped() {
            self.position_state = PositionState::Speed;
        }

        Ok(())
    }

    pub fn speed_stop(&mut self) {
        self.position_state = PositionState::Known;
        self.speed = Speed::default();
    }

    pub(crate) fn speed(&self) -> Speed {
        self.speed
    }

    fn speed_validate(&self, speed: &Speed, flags: AxisFlags) -> Result<(), GimbalError> {
        for axis in Axis::ALL {
            if flags.ignores(axis) {
                continue;
            }

            let max = self.info.axis[axis.index()].speed_max_deg_s;
            let value = speed.get(axis);
            if value > max {
                return Err(GimbalError::SpeedMax);
            }
            if value < -max {
                return Err(GimbalError::SpeedMin);
            }
        }

        Ok(())
    }

    // ===== 周期 ===========================================================

    /// 每个工作 tick 调用一次
    ///
    /// 新鲜度耗尽的 KNOWN 退化为 UNKNOWN。
    pub fn tick(&mut self) {
        if self.position_state == PositionState::Known && self.position_count == 0 {
            debug!("position state KNOWN -> UNKNOWN");
            self.position_state = PositionState::Unknown;
        }

        if self.position_count > 0 {
            self.position_count -= 1;
        }
    }
}

/// 到位判定
fn angle_arrived(target_deg: f64, actual_deg: f64) -> bool {
    let diff = target_deg - actual_deg;
    diff * diff < ARRIVAL_THRESHOLD_DEG2
}

fn axis_config_validate(config: &AxisConfig, info: &AxisInfo) -> Result<(), GimbalError> {
    if config.max_deg > POSITION_MAX_DEG {
        return Err(GimbalError::AngleMax);
    }

    if config.min_deg < POSITION_MIN_DEG || config.max_deg < config.min_deg {
        return Err(GimbalError::AngleMin);
    }

    if config.speed_deg_s < SPEED_CONFIG_MIN_DEG_S || config.speed_deg_s > info.speed_max_deg_s {
        return Err(GimbalError::Speed);
    }

    value_validate(config.stiffness_pc, 0.0, 100.0)
}
