//! 云台协议层
//!
//! 负责把命令编码为带校验的二进制帧、把帧切分为 CAN 载荷，
//! 以及对端应答的重组与逐字节校验。
//!
//! ## 字节序与标度
//!
//! 帧内多字节字段为小端。角度与角速度编码为有符号 16 位整数，
//! 单位分别是 0.1 度和 0.1 度/秒；对焦量程 0..100% 映射到 12 位
//! 原始值 0..4095。

pub mod constants;
pub mod crc;
pub mod frame;
pub mod rx;
pub mod transaction;

pub use constants::*;
pub use frame::TxFrame;
pub use rx::{ReplyView, RxBuffer};
pub use transaction::{ReplyKind, Transaction};

/// 角度 → 原始值（0.1 度，向零截断）
pub fn angle_to_raw(angle_deg: f64) -> i16 {
    (angle_deg * 10.0) as i16
}

/// 原始值 → 角度
pub fn raw_to_angle(raw: i16) -> f64 {
    raw as f64 / 10.0
}

/// 角速度 → 原始值（0.1 度/秒）
pub fn speed_to_raw(speed_deg_s: f64) -> i16 {
    (speed_deg_s * 10.0) as i16
}

/// 对焦百分比 → 12 位原始值
pub fn focus_to_raw(value_pc: f64) -> i16 {
    debug_assert!((0.0..=100.0).contains(&value_pc));

    (value_pc / 100.0 * 4095.0) as i16
}
