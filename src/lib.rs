//! Gimbal Bridge - 三轴云台遥操作桥
//!
//! 把人手里的游戏手柄接到 CAN 总线上的电动云台（外加可选的广播
//! 切换台相机通道）。事件经控制映射层翻译成运动命令，由协议引擎
//! 打包成带双重 CRC 的二进制帧，切成 CAN 载荷发给 TCP 桥接器。
//!
//! # 架构层次
//!
//! - **链路层** (`can`)：CAN 帧值类型、链路 trait、TCP 桥接后端
//! - **协议层** (`protocol`)：帧编解码、入站校验、事务
//! - **语义层** (`gimbal`)：限位、位置状态机、对焦积分、能力 trait
//! - **引擎** (`engine`)：六态连接状态机 + 10 ms 工作线程
//! - **映射层** (`mapper`)：控制表、云台绑定、加速混合器
//! - **协作方接口** (`gamepad`, `atem`)：事件源与相机执行器由
//!   嵌入方实现

pub mod atem;
pub mod can;
pub mod engine;
pub mod error;
pub mod gamepad;
pub mod gimbal;
pub mod mapper;
pub mod protocol;

// Re-export 核心类型（简化用户导入）
pub use can::{CanError, CanFrame, CanLink, TcpCanLink};
pub use engine::{GimbalEngine, LinkState};
pub use error::{GimbalError, QueueOutcome};
pub use gamepad::{Action, Control, EventSource, GamepadEvent};
pub use gimbal::{
    Axis, AxisFlags, CalOperation, GimbalConfig, GimbalControl, GimbalInfo, GimbalProvider,
    Position, Speed,
};
pub use mapper::{ControlLink, Function, MessageReceiver};
