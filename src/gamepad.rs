//! 手柄事件模型
//!
//! 具体的 HID 轮询属于外部协作方；这里只定义事件词汇表和事件源
//! 必须满足的 trait。事件经 crossbeam 通道送入映射层的派发线程。
//!
//! 名字表与配置文件里的大写记号一一对应。

use std::str::FromStr;

use crossbeam_channel::Sender;

use crate::error::GimbalError;

/// 事件动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 模拟量变化（摇杆、扳机）
    Changed,
    /// 手柄断开；事件源保证静默前恰好发一次
    Disconnected,
    Pressed,
    Released,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Changed,
        Action::Disconnected,
        Action::Pressed,
        Action::Released,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Changed => "CHANGED",
            Action::Disconnected => "DISCONNECTED",
            Action::Pressed => "PRESSED",
            Action::Released => "RELEASED",
        }
    }
}

impl FromStr for Action {
    type Err = GimbalError;

    fn from_str(s: &str) -> Result<Self, GimbalError> {
        Action::ALL
            .into_iter()
            .find(|action| action.name() == s)
            .ok_or(GimbalError::Action)
    }
}

/// 手柄控件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// 无控件（例如 DISCONNECTED 事件）
    None,

    Analog0X,
    Analog0Y,
    Analog1X,
    Analog1Y,
    ButtonA,
    ButtonAnalog0,
    ButtonAnalog1,
    ButtonB,
    ButtonBack,
    ButtonLeft,
    ButtonRight,
    ButtonStart,
    ButtonX,
    ButtonY,
    PadBottom,
    PadLeft,
    PadRight,
    PadTop,
    TriggerLeft,
    TriggerRight,
}

impl Control {
    pub const ALL: [Control; 21] = [
        Control::None,
        Control::Analog0X,
        Control::Analog0Y,
        Control::Analog1X,
        Control::Analog1Y,
        Control::ButtonA,
        Control::ButtonAnalog0,
        Control::ButtonAnalog1,
        Control::ButtonB,
        Control::ButtonBack,
        Control::ButtonLeft,
        Control::ButtonRight,
        Control::ButtonStart,
        Control::ButtonX,
        Control::ButtonY,
        Control::PadBottom,
        Control::PadLeft,
        Control::PadRight,
        Control::PadTop,
        Control::TriggerLeft,
        Control::TriggerRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Control::None => "CONTROL_NONE",
            Control::Analog0X => "ANALOG_0_X",
            Control::Analog0Y => "ANALOG_0_Y",
            Control::Analog1X => "ANALOG_1_X",
            Control::Analog1Y => "ANALOG_1_Y",
            Control::ButtonA => "BUTTON_A",
            Control::ButtonAnalog0 => "BUTTON_ANALOG_0",
            Control::ButtonAnalog1 => "BUTTON_ANALOG_1",
            Control::ButtonB => "BUTTON_B",
            Control::ButtonBack => "BUTTON_BACK",
            Control::ButtonLeft => "BUTTON_LEFT",
            Control::ButtonRight => "BUTTON_RIGHT",
            Control::ButtonStart => "BUTTON_START",
            Control::ButtonX => "BUTTON_X",
            Control::ButtonY => "BUTTON_Y",
            Control::PadBottom => "PAD_BOTTOM",
            Control::PadLeft => "PAD_LEFT",
            Control::PadRight => "PAD_RIGHT",
            Control::PadTop => "PAD_TOP",
            Control::TriggerLeft => "TRIGGER_LEFT",
            Control::TriggerRight => "TRIGGER_RIGHT",
        }
    }
}

impl FromStr for Control {
    type Err = GimbalError;

    fn from_str(s: &str) -> Result<Self, GimbalError> {
        Control::ALL
            .into_iter()
            .find(|control| control.name() == s)
            .ok_or(GimbalError::Control)
    }
}

/// 一个手柄事件
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GamepadEvent {
    pub action: Action,
    pub control: Control,
    /// 模拟量百分比（按键事件为 0）
    pub value_pc: f64,
}

impl GamepadEvent {
    pub fn new(action: Action, control: Control, value_pc: f64) -> Self {
        Self {
            action,
            control,
            value_pc,
        }
    }
}

/// 手柄事件源
///
/// 实现方在自己的线程里轮询硬件，把事件发进 `events` 通道。
/// 约定：
/// - `receiver_start` 之后事件持续流入，直到 `receiver_stop`
/// - 设备消失时发一次 DISCONNECTED 然后静默
/// - 重复 start/stop 分别返回 `AlreadyStarted`/`AlreadyStopped`
pub trait EventSource: Send {
    fn receiver_start(&mut self, events: Sender<GamepadEvent>) -> Result<(), GimbalError>;

    fn receiver_stop(&mut self) -> Result<(), GimbalError>;
}
