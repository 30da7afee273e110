//! 控制表
//!
//! 运行期可编辑的 `(动作, 控件) → (功能, 系数, 偏置)` 查找表。
//! 键唯一，插入即 upsert。表项顺序保留插入序，查找是线性的
//! （表最多几十行，事件频率也就手柄轮询那么快）。

use std::str::FromStr;

use crate::error::{value_validate, GimbalError};
use crate::gamepad::{Action, Control};

/// 系数允许范围
pub const FACTOR_MAX: f64 = 360.0;
pub const FACTOR_MIN: f64 = -360.0;

/// 偏置允许范围
pub const OFFSET_MAX: f64 = 180.0;
pub const OFFSET_MIN: f64 = -180.0;

/// 可映射的功能全集
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    AtemApertureAbsolute,
    AtemApertureAuto,
    AtemFocusAbsolute,
    AtemFocusAuto,
    AtemGainAbsolute,
    AtemZoom,
    AtemZoomAbsolute,
    Focus,
    FocusAbsolute,
    FocusCalibration,
    Forward,
    GimbalFirst,
    GimbalLast,
    GimbalNext,
    GimbalNextLoop,
    GimbalPrevious,
    GimbalPreviousLoop,
    GimbalSelect,
    Home,
    HomePitch,
    HomeSet,
    HomeYaw,
    Pitch,
    PitchAbsolute,
    Roll,
    RollAbsolute,
    SpeedBoost,
    TrackSwitch,
    Yaw,
    YawAbsolute,
    Zoom,
    ZoomAbsolute,
    ZoomCalibration,
}

impl Function {
    pub const ALL: [Function; 33] = [
        Function::AtemApertureAbsolute,
        Function::AtemApertureAuto,
        Function::AtemFocusAbsolute,
        Function::AtemFocusAuto,
        Function::AtemGainAbsolute,
        Function::AtemZoom,
        Function::AtemZoomAbsolute,
        Function::Focus,
        Function::FocusAbsolute,
        Function::FocusCalibration,
        Function::Forward,
        Function::GimbalFirst,
        Function::GimbalLast,
        Function::GimbalNext,
        Function::GimbalNextLoop,
        Function::GimbalPrevious,
        Function::GimbalPreviousLoop,
        Function::GimbalSelect,
        Function::Home,
        Function::HomePitch,
        Function::HomeSet,
        Function::HomeYaw,
        Function::Pitch,
        Function::PitchAbsolute,
        Function::Roll,
        Function::RollAbsolute,
        Function::SpeedBoost,
        Function::TrackSwitch,
        Function::Yaw,
        Function::YawAbsolute,
        Function::Zoom,
        Function::ZoomAbsolute,
        Function::ZoomCalibration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Function::AtemApertureAbsolute => "ATEM_APERTURE_ABSOLUTE",
            Function::AtemApertureAuto => "ATEM_APERTURE_AUTO",
            Function::AtemFocusAbsolute => "ATEM_FOCUS_ABSOLUTE",
            Function::AtemFocusAuto => "ATEM_FOCUS_AUTO",
            Function::AtemGainAbsolute => "ATEM_GAIN_ABSOLUTE",
            Function::AtemZoom => "ATEM_ZOOM",
            Function::AtemZoomAbsolute => "ATEM_ZOOM_ABSOLUTE",
            Function::Focus => "FOCUS",
            Function::FocusAbsolute => "FOCUS_ABSOLUTE",
            Function::FocusCalibration => "FOCUS_CALIBRATION",
            Function::Forward => "FORWARD",
            Function::GimbalFirst => "GIMBAL_FIRST",
            Function::GimbalLast => "GIMBAL_LAST",
            Function::GimbalNext => "GIMBAL_NEXT",
            Function::GimbalNextLoop => "GIMBAL_NEXT_LOOP",
            Function::GimbalPrevious => "GIMBAL_PREVIOUS",
            Function::GimbalPreviousLoop => "GIMBAL_PREVIOUS_LOOP",
            Function::GimbalSelect => "GIMBAL_SELECT",
            Function::Home => "HOME",
            Function::HomePitch => "HOME_PITCH",
            Function::HomeSet => "HOME_SET",
            Function::HomeYaw => "HOME_YAW",
            Function::Pitch => "PITCH",
            Function::PitchAbsolute => "PITCH_ABSOLUTE",
            Function::Roll => "ROLL",
            Function::RollAbsolute => "ROLL_ABSOLUTE",
            Function::SpeedBoost => "SPEED_BOOST",
            Function::TrackSwitch => "TRACK_SWITCH",
            Function::Yaw => "YAW",
            Function::YawAbsolute => "YAW_ABSOLUTE",
            Function::Zoom => "ZOOM",
            Function::ZoomAbsolute => "ZOOM_ABSOLUTE",
            Function::ZoomCalibration => "ZOOM_CALIBRATION",
        }
    }
}

impl FromStr for Function {
    type Err = GimbalError;

    fn from_str(s: &str) -> Result<Self, GimbalError> {
        Function::ALL
            .into_iter()
            .find(|function| function.name() == s)
            .ok_or(GimbalError::Function)
    }
}

/// 一行映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableEntry {
    pub action: Action,
    pub control: Control,
    pub function: Function,
    pub factor: f64,
    pub offset: f64,
}

/// 控制表
#[derive(Debug, Clone, Default)]
pub struct ControlTable {
    entries: Vec<TableEntry>,
}

impl ControlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 出厂映射
    ///
    /// 左摇杆横轴/右摇杆纵轴给偏航/俯仰，扳机给对焦，A/B/X/Y 是
    /// 家位操作，十字键切云台。
    pub fn with_defaults() -> Self {
        let mut table = Self::new();

        let defaults = [
            (Action::Changed, Control::Analog0X, Function::Yaw, 2.0, 0.0),
            (Action::Changed, Control::Analog1Y, Function::Pitch, 2.0, 0.0),
            (Action::Changed, Control::TriggerLeft, Function::Focus, -2.0, 0.0),
            (Action::Changed, Control::TriggerRight, Function::Focus, 2.0, 0.0),
            (Action::Disconnected, Control::None, Function::Forward, 0.0, 0.0),
            (Action::Pressed, Control::ButtonA, Function::HomeSet, 0.0, 0.0),
            (Action::Pressed, Control::ButtonB, Function::Home, 0.0, 0.0),
            (Action::Pressed, Control::ButtonBack, Function::Forward, 0.0, 0.0),
            (Action::Pressed, Control::ButtonLeft, Function::TrackSwitch, 0.0, 0.0),
            (Action::Pressed, Control::ButtonStart, Function::FocusCalibration, 0.0, 0.0),
            (Action::Pressed, Control::ButtonX, Function::HomeYaw, 0.0, 0.0),
            (Action::Pressed, Control::ButtonY, Function::HomePitch, 0.0, 0.0),
            (Action::Pressed, Control::PadBottom, Function::GimbalFirst, 0.0, 0.0),
            (Action::Pressed, Control::PadLeft, Function::GimbalPrevious, 0.0, 0.0),
            (Action::Pressed, Control::PadRight, Function::GimbalNext, 0.0, 0.0),
            (Action::Pressed, Control::PadTop, Function::GimbalLast, 0.0, 0.0),
        ];

        for (action, control, function, factor, offset) in defaults {
            let added = table.add(action, control, function, factor, offset);
            debug_assert!(added.is_ok());
        }

        table
    }

    /// upsert 一行
    ///
    /// 系数限 ±360、偏置限 ±180，越界分别报 `Max`/`Min`。
    pub fn add(
        &mut self,
        action: Action,
        control: Control,
        function: Function,
        factor: f64,
        offset: f64,
    ) -> Result<(), GimbalError> {
        value_validate(factor, FACTOR_MIN, FACTOR_MAX)?;
        value_validate(offset, OFFSET_MIN, OFFSET_MAX)?;

        match self.find_mut(action, control) {
            Some(entry) => {
                entry.function = function;
                entry.factor = factor;
                entry.offset = offset;
            },
            None => self.entries.push(TableEntry {
                action,
                control,
                function,
                factor,
                offset,
            }),
        }

        Ok(())
    }

    pub fn remove(&mut self, action: Action, control: Control) {
        self.entries
            .retain(|entry| !(entry.action == action && entry.control == control));
    }

    pub fn find(&self, action: Action, control: Control) -> Option<&TableEntry> {
        self.entries
            .iter()
            .find(|entry| entry.action == action && entry.control == control)
    }

    fn find_mut(&mut self, action: Action, control: Control) -> Option<&mut TableEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.action == action && entry.control == control)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
