//! 控制映射层
//!
//! 手柄事件与云台/相机操作之间的可配置翻译器。持有运行期可编辑
//! 的控制表、若干云台绑定（含家位与切换台端口）和一个速度加速
//! 混合器。事件由事件源线程经 crossbeam 通道送到派发线程，在
//! 派发线程上逐个执行；映射层自身不假设并发事件。
//!
//! 启动流程：读配置 → 绑定云台目录 → `start()`（激活云台并启动
//! 事件源）。`stop()` 之后实例不可重启。

pub mod config;
pub mod table;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

pub use config::{parse_binding, parse_line, BindingSpec, ConfigLine, GimbalRef};
pub use table::{ControlTable, Function, TableEntry};

use crate::atem::{self, CameraActuator, CameraType};
use crate::error::{value_limit, GimbalError};
use crate::gamepad::{EventSource, GamepadEvent};
use crate::gimbal::{
    Axis, AxisFlags, CalOperation, GimbalControl, GimbalProvider, Position, Speed,
    FOCUS_POSITION_MAX_PC, FOCUS_POSITION_MIN_PC, FOCUS_SPEED_MAX_PC_S, FOCUS_SPEED_MIN_PC_S,
    POSITION_MAX_DEG, POSITION_MIN_DEG, SPEED_MAX_DEG_S, SPEED_MIN_DEG_S,
};

/// 按轴加速系数：偏航全速、俯仰半速、横滚不加速
const BOOST_AXIS: [f64; 3] = [0.5, 0.0, 1.0];

/// 校准序列里 AUTO_ENABLE 与 STOP 之间的停顿
const CALIBRATION_PAUSE: Duration = Duration::from_secs(1);

/// 事件转发的接收方
///
/// 映射层把 FORWARD 表项命中的事件（携带 configured 代码）和
/// 没有表项的事件（携带 unknown 代码）交给它。返回值表示事件
/// 是否被消费。
pub trait MessageReceiver: Send + Sync {
    fn process_event(&self, code: u32, event: &GamepadEvent) -> bool;
}

/// 切换台连接工厂
///
/// 真正的切换台 SDK 在系统之外，由嵌入方注入。
pub type AtemFactory =
    Box<dyn Fn(&str) -> Result<Arc<dyn CameraActuator>, GimbalError> + Send + Sync>;

/// 一个云台绑定
struct GimbalBinding {
    gimbal: Option<Arc<dyn GimbalControl>>,
    /// 切换台端口（1..=8），0 = 未绑定
    atem_port: u32,
    camera_type: CameraType,
    home: Position,
}

/// 事件驱动的映射状态
struct MapperCore {
    table: ControlTable,

    atem: Option<Arc<dyn CameraActuator>>,

    gimbals: Vec<GimbalBinding>,
    /// 配置里声明、尚未解析的绑定描述串
    binding_specs: Vec<String>,
    gimbal_index: usize,

    /// 每轴最近一次速度命令的归一化值（加速混合器用）
    speed_command: Speed,
    speed_boost: f64,

    receiver: Option<Arc<dyn MessageReceiver>>,
    receiver_configured: u32,
    receiver_unknown: u32,
}

impl MapperCore {
    fn new() -> Self {
        Self {
            table: ControlTable::with_defaults(),
            atem: None,
            gimbals: Vec::new(),
            binding_specs: Vec::new(),
            gimbal_index: 0,
            speed_command: Speed::default(),
            speed_boost: 0.0,
            receiver: None,
            receiver_configured: 0,
            receiver_unknown: 0,
        }
    }

    fn current_gimbal(&self) -> Option<Arc<dyn GimbalControl>> {
        self.gimbals.get(self.gimbal_index)?.gimbal.clone()
    }

    fn current_atem(&self) -> Option<(Arc<dyn CameraActuator>, u32, CameraType)> {
        let binding = self.gimbals.get(self.gimbal_index)?;
        if binding.atem_port == 0 {
            return None;
        }

        match &self.atem {
            Some(actuator) => Some((actuator.clone(), binding.atem_port, binding.camera_type)),
            None => {
                error!("no ATEM connected");
                None
            },
        }
    }

    /// 活动云台变更：清空速度命令记忆
    fn on_gimbal_changed(&mut self) {
        self.speed_command = Speed::default();
    }

    // ===== 事件入口 =======================================================

    fn on_event(&mut self, event: &GamepadEvent) {
        let entry = match self.table.find(event.action, event.control) {
            Some(entry) => *entry,
            None => {
                if let Some(receiver) = &self.receiver {
                    if self.receiver_unknown != 0 {
                        receiver.process_event(self.receiver_unknown, event);
                    }
                }
                return;
            },
        };

        trace!(function = entry.function.name(), value = event.value_pc, "dispatch");

        let factor = entry.factor;
        let offset = entry.offset;
        let value = event.value_pc;

        match entry.function {
            Function::GimbalSelect => self.function_gimbal_select(factor),
            Function::Home => self.function_home(factor),
            Function::HomePitch => self.function_home_axis(Axis::Pitch, factor),
            Function::HomeYaw => self.function_home_axis(Axis::Yaw, factor),

            Function::AtemZoom => self.function_atem_zoom(factor, value),
            Function::Focus => self.function_focus_speed(factor, value),
            Function::Pitch => self.function_axis(Axis::Pitch, factor, value),
            Function::Roll => self.function_axis(Axis::Roll, factor, value),
            Function::SpeedBoost => self.function_speed_boost(factor, value),
            Function::Yaw => self.function_axis(Axis::Yaw, factor, value),
            // ZOOM 与 FOCUS 同路（镜头马达只有一路速度输入）
            Function::Zoom => self.function_focus_speed(factor, value),

            Function::AtemApertureAbsolute => self.function_atem_aperture_absolute(factor, offset, value),
            Function::AtemFocusAbsolute => self.function_atem_focus_absolute(factor, offset, value),
            Function::AtemGainAbsolute => self.function_atem_gain_absolute(factor, offset, value),
            Function::AtemZoomAbsolute => self.function_atem_zoom_absolute(factor, offset, value),
            Function::FocusAbsolute => self.function_focus_absolute(factor, offset, value),
            Function::PitchAbsolute => self.function_axis_absolute(Axis::Pitch, factor, offset, value),
            Function::RollAbsolute => self.function_axis_absolute(Axis::Roll, factor, offset, value),
            Function::YawAbsolute => self.function_axis_absolute(Axis::Yaw, factor, offset, value),
            Function::ZoomAbsolute => self.function_focus_absolute(factor, offset, value),

            Function::Forward => self.function_forward(event),

            Function::AtemApertureAuto => self.function_atem_aperture_auto(),
            Function::AtemFocusAuto => self.function_atem_focus_auto(),
            Function::FocusCalibration => self.function_calibration(),
            Function::GimbalFirst => self.function_gimbal_first(),
            Function::GimbalLast => self.function_gimbal_last(),
            Function::GimbalNext => self.function_gimbal_next(),
            Function::GimbalNextLoop => self.function_gimbal_next_loop(),
            Function::GimbalPrevious => self.function_gimbal_previous(),
            Function::GimbalPreviousLoop => self.function_gimbal_previous_loop(),
            Function::HomeSet => self.function_home_set(),
            Function::TrackSwitch => self.function_track_switch(),
            Function::ZoomCalibration => self.function_calibration(),
        }
    }

    // ===== 轴运动 =========================================================

    /// 轴速度：系数吃进加速，并记下归一化命令供混合器回溯
    fn function_axis(&mut self, axis: Axis, factor: f64, value_pc: f64) {
        let Some(gimbal) = self.current_gimbal() else { return };

        let effective = factor + self.speed_boost * BOOST_AXIS[axis.index()];

        let mut speed = Speed::default();
        speed.set(
            axis,
            value_limit(effective * value_pc, SPEED_MIN_DEG_S, SPEED_MAX_DEG_S),
        );

        if let Err(e) = gimbal.speed_set(&speed, AxisFlags::control_only(axis)) {
            error!(?axis, error = %e, "speed_set failed");
        }

        let command = if effective != 0.0 { speed.get(axis) / effective } else { 0.0 };
        self.speed_command.set(axis, command);
    }

    fn function_axis_absolute(&mut self, axis: Axis, factor: f64, offset: f64, value_pc: f64) {
        let Some(gimbal) = self.current_gimbal() else { return };

        let mut position = Position::default();
        position.set(
            axis,
            value_limit(offset + factor * value_pc, POSITION_MIN_DEG, POSITION_MAX_DEG),
        );

        if let Err(e) = gimbal.position_set(&position, AxisFlags::control_only(axis), 0) {
            error!(?axis, error = %e, "position_set failed");
        }
    }

    // ===== 家位 ===========================================================

    /// 回家时长：系数秒数，加速超过 1 时按比例缩短
    fn home_duration_ms(&self, factor: f64) -> u32 {
        let mut duration_ms = factor * 1000.0;
        if self.speed_boost > 1.0 {
            duration_ms /= self.speed_boost;
        }

        duration_ms as u32
    }

    fn function_home(&mut self, factor: f64) {
        let Some(binding) = self.gimbals.get(self.gimbal_index) else { return };
        let Some(gimbal) = binding.gimbal.clone() else { return };

        let duration_ms = self.home_duration_ms(factor);
        if let Err(e) = gimbal.position_set(&binding.home, AxisFlags::NONE, duration_ms) {
            error!(error = %e, "home move failed");
        }
    }

    fn function_home_axis(&mut self, axis: Axis, factor: f64) {
        let Some(binding) = self.gimbals.get(self.gimbal_index) else { return };
        let Some(gimbal) = binding.gimbal.clone() else { return };

        let duration_ms = self.home_duration_ms(factor);
        let home = binding.home;
        if let Err(e) = gimbal.position_set(&home, AxisFlags::control_only(axis), duration_ms) {
            error!(?axis, error = %e, "home move failed");
        }
    }

    fn function_home_set(&mut self) {
        let Some(gimbal) = self.current_gimbal() else { return };

        match gimbal.position_get() {
            Ok(position) => {
                if let Some(binding) = self.gimbals.get_mut(self.gimbal_index) {
                    binding.home = position;
                }
            },
            Err(e) => error!(error = %e, "home set failed"),
        }
    }

    // ===== 云台选择 =======================================================

    fn function_gimbal_select(&mut self, factor: f64) {
        self.gimbal_index = factor as usize;
        if self.gimbal_index >= self.gimbals.len() {
            self.gimbal_index = 0;
        }

        self.on_gimbal_changed();
    }

    fn function_gimbal_first(&mut self) {
        self.gimbal_index = 0;
        self.on_gimbal_changed();
    }

    fn function_gimbal_last(&mut self) {
        if self.gimbals.is_empty() {
            return;
        }

        self.gimbal_index = self.gimbals.len() - 1;
        self.on_gimbal_changed();
    }

    fn function_gimbal_next(&mut self) {
        self.gimbal_index += 1;
        if self.gimbal_index >= self.gimbals.len() {
            self.gimbal_index = self.gimbals.len().saturating_sub(1);
        }

        self.on_gimbal_changed();
    }

    fn function_gimbal_next_loop(&mut self) {
        self.gimbal_index += 1;
        if self.gimbal_index >= self.gimbals.len() {
            self.gimbal_index = 0;
        }

        self.on_gimbal_changed();
    }

    fn function_gimbal_previous(&mut self) {
        if self.gimbal_index > 0 {
            self.gimbal_index -= 1;
            self.on_gimbal_changed();
        }
    }

    fn function_gimbal_previous_loop(&mut self) {
        if self.gimbal_index > 0 {
            self.gimbal_index -= 1;
        } else if !self.gimbals.is_empty() {
            self.gimbal_index = self.gimbals.len() - 1;
        }

        self.on_gimbal_changed();
    }

    // ===== 对焦/变焦 ======================================================

    fn function_focus_speed(&mut self, factor: f64, value_pc: f64) {
        let Some(gimbal) = self.current_gimbal() else { return };

        let speed_pc_s = value_limit(factor * value_pc, FOCUS_SPEED_MIN_PC_S, FOCUS_SPEED_MAX_PC_S);
        if let Err(e) = gimbal.focus_speed_set(speed_pc_s) {
            error!(error = %e, "focus speed failed");
        }
    }

    fn function_focus_absolute(&mut self, factor: f64, offset: f64, value_pc: f64) {
        let Some(gimbal) = self.current_gimbal() else { return };

        let position_pc = value_limit(
            offset + factor * value_pc,
            FOCUS_POSITION_MIN_PC,
            FOCUS_POSITION_MAX_PC,
        );
        if let Err(e) = gimbal.focus_position_set(position_pc) {
            error!(error = %e, "focus position failed");
        }
    }

    /// 对焦/变焦行程校准：AUTO_ENABLE，停一秒，STOP
    fn function_calibration(&mut self) {
        let Some(gimbal) = self.current_gimbal() else { return };

        match gimbal.focus_cal(CalOperation::AutoEnable) {
            Ok(()) => std::thread::sleep(CALIBRATION_PAUSE),
            Err(e) => warn!(error = %e, "calibration enable failed"),
        }

        if let Err(e) = gimbal.focus_cal(CalOperation::Stop) {
            error!(error = %e, "calibration stop failed");
        }
    }

    // ===== 加速混合器 =====================================================

    /// 加速档变化时，把增量追加到所有在动的轴上
    ///
    /// 每轴追加 `Δboost × 轴系数 × 原始速度命令`，随后把事件值
    /// 原样转发到跟踪速度通道。
    fn function_speed_boost(&mut self, factor: f64, value_pc: f64) {
        let Some(gimbal) = self.current_gimbal() else { return };

        let previous = self.speed_boost;
        self.speed_boost = factor * value_pc / 100.0;

        let delta = self.speed_boost - previous;
        if delta != 0.0 {
            match gimbal.speed_get() {
                Ok(mut speed) => {
                    for axis in Axis::ALL {
                        if speed.get(axis) != 0.0 && self.speed_command.get(axis) != 0.0 {
                            let adjusted = speed.get(axis)
                                + delta * BOOST_AXIS[axis.index()] * self.speed_command.get(axis);
                            speed.set(axis, adjusted);
                        }
                    }

                    if let Err(e) = gimbal.speed_set(&speed, AxisFlags::NONE) {
                        error!(error = %e, "boost speed_set failed");
                    }
                },
                // MOVING 状态下没有可调的速度
                Err(_) => {},
            }
        }

        if let Err(e) = gimbal.track_speed_set(value_pc) {
            error!(error = %e, "track speed failed");
        }
    }

    // ===== 切换台 =========================================================

    fn function_atem_zoom(&mut self, factor: f64, value_pc: f64) {
        let Some((atem, port, _)) = self.current_atem() else { return };

        let value = value_limit(factor * value_pc, -100.0, 100.0);
        if let Err(e) = atem.zoom(port, value) {
            error!(port, error = %e, "ATEM zoom failed");
        }
    }

    fn function_atem_aperture_absolute(&mut self, factor: f64, offset: f64, value_pc: f64) {
        let Some((atem, port, _)) = self.current_atem() else { return };

        let value = value_limit(factor * value_pc + offset, 0.0, 100.0);
        if let Err(e) = atem.aperture_absolute(port, value) {
            error!(port, error = %e, "ATEM aperture failed");
        }
    }

    fn function_atem_focus_absolute(&mut self, factor: f64, offset: f64, value_pc: f64) {
        let Some((atem, port, camera_type)) = self.current_atem() else { return };

        let value = value_limit(factor * value_pc + offset, 0.0, 100.0);
        if let Err(e) = atem.focus_absolute(port, value, camera_type) {
            error!(port, error = %e, "ATEM focus failed");
        }
    }

    fn function_atem_gain_absolute(&mut self, factor: f64, offset: f64, value_pc: f64) {
        let Some((atem, port, _)) = self.current_atem() else { return };

        let value = value_limit(factor * value_pc + offset, 0.0, 100.0);
        if let Err(e) = atem.gain_absolute(port, value) {
            error!(port, error = %e, "ATEM gain failed");
        }
    }

    fn function_atem_zoom_absolute(&mut self, factor: f64, offset: f64, value_pc: f64) {
        let Some((atem, port, _)) = self.current_atem() else { return };

        let value = value_limit(offset + factor * value_pc, 0.0, 100.0);
        if let Err(e) = atem.zoom_absolute(port, value) {
            error!(port, error = %e, "ATEM zoom absolute failed");
        }
    }

    fn function_atem_aperture_auto(&mut self) {
        let Some((atem, port, _)) = self.current_atem() else { return };

        if let Err(e) = atem.aperture_auto(port) {
            error!(port, error = %e, "ATEM aperture auto failed");
        }
    }

    fn function_atem_focus_auto(&mut self) {
        let Some((atem, port, _)) = self.current_atem() else { return };

        if let Err(e) = atem.focus_auto(port) {
            error!(port, error = %e, "ATEM focus auto failed");
        }
    }

    // ===== 其他 ===========================================================

    fn function_track_switch(&mut self) {
        let Some(gimbal) = self.current_gimbal() else { return };

        if let Err(e) = gimbal.track_switch() {
            error!(error = %e, "track switch failed");
        }
    }

    fn function_forward(&mut self, event: &GamepadEvent) {
        if let Some(receiver) = &self.receiver {
            if self.receiver_configured != 0 {
                receiver.process_event(self.receiver_configured, event);
            }
        }
    }
}

/// 手柄 → 云台/相机的控制链路
pub struct ControlLink {
    core: Arc<Mutex<MapperCore>>,
    gamepad: Mutex<Option<Box<dyn EventSource>>>,
    atem_factory: AtemFactory,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl ControlLink {
    /// 建一条控制链路，带出厂控制表
    ///
    /// 没有注入切换台工厂时，配置里的 `ATEM` 行报 `Config`。
    pub fn new() -> Self {
        Self::with_atem_factory(Box::new(|id| {
            error!(id, "no ATEM backend registered");
            Err(GimbalError::Config)
        }))
    }

    pub fn with_atem_factory(factory: AtemFactory) -> Self {
        Self {
            core: Arc::new(Mutex::new(MapperCore::new())),
            gamepad: Mutex::new(None),
            atem_factory: factory,
            dispatch: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    // ===== 配置 ===========================================================

    /// 读入一个配置文件
    pub fn read_config_file(&self, path: &std::path::Path) -> Result<(), GimbalError> {
        let text = std::fs::read_to_string(path).map_err(|_| GimbalError::FileOpen)?;
        self.read_config_str(&text)
    }

    /// 逐行应用配置文本
    pub fn read_config_str(&self, text: &str) -> Result<(), GimbalError> {
        for line in text.lines() {
            self.apply_line(line).map_err(|e| {
                error!(line, error = %e, "invalid configuration line");
                e
            })?;
        }

        Ok(())
    }

    fn apply_line(&self, line: &str) -> Result<(), GimbalError> {
        let mut core = self.core.lock();

        match parse_line(line)? {
            ConfigLine::Skip => {},

            ConfigLine::Atem(id) => {
                let actuator = atem::find_or_create(&id, |id| (self.atem_factory)(id))?;
                core.atem = Some(actuator);
            },

            ConfigLine::Clear => core.table.clear(),

            ConfigLine::Gimbal(spec) => {
                // 先校验语法，绑定推迟到目录就位
                parse_binding(&spec)?;
                core.binding_specs.push(spec);
            },

            ConfigLine::RemoveEntry { action, control } => core.table.remove(action, control),

            ConfigLine::AddEntry {
                action,
                control,
                function,
                factor,
                offset,
            } => core.table.add(action, control, function, factor, offset)?,
        }

        Ok(())
    }

    // ===== 装配 ===========================================================

    pub fn gamepad_set(&self, gamepad: Box<dyn EventSource>) {
        *self.gamepad.lock() = Some(gamepad);
    }

    /// 注册事件转发接收方
    ///
    /// 两个代码分别用于 FORWARD 表项与无表项事件；接收方存在时至
    /// 少要有一个非零代码，不存在时两个都必须为零。
    pub fn receiver_set(
        &self,
        receiver: Option<Arc<dyn MessageReceiver>>,
        configured: u32,
        unknown: u32,
    ) -> Result<(), GimbalError> {
        match &receiver {
            None if configured != 0 || unknown != 0 => return Err(GimbalError::Code),
            Some(_) if configured == 0 && unknown == 0 => return Err(GimbalError::Code),
            _ => {},
        }

        let mut core = self.core.lock();
        core.receiver = receiver;
        core.receiver_configured = configured;
        core.receiver_unknown = unknown;
        Ok(())
    }

    /// 按配置把云台目录解析成绑定
    ///
    /// 没有任何 `GIMBAL` 行时绑定目录 0 号云台。要求有云台而目录
    /// 给不出来的绑定报 `GimbalOff`。
    pub fn bind_gimbals(&self, provider: &dyn GimbalProvider) -> Result<(), GimbalError> {
        let mut core = self.core.lock();

        let specs = if core.binding_specs.is_empty() {
            vec![String::new()]
        } else {
            core.binding_specs.clone()
        };

        for spec_text in &specs {
            let spec = parse_binding(spec_text)?;

            let gimbal = match spec.gimbal {
                GimbalRef::None => None,
                GimbalRef::Index(index) => Some(
                    provider
                        .gimbal_at(index)
                        .ok_or(GimbalError::GimbalOff)
                        .map_err(|e| {
                            error!(index, "gimbal not in catalog");
                            e
                        })?,
                ),
                GimbalRef::Ipv4(addr) => Some(
                    provider
                        .gimbal_by_ipv4(addr)
                        .ok_or(GimbalError::GimbalOff)
                        .map_err(|e| {
                            error!(%addr, "gimbal not in catalog");
                            e
                        })?,
                ),
            };

            core.gimbals.push(GimbalBinding {
                gimbal,
                atem_port: spec.atem_port,
                camera_type: spec.camera_type,
                home: Position::default(),
            });
        }

        Ok(())
    }

    // ===== 运行 ===========================================================

    /// 激活所有绑定的云台并启动事件流
    ///
    /// 装配阶段（配置、绑定、启动）假定单线程驱动。
    pub fn start(&self) -> Result<(), GimbalError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Err(GimbalError::AlreadyStopped);
        }
        if self.started.load(Ordering::Relaxed) {
            return Err(GimbalError::AlreadyStarted);
        }

        {
            let core = self.core.lock();
            for binding in &core.gimbals {
                if let Some(gimbal) = &binding.gimbal {
                    gimbal.activate()?;
                }
            }
        }

        let (events_tx, events_rx) = unbounded::<GamepadEvent>();

        {
            let mut gamepad = self.gamepad.lock();
            let gamepad = gamepad.as_mut().ok_or(GimbalError::NotAGamepad)?;
            gamepad.receiver_start(events_tx)?;
        }

        let core = self.core.clone();
        *self.dispatch.lock() = Some(std::thread::spawn(move || {
            debug!("mapper dispatch thread started");

            // 事件源停止并放掉发送端后通道断开，线程随之退出
            while let Ok(event) = events_rx.recv() {
                core.lock().on_event(&event);
            }

            debug!("mapper dispatch thread stopped");
        }));

        self.started.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// 停止事件流；实例随后只能释放，不能重启
    pub fn stop(&self) -> Result<(), GimbalError> {
        if !self.started.load(Ordering::Relaxed) {
            return Err(GimbalError::AlreadyStopped);
        }
        if self.stopped.swap(true, Ordering::Relaxed) {
            return Err(GimbalError::AlreadyStopping);
        }

        {
            let mut gamepad = self.gamepad.lock();
            if let Some(gamepad) = gamepad.as_mut() {
                gamepad.receiver_stop()?;
            }
        }

        if let Some(handle) = self.dispatch.lock().take() {
            let _ = handle.join();
        }

        Ok(())
    }

    /// 同步处理一个事件（测试与无线程嵌入用）
    pub fn on_event(&self, event: &GamepadEvent) {
        self.core.lock().on_event(event);
    }

    /// 当前活动云台的序号
    pub fn gimbal_index(&self) -> usize {
        self.core.lock().gimbal_index
    }

    /// 当前加速档
    pub fn speed_boost(&self) -> f64 {
        self.core.lock().speed_boost
    }
}

impl Default for ControlLink {
    fn default() -> Self {
        Self::new()
    }
}
