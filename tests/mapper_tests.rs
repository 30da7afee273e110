//! 控制映射层端到端测试
//!
//! 云台侧用记录型测试桩（实现能力 trait），事件直接喂给
//! `ControlLink::on_event`，不经线程。

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use gimbal_bridge::atem::{CameraActuator, CameraType};
use gimbal_bridge::gimbal::CalOperation;
use gimbal_bridge::{
    Action, Axis, AxisFlags, Control, ControlLink, GamepadEvent, GimbalConfig, GimbalControl,
    GimbalError, GimbalInfo, GimbalProvider, MessageReceiver, Position, Speed,
};

/// 云台调用记录
#[derive(Debug, Clone, PartialEq)]
enum GimbalCall {
    Activate,
    SpeedSet(Speed, u8),
    PositionSet(Position, u8, u32),
    FocusSpeed(f64),
    FocusPosition(f64),
    FocusCal(CalOperation),
    TrackSpeed(f64),
    TrackSwitch,
}

/// 记录型云台桩
///
/// `speed_set` 按忽略掩码合并，`speed_get` 返回合并后的值，
/// 混合器才能像对真引擎那样回读。
#[derive(Default)]
struct MockGimbal {
    calls: Mutex<Vec<GimbalCall>>,
    speed: Mutex<Speed>,
    position: Mutex<Position>,
}

impl MockGimbal {
    fn calls(&self) -> Vec<GimbalCall> {
        self.calls.lock().clone()
    }

    fn last_speed_set(&self) -> Option<(Speed, u8)> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|call| match call {
                GimbalCall::SpeedSet(speed, flags) => Some((speed, flags)),
                _ => None,
            })
    }
}

impl GimbalControl for MockGimbal {
    fn activate(&self) -> Result<(), GimbalError> {
        self.calls.lock().push(GimbalCall::Activate);
        Ok(())
    }

    fn config_get(&self) -> GimbalConfig {
        GimbalConfig::default()
    }

    fn config_set(&self, _: &GimbalConfig) -> Result<(), GimbalError> {
        Ok(())
    }

    fn focus_cal(&self, operation: CalOperation) -> Result<(), GimbalError> {
        self.calls.lock().push(GimbalCall::FocusCal(operation));
        Ok(())
    }

    fn focus_position_set(&self, position_pc: f64) -> Result<(), GimbalError> {
        self.calls.lock().push(GimbalCall::FocusPosition(position_pc));
        Ok(())
    }

    fn focus_speed_set(&self, speed_pc_s: f64) -> Result<(), GimbalError> {
        self.calls.lock().push(GimbalCall::FocusSpeed(speed_pc_s));
        Ok(())
    }

    fn info_get(&self) -> GimbalInfo {
        GimbalInfo::default()
    }

    fn position_get(&self) -> Result<Position, GimbalError> {
        Ok(*self.position.lock())
    }

    fn position_set(
        &self,
        position: &Position,
        flags: AxisFlags,
        duration_ms: u32,
    ) -> Result<(), GimbalError> {
        self.calls
            .lock()
            .push(GimbalCall::PositionSet(*position, flags.bits(), duration_ms));
        Ok(())
    }

    fn speed_get(&self) -> Result<Speed, GimbalError> {
        Ok(*self.speed.lock())
    }

    fn speed_set(&self, speed: &Speed, flags: AxisFlags) -> Result<(), GimbalError> {
        self.speed.lock().copy_controlled(speed, flags);
        self.calls
            .lock()
            .push(GimbalCall::SpeedSet(*speed, flags.bits()));
        Ok(())
    }

    fn speed_stop(&self) -> Result<(), GimbalError> {
        *self.speed.lock() = Speed::default();
        Ok(())
    }

    fn track_speed_set(&self, speed_pc: f64) -> Result<(), GimbalError> {
        self.calls.lock().push(GimbalCall::TrackSpeed(speed_pc));
        Ok(())
    }

    fn track_switch(&self) -> Result<(), GimbalError> {
        self.calls.lock().push(GimbalCall::TrackSwitch);
        Ok(())
    }

    fn debug_dump(&self, _: &mut dyn std::io::Write) -> Result<(), GimbalError> {
        Ok(())
    }
}

/// 单云台目录
struct SingleGimbal(Arc<MockGimbal>);

impl GimbalProvider for SingleGimbal {
    fn gimbal_at(&self, index: usize) -> Option<Arc<dyn GimbalControl>> {
        if index == 0 {
            Some(self.0.clone())
        } else {
            None
        }
    }

    fn gimbal_by_ipv4(&self, _: std::net::Ipv4Addr) -> Option<Arc<dyn GimbalControl>> {
        None
    }
}

fn bound_link(config: &str) -> (ControlLink, Arc<MockGimbal>) {
    let gimbal = Arc::new(MockGimbal::default());
    let link = ControlLink::new();
    link.read_config_str(config).expect("config");
    link.bind_gimbals(&SingleGimbal(gimbal.clone())).expect("bind");
    (link, gimbal)
}

fn changed(control: Control, value_pc: f64) -> GamepadEvent {
    GamepadEvent::new(Action::Changed, control, value_pc)
}

fn pressed(control: Control) -> GamepadEvent {
    GamepadEvent::new(Action::Pressed, control, 0.0)
}

#[test]
fn test_axis_mapping_scales_stick_value() {
    // 表行 CHANGED ANALOG_0_X YAW 2.0，事件 50% → 偏航 100 度/秒
    let (link, gimbal) = bound_link("");

    link.on_event(&changed(Control::Analog0X, 50.0));

    let (speed, flags) = gimbal.last_speed_set().unwrap();
    assert_eq!(speed.get(Axis::Yaw), 100.0);
    assert_eq!(speed.get(Axis::Pitch), 0.0);
    // 只控制偏航
    assert_eq!(flags, AxisFlags::control_only(Axis::Yaw).bits());
}

#[test]
fn test_axis_mapping_clamps_to_speed_limit() {
    let (link, gimbal) = bound_link("CLEAR\nCHANGED ANALOG_0_X YAW 8.0\n");

    link.on_event(&changed(Control::Analog0X, 100.0));

    let (speed, _) = gimbal.last_speed_set().unwrap();
    assert_eq!(speed.get(Axis::Yaw), 360.0);
}

#[test]
fn test_speed_boost_mixes_into_live_speed() {
    let (link, gimbal) = bound_link(
        "CLEAR\nCHANGED ANALOG_0_X YAW 1.0\nCHANGED TRIGGER_RIGHT SPEED_BOOST 1.0\n",
    );

    // 先建立 yaw 速度 50，速度命令记忆 = 50
    link.on_event(&changed(Control::Analog0X, 50.0));
    // 加速档满格：boost = 1
    link.on_event(&changed(Control::TriggerRight, 100.0));

    let (speed, flags) = gimbal.last_speed_set().unwrap();
    // 50 + 1 × 1.0 × 50 = 100
    assert_eq!(speed.get(Axis::Yaw), 100.0);
    assert_eq!(speed.get(Axis::Pitch), 0.0);
    assert_eq!(speed.get(Axis::Roll), 0.0);
    assert_eq!(flags, 0);

    // 事件值原样进跟踪速度通道
    assert!(gimbal.calls().contains(&GimbalCall::TrackSpeed(100.0)));
    assert_eq!(link.speed_boost(), 1.0);
}

#[test]
fn test_boost_scales_subsequent_axis_commands() {
    let (link, gimbal) = bound_link(
        "CLEAR\nCHANGED ANALOG_0_X YAW 1.0\nCHANGED ANALOG_1_Y PITCH 1.0\nCHANGED TRIGGER_RIGHT SPEED_BOOST 1.0\n",
    );

    link.on_event(&changed(Control::TriggerRight, 100.0)); // boost = 1

    // 偏航全额吃加速：系数 1 + 1×1 = 2
    link.on_event(&changed(Control::Analog0X, 50.0));
    let (speed, _) = gimbal.last_speed_set().unwrap();
    assert_eq!(speed.get(Axis::Yaw), 100.0);

    // 俯仰半速吃加速：系数 1 + 1×0.5 = 1.5
    link.on_event(&changed(Control::Analog1Y, 50.0));
    let (speed, _) = gimbal.last_speed_set().unwrap();
    assert_eq!(speed.get(Axis::Pitch), 75.0);
}

#[test]
fn test_axis_absolute_mapping() {
    let (link, gimbal) = bound_link("CLEAR\nCHANGED ANALOG_1_X YAW_ABSOLUTE 1.8 -90\n");

    link.on_event(&changed(Control::Analog1X, 100.0));

    let calls = gimbal.calls();
    let (position, flags, duration) = calls
        .iter()
        .find_map(|call| match call {
            GimbalCall::PositionSet(p, f, d) => Some((*p, *f, *d)),
            _ => None,
        })
        .expect("no position command");

    // -90 + 1.8 × 100 = 90
    assert_eq!(position.get(Axis::Yaw), 90.0);
    assert_eq!(flags, AxisFlags::control_only(Axis::Yaw).bits());
    assert_eq!(duration, 0);
}

#[test]
fn test_home_set_then_home_go() {
    let (link, gimbal) = bound_link("");
    *gimbal.position.lock() = Position {
        axis_deg: [10.0, 0.0, 20.0],
    };

    // A 记家位，B 回家（默认表）
    link.on_event(&pressed(Control::ButtonA));
    link.on_event(&pressed(Control::ButtonB));

    let calls = gimbal.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        GimbalCall::PositionSet(p, 0, 0) if p.axis_deg == [10.0, 0.0, 20.0]
    )));
}

#[test]
fn test_focus_trigger_mapping() {
    let (link, gimbal) = bound_link("");

    // 默认表：右扳机 FOCUS ×2，左扳机 FOCUS ×-2
    link.on_event(&changed(Control::TriggerRight, 40.0));
    link.on_event(&changed(Control::TriggerLeft, 40.0));

    let calls = gimbal.calls();
    assert!(calls.contains(&GimbalCall::FocusSpeed(80.0)));
    assert!(calls.contains(&GimbalCall::FocusSpeed(-80.0)));
}

#[test]
fn test_calibration_sequence() {
    let (link, gimbal) = bound_link("");

    link.on_event(&pressed(Control::ButtonStart));

    let calls = gimbal.calls();
    let enable = calls
        .iter()
        .position(|c| *c == GimbalCall::FocusCal(CalOperation::AutoEnable));
    let stop = calls
        .iter()
        .position(|c| *c == GimbalCall::FocusCal(CalOperation::Stop));
    assert!(enable.unwrap() < stop.unwrap());
}

#[test]
fn test_track_switch_button() {
    let (link, gimbal) = bound_link("");

    link.on_event(&pressed(Control::ButtonLeft));
    assert!(gimbal.calls().contains(&GimbalCall::TrackSwitch));
}

#[test]
fn test_forward_and_unknown_events() {
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(u32, GamepadEvent)>>,
    }

    impl MessageReceiver for Recorder {
        fn process_event(&self, code: u32, event: &GamepadEvent) -> bool {
            self.events.lock().push((code, *event));
            true
        }
    }

    let (link, _gimbal) = bound_link("");
    let recorder = Arc::new(Recorder::default());
    link.receiver_set(Some(recorder.clone()), 7, 9).unwrap();

    // BACK 在默认表里映射为 FORWARD
    link.on_event(&pressed(Control::ButtonBack));
    // RELEASED 没有任何表项 → unknown 转发
    link.on_event(&GamepadEvent::new(Action::Released, Control::ButtonA, 0.0));

    let events = recorder.events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, 7);
    assert_eq!(events[0].1.control, Control::ButtonBack);
    assert_eq!(events[1].0, 9);
    assert_eq!(events[1].1.action, Action::Released);
}

#[test]
fn test_gimbal_switch_resets_boost_memory() {
    let (link, gimbal) = bound_link(
        "CLEAR\nCHANGED ANALOG_0_X YAW 1.0\nCHANGED TRIGGER_RIGHT SPEED_BOOST 1.0\nPRESSED PAD_BOTTOM GIMBAL_FIRST\n",
    );

    link.on_event(&changed(Control::Analog0X, 50.0));
    link.on_event(&pressed(Control::PadBottom)); // 清空速度命令记忆

    // 加速档变化不再追加到 yaw 上（记忆已清零）
    link.on_event(&changed(Control::TriggerRight, 100.0));

    let (speed, _) = gimbal.last_speed_set().unwrap();
    assert_eq!(speed.get(Axis::Yaw), 50.0, "cleared memory must not be boosted");
}

#[test]
fn test_atem_routing_uses_binding_port_and_type() {
    #[derive(Default)]
    struct RecordingAtem {
        calls: Mutex<Vec<(String, u32, f64)>>,
    }

    impl CameraActuator for RecordingAtem {
        fn aperture_absolute(&self, port: u32, value_pc: f64) -> Result<(), GimbalError> {
            self.calls.lock().push(("aperture".into(), port, value_pc));
            Ok(())
        }
        fn focus_absolute(
            &self,
            port: u32,
            value_pc: f64,
            camera_type: CameraType,
        ) -> Result<(), GimbalError> {
            assert_eq!(camera_type, CameraType::Ef);
            self.calls.lock().push(("focus".into(), port, value_pc));
            Ok(())
        }
        fn gain_absolute(&self, port: u32, value_pc: f64) -> Result<(), GimbalError> {
            self.calls.lock().push(("gain".into(), port, value_pc));
            Ok(())
        }
        fn zoom(&self, port: u32, value_pc: f64) -> Result<(), GimbalError> {
            self.calls.lock().push(("zoom".into(), port, value_pc));
            Ok(())
        }
        fn zoom_absolute(&self, port: u32, value_pc: f64) -> Result<(), GimbalError> {
            self.calls.lock().push(("zoom_abs".into(), port, value_pc));
            Ok(())
        }
        fn aperture_auto(&self, port: u32) -> Result<(), GimbalError> {
            self.calls.lock().push(("aperture_auto".into(), port, 0.0));
            Ok(())
        }
        fn focus_auto(&self, port: u32) -> Result<(), GimbalError> {
            self.calls.lock().push(("focus_auto".into(), port, 0.0));
            Ok(())
        }
    }

    let atem = Arc::new(RecordingAtem::default());
    let atem_for_factory = atem.clone();

    let gimbal = Arc::new(MockGimbal::default());
    let link = ControlLink::with_atem_factory(Box::new(move |_| {
        let actuator: Arc<dyn CameraActuator> = atem_for_factory.clone();
        Ok(actuator)
    }));

    // 端口 13 → EF 相机、端口 3
    link.read_config_str(
        "ATEM IPv4 = 192.168.1.240\nGIMBAL ATEM = 13\nCLEAR\nCHANGED ANALOG_1_X ATEM_ZOOM 1.0\nCHANGED ANALOG_1_Y ATEM_FOCUS_ABSOLUTE 1.0\n",
    )
    .unwrap();
    link.bind_gimbals(&SingleGimbal(gimbal)).unwrap();

    link.on_event(&changed(Control::Analog1X, 50.0));
    link.on_event(&changed(Control::Analog1Y, 50.0));

    let calls = atem.calls.lock();
    assert!(calls.contains(&("zoom".into(), 3, 50.0)));
    assert!(calls.contains(&("focus".into(), 3, 50.0)));
}

#[test]
fn test_binding_without_gimbal_is_inert() {
    // NONE 绑定只占切换台端口；云台功能静默跳过
    let link = ControlLink::new();
    link.read_config_str("GIMBAL NONE ATEM = 2\n").unwrap();

    struct EmptyCatalog;
    impl GimbalProvider for EmptyCatalog {
        fn gimbal_at(&self, _: usize) -> Option<Arc<dyn GimbalControl>> {
            None
        }
        fn gimbal_by_ipv4(&self, _: std::net::Ipv4Addr) -> Option<Arc<dyn GimbalControl>> {
            None
        }
    }

    link.bind_gimbals(&EmptyCatalog).unwrap();

    // 不该 panic，也没有云台可调用
    link.on_event(&changed(Control::Analog0X, 50.0));
}

#[test]
fn test_missing_gimbal_fails_binding() {
    let link = ControlLink::new();
    link.read_config_str("GIMBAL INDEX = 4\n").unwrap();

    struct EmptyCatalog;
    impl GimbalProvider for EmptyCatalog {
        fn gimbal_at(&self, _: usize) -> Option<Arc<dyn GimbalControl>> {
            None
        }
        fn gimbal_by_ipv4(&self, _: std::net::Ipv4Addr) -> Option<Arc<dyn GimbalControl>> {
            None
        }
    }

    assert_eq!(link.bind_gimbals(&EmptyCatalog), Err(GimbalError::GimbalOff));
}

#[test]
fn test_start_activates_bound_gimbals() {
    use crossbeam_channel::Sender;
    use gimbal_bridge::EventSource;

    struct ScriptedPad {
        events: Vec<GamepadEvent>,
        handle: Option<std::thread::JoinHandle<()>>,
    }

    impl EventSource for ScriptedPad {
        fn receiver_start(&mut self, tx: Sender<GamepadEvent>) -> Result<(), GimbalError> {
            let events = self.events.clone();
            self.handle = Some(std::thread::spawn(move || {
                for event in events {
                    let _ = tx.send(event);
                }
                // 契约：静默前发一次 DISCONNECTED
                let _ = tx.send(GamepadEvent::new(Action::Disconnected, Control::None, 0.0));
            }));
            Ok(())
        }

        fn receiver_stop(&mut self) -> Result<(), GimbalError> {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
            Ok(())
        }
    }

    let (link, gimbal) = bound_link("CLEAR\nCHANGED ANALOG_0_X YAW 2.0\n");
    link.gamepad_set(Box::new(ScriptedPad {
        events: vec![changed(Control::Analog0X, 25.0)],
        handle: None,
    }));

    link.start().unwrap();

    // 事件经派发线程落地
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
    while gimbal.last_speed_set().is_none() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    assert!(gimbal.calls().contains(&GimbalCall::Activate));
    let (speed, _) = gimbal.last_speed_set().expect("event not dispatched");
    assert_eq!(speed.get(Axis::Yaw), 50.0);

    link.stop().unwrap();
    assert_eq!(link.stop(), Err(GimbalError::AlreadyStopping));
}
