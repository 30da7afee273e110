//! 云台操作小工具
//!
//! 连接一台 TCP CAN 桥接器后面的云台，激活后执行一个操作并退出。
//! 交互式的控制链路（手柄 + 配置文件）在库内，这个二进制只做
//! 现场排障：转个角度、给个速度、停住、切跟踪目标、倒诊断。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gimbal_bridge::{
    Axis, AxisFlags, GimbalControl, GimbalEngine, Position, Speed, TcpCanLink,
};

#[derive(Parser)]
#[command(name = "gimbal_ctl", about = "Gimbal bridge field tool", version)]
struct Cli {
    /// 桥接器地址，例如 192.168.1.50:8881
    #[arg(long)]
    addr: SocketAddr,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 移动到绝对位置（度）
    Position {
        #[arg(long, default_value_t = 0.0)]
        pitch: f64,
        #[arg(long, default_value_t = 0.0)]
        roll: f64,
        #[arg(long, default_value_t = 0.0)]
        yaw: f64,
        /// 移动时长（毫秒，0 = 按限速推算）
        #[arg(long, default_value_t = 0)]
        duration_ms: u32,
    },

    /// 按速度转动（度/秒），跑几秒后自动停
    Speed {
        #[arg(long, default_value_t = 0.0)]
        pitch: f64,
        #[arg(long, default_value_t = 0.0)]
        roll: f64,
        #[arg(long, default_value_t = 0.0)]
        yaw: f64,
        #[arg(long, default_value_t = 2)]
        seconds: u64,
    },

    /// 停止一切运动
    Stop,

    /// 读当前位置
    Where,

    /// 切换画面跟踪目标
    TrackSwitch,

    /// 倒出引擎诊断信息
    Debug,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let link = TcpCanLink::connect(cli.addr)
        .with_context(|| format!("connecting CAN bridge at {}", cli.addr))?;
    let engine = GimbalEngine::connect(Arc::new(link))
        .map_err(|e| anyhow::anyhow!("gimbal setup failed: {e}"))?;

    engine
        .activate()
        .map_err(|e| anyhow::anyhow!("activation failed: {e}"))?;

    let run = || -> std::result::Result<(), gimbal_bridge::GimbalError> {
        match cli.command {
            Command::Position {
                pitch,
                roll,
                yaw,
                duration_ms,
            } => {
                let mut position = Position::default();
                position.set(Axis::Pitch, pitch);
                position.set(Axis::Roll, roll);
                position.set(Axis::Yaw, yaw);
                engine.position_set(&position, AxisFlags::NONE, duration_ms)
            },

            Command::Speed {
                pitch,
                roll,
                yaw,
                seconds,
            } => {
                let mut speed = Speed::default();
                speed.set(Axis::Pitch, pitch);
                speed.set(Axis::Roll, roll);
                speed.set(Axis::Yaw, yaw);
                engine.speed_set(&speed, AxisFlags::NONE)?;
                std::thread::sleep(std::time::Duration::from_secs(seconds));
                engine.speed_stop()
            },

            Command::Stop => engine.speed_stop(),

            Command::Where => {
                let position = engine.position_get()?;
                println!(
                    "pitch {:7.1} deg  roll {:7.1} deg  yaw {:7.1} deg",
                    position.get(Axis::Pitch),
                    position.get(Axis::Roll),
                    position.get(Axis::Yaw),
                );
                Ok(())
            },

            Command::TrackSwitch => engine.track_switch(),

            Command::Debug => engine.debug_dump(&mut std::io::stdout()),
        }
    };

    let result = run();

    if let Err(e) = engine.release() {
        eprintln!("release failed: {e}");
    }

    result.map_err(|e| anyhow::anyhow!("operation failed: {e}"))
}
