//! 辅助相机通道（广播切换台）
//!
//! 切换台 SDK 本身是外部协作方，这里只定义动词集和一个进程级
//! 注册表。注册表按标识串共享实例：同一台切换台被多个云台绑定
//! 引用时只连一次，最后一个句柄释放后条目自然消失（弱引用）。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::GimbalError;

/// 切换台端口数
pub const PORT_COUNT: u32 = 8;

/// 相机类型，决定对焦命令的语义
///
/// EF 镜头只接受相对对焦（实现方需要累计偏移），MFT 接受绝对值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    Ef,
    Mft,
}

/// 辅助相机执行器的动词集
///
/// 端口编号 1..=8。所有百分比参数已被映射层限幅到合法范围。
pub trait CameraActuator: Send + Sync {
    fn aperture_absolute(&self, port: u32, value_pc: f64) -> Result<(), GimbalError>;

    /// EF 为相对（实现方累计偏移），MFT 为绝对（0..1 标度）
    fn focus_absolute(
        &self,
        port: u32,
        value_pc: f64,
        camera_type: CameraType,
    ) -> Result<(), GimbalError>;

    fn gain_absolute(&self, port: u32, value_pc: f64) -> Result<(), GimbalError>;

    /// 变焦速度（±100%）
    fn zoom(&self, port: u32, value_pc: f64) -> Result<(), GimbalError>;

    fn zoom_absolute(&self, port: u32, value_pc: f64) -> Result<(), GimbalError>;

    fn aperture_auto(&self, port: u32) -> Result<(), GimbalError>;

    fn focus_auto(&self, port: u32) -> Result<(), GimbalError>;
}

type Registry = Mutex<HashMap<String, Weak<dyn CameraActuator>>>;

/// 进程级注册表，首次使用时建立
fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// 按标识串取共享实例，没有时用 `create` 建一个
///
/// 标识串通常是配置文件里 `ATEM` 行的剩余部分（如
/// `IPv4 = 192.168.1.240`）。弱引用失效的条目顺手清掉。
pub fn find_or_create(
    id: &str,
    create: impl FnOnce(&str) -> Result<Arc<dyn CameraActuator>, GimbalError>,
) -> Result<Arc<dyn CameraActuator>, GimbalError> {
    let mut map = registry().lock();

    if let Some(existing) = map.get(id).and_then(Weak::upgrade) {
        return Ok(existing);
    }

    let actuator = create(id)?;
    debug!(id, "camera actuator connected");
    map.retain(|_, weak| weak.strong_count() > 0);
    map.insert(id.to_owned(), Arc::downgrade(&actuator));

    Ok(actuator)
}
