//! CAN 链路抽象
//!
//! 云台挂在一个 CAN/TCP 桥接设备后面：本机通过 TCP 连接桥接器，
//! 桥接器把报文转发到 1 Mb/s 的 CAN 总线上。本模块定义统一的
//! 帧值类型和链路 trait，具体后端见 [`tcp`]。

use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;

pub mod tcp;

pub use tcp::TcpCanLink;

/// 单个 CAN 2.0 数据帧
///
/// 设计要点（与高频收发场景匹配）：
/// - Copy：零成本复制
/// - 固定 8 字节数据：避免堆分配
/// - 无生命周期：简化 API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    /// CAN ID（标准帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,
}

impl CanFrame {
    /// 从数据切片构造，超过 8 字节的部分截断
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed,
            len: len as u8,
        }
    }

    /// 只含有效数据的切片
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// 链路层错误
///
/// 引擎把 `send` 路径的失败映射为 [`GimbalError::Send`]、
/// `recv` 路径的失败映射为 [`GimbalError::Receive`]。
///
/// [`GimbalError::Send`]: crate::GimbalError::Send
/// [`GimbalError::Receive`]: crate::GimbalError::Receive
#[derive(Error, Debug)]
pub enum CanError {
    /// 底层 IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 接收超时（非致命，可以重试）
    #[error("Read timeout")]
    Timeout,

    /// 桥接器返回了无法解析的消息
    #[error("Invalid bridge message: {0}")]
    InvalidMessage(&'static str),

    /// 桥接器拒绝了请求
    #[error("Bridge rejected the request")]
    Rejected,

    /// 链路已断开
    #[error("Link disconnected")]
    Disconnected,
}

/// 桥接设备信息
///
/// 连接建立后从桥接器读出，用于填充云台 Info 块。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkInfo {
    /// 设备名（最长 16 字节，UTF-8）
    pub name: String,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub ipv4_netmask: Option<Ipv4Addr>,
}

/// CAN 链路 trait
///
/// 所有方法取 `&self`：同一条链路会被接收线程（`recv`）、工作线程和
/// 用户线程（`send`/`bus_reset`）并发使用，内部同步由实现负责。
///
/// # 语义
/// - `send`：写入即返回，不等待总线确认
/// - `recv`：阻塞直到收到一帧或超时（`CanError::Timeout`）
/// - `bus_reset`：要求桥接器复位 CAN 控制器（ERROR_CAN 恢复路径）
/// - `reset`：重建到桥接器的传输连接（ERROR_ETH 恢复路径）
pub trait CanLink: Send + Sync {
    /// 发送一帧
    fn send(&self, frame: &CanFrame) -> Result<(), CanError>;

    /// 接收一帧，最多等待 `timeout`
    fn recv(&self, timeout: Duration) -> Result<CanFrame, CanError>;

    /// 复位桥接器的 CAN 控制器
    fn bus_reset(&self) -> Result<(), CanError>;

    /// 重建传输层连接
    fn reset(&self) -> Result<(), CanError>;

    /// 读取桥接设备信息
    fn info(&self) -> Result<LinkInfo, CanError>;
}
