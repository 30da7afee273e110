//! TCP CAN 桥接器后端
//!
//! 桥接器侧协议是一个很小的类型化消息流：每条消息由 2 字节头
//! `[type, len]` 和 `len` 字节载荷组成。建连时主机下发 CAN 过滤/
//! 波特率配置并读取设备信息；此后套接字上只有数据帧消息往返。
//!
//! 复位语义：
//! - [`reset`](TcpCanLink::reset) 重建 TCP 连接（对应引擎的 ERROR_ETH 恢复）
//! - [`bus_reset`](TcpCanLink::bus_reset) 让桥接器复位 CAN 控制器
//!   （对应 ERROR_CAN 恢复），不等待确认

use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{CanError, CanFrame, CanLink, LinkInfo};
use crate::protocol::constants::{CAN_BITRATE, CAN_ID_RX, CAN_MASK};

/// 消息类型
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    // 主机 → 桥接器
    DataFrame = 0x00,
    BusReset = 0x01,
    ConfigSet = 0x02,
    InfoGet = 0x03,

    // 桥接器 → 主机
    Ack = 0x80,
    InfoResponse = 0x81,
    Error = 0xFF,
}

impl MessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(MessageType::DataFrame),
            0x01 => Some(MessageType::BusReset),
            0x02 => Some(MessageType::ConfigSet),
            0x03 => Some(MessageType::InfoGet),
            0x80 => Some(MessageType::Ack),
            0x81 => Some(MessageType::InfoResponse),
            0xFF => Some(MessageType::Error),
            _ => None,
        }
    }
}

/// 连接建立时的控制消息超时
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP CAN 桥接链路
///
/// 写端和读端各持有同一条 TCP 连接的一个克隆，分别由各自的互斥锁
/// 保护：`recv` 只会被引擎的接收线程调用，`send` 会被工作线程和
/// 用户线程调用。`reset` 重建连接后同时换掉两端。
pub struct TcpCanLink {
    addr: SocketAddr,
    tx: Mutex<TcpStream>,
    rx: Mutex<TcpStream>,
    info: LinkInfo,
}

impl TcpCanLink {
    /// 连接桥接器并完成配置握手
    ///
    /// 按协议要求把桥接器配成 RX 过滤 `0x222`、掩码 `0x7FF`、
    /// 1 Mb/s，然后读取设备信息块。配置被拒绝返回
    /// [`CanError::Rejected`]。
    pub fn connect(addr: SocketAddr) -> Result<Self, CanError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        write_config(&mut stream)?;
        match read_message(&mut stream)? {
            (MessageType::Ack, _) => {},
            (MessageType::Error, _) => return Err(CanError::Rejected),
            _ => return Err(CanError::InvalidMessage("expected config ack")),
        }

        write_message(&mut stream, MessageType::InfoGet, &[])?;
        let info = match read_message(&mut stream)? {
            (MessageType::InfoResponse, payload) => parse_info(&payload)?,
            (MessageType::Error, _) => return Err(CanError::Rejected),
            _ => return Err(CanError::InvalidMessage("expected info response")),
        };

        debug!(name = %info.name, %addr, "CAN bridge connected");

        let rx = stream.try_clone()?;

        Ok(Self {
            addr,
            tx: Mutex::new(stream),
            rx: Mutex::new(rx),
            info,
        })
    }
}

impl CanLink for TcpCanLink {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        let mut payload = BytesMut::with_capacity(5 + frame.len as usize);
        payload.put_u32_le(frame.id);
        payload.put_u8(frame.len);
        payload.put_slice(frame.data_slice());

        let mut stream = self.tx.lock();
        write_message(&mut stream, MessageType::DataFrame, &payload)
    }

    fn recv(&self, timeout: Duration) -> Result<CanFrame, CanError> {
        let mut stream = self.rx.lock();
        stream.set_read_timeout(Some(timeout))?;

        loop {
            match read_message(&mut stream)? {
                (MessageType::DataFrame, payload) => return parse_data_frame(&payload),
                (MessageType::Error, _) => return Err(CanError::Rejected),
                (other, _) => {
                    // 传输复位前后可能残留控制消息，跳过
                    warn!(?other, "skipping non-data bridge message");
                },
            }
        }
    }

    fn bus_reset(&self) -> Result<(), CanError> {
        let mut stream = self.tx.lock();
        write_message(&mut stream, MessageType::BusReset, &[])
    }

    fn reset(&self) -> Result<(), CanError> {
        let mut new_stream = TcpStream::connect(self.addr)?;
        new_stream.set_nodelay(true)?;

        write_config(&mut new_stream)?;

        let new_rx = new_stream.try_clone()?;

        // 先换读端再换写端；接收线程最多再读到一次旧连接的超时
        *self.rx.lock() = new_rx;
        *self.tx.lock() = new_stream;

        debug!(addr = %self.addr, "CAN bridge transport reset");
        Ok(())
    }

    fn info(&self) -> Result<LinkInfo, CanError> {
        Ok(self.info.clone())
    }
}

fn write_config(stream: &mut TcpStream) -> Result<(), CanError> {
    let mut payload = BytesMut::with_capacity(12);
    payload.put_u32_le(CAN_ID_RX);
    payload.put_u32_le(CAN_MASK);
    payload.put_u32_le(CAN_BITRATE);

    write_message(stream, MessageType::ConfigSet, &payload)
}

fn write_message(
    stream: &mut TcpStream,
    msg_type: MessageType,
    payload: &[u8],
) -> Result<(), CanError> {
    debug_assert!(payload.len() <= u8::MAX as usize);

    let mut message = BytesMut::with_capacity(2 + payload.len());
    message.put_u8(msg_type as u8);
    message.put_u8(payload.len() as u8);
    message.put_slice(payload);

    stream.write_all(&message)?;
    Ok(())
}

fn read_message(stream: &mut TcpStream) -> Result<(MessageType, Vec<u8>), CanError> {
    let mut header = [0u8; 2];
    if let Err(e) = stream.read_exact(&mut header) {
        return Err(match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => CanError::Timeout,
            ErrorKind::UnexpectedEof => CanError::Disconnected,
            _ => CanError::Io(e),
        });
    }

    let msg_type =
        MessageType::from_u8(header[0]).ok_or(CanError::InvalidMessage("unknown type"))?;

    let mut payload = vec![0u8; header[1] as usize];
    stream.read_exact(&mut payload)?;

    Ok((msg_type, payload))
}

fn parse_data_frame(payload: &[u8]) -> Result<CanFrame, CanError> {
    if payload.len() < 5 {
        return Err(CanError::InvalidMessage("data frame too short"));
    }

    let id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let dlc = payload[4] as usize;

    if dlc > 8 || payload.len() < 5 + dlc {
        return Err(CanError::InvalidMessage("bad dlc"));
    }

    Ok(CanFrame::new(id, &payload[5..5 + dlc]))
}

fn parse_info(payload: &[u8]) -> Result<LinkInfo, CanError> {
    if payload.len() < 28 {
        return Err(CanError::InvalidMessage("info block too short"));
    }

    let name_end = payload[..16].iter().position(|&b| b == 0).unwrap_or(16);
    let name = String::from_utf8_lossy(&payload[..name_end]).into_owned();

    let ipv4_at = |offset: usize| {
        let octets: [u8; 4] = payload[offset..offset + 4].try_into().unwrap();
        let addr = Ipv4Addr::from(octets);
        (!addr.is_unspecified()).then_some(addr)
    };

    Ok(LinkInfo {
        name,
        ipv4_address: ipv4_at(16),
        ipv4_gateway: ipv4_at(20),
        ipv4_netmask: ipv4_at(24),
    })
}
