//! 集成测试基础设施
//!
//! `MockLink` 顶替 TCP 桥接器：引擎发出的 CAN 载荷进一条通道，
//! 测试注入的载荷从另一条通道被 `recv` 取走。`Responder` 在后台
//! 把载荷拼回完整帧、记录在案，并对要求应答的命令按脚本回帧
//! （CRC 正确、序列号回显、设备侧切片）。

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use gimbal_bridge::can::{CanError, CanFrame, CanLink, LinkInfo};
use gimbal_bridge::protocol::constants::*;
use gimbal_bridge::protocol::crc::{crc16, crc32};

/// 测试侧的链路把手
pub struct MockHandles {
    /// 引擎发出的 CAN 帧
    pub sent: Receiver<CanFrame>,
    /// 注入给引擎的 CAN 帧
    pub inbound: Sender<CanFrame>,
}

/// 内存链路
pub struct MockLink {
    sent_tx: Sender<CanFrame>,
    inbound_rx: Receiver<CanFrame>,
    pub bus_resets: AtomicU32,
    pub link_resets: AtomicU32,
    /// 剩余多少次 send 直接失败
    pub fail_sends: AtomicU32,
}

impl MockLink {
    pub fn new() -> (Arc<MockLink>, MockHandles) {
        let (sent_tx, sent_rx) = unbounded();
        let (inbound_tx, inbound_rx) = unbounded();

        let link = Arc::new(MockLink {
            sent_tx,
            inbound_rx,
            bus_resets: AtomicU32::new(0),
            link_resets: AtomicU32::new(0),
            fail_sends: AtomicU32::new(0),
        });

        let handles = MockHandles {
            sent: sent_rx,
            inbound: inbound_tx,
        };

        (link, handles)
    }
}

impl CanLink for MockLink {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        if self
            .fail_sends
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CanError::Disconnected);
        }

        let _ = self.sent_tx.send(*frame);
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<CanFrame, CanError> {
        self.inbound_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => CanError::Timeout,
            RecvTimeoutError::Disconnected => CanError::Disconnected,
        })
    }

    fn bus_reset(&self) -> Result<(), CanError> {
        self.bus_resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn reset(&self) -> Result<(), CanError> {
        self.link_resets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn info(&self) -> Result<LinkInfo, CanError> {
        Ok(LinkInfo {
            name: "mock-bridge".into(),
            ipv4_address: Some(Ipv4Addr::new(192, 168, 1, 50)),
            ipv4_gateway: Some(Ipv4Addr::new(192, 168, 1, 1)),
            ipv4_netmask: Some(Ipv4Addr::new(255, 255, 255, 0)),
        })
    }
}

/// 应答脚本
pub struct ResponderState {
    /// 不再回任何应答（活性测试用）
    pub silent: bool,
    /// 位置应答的三轴角度（pitch/roll/yaw，度）
    pub position: [f64; 3],
    /// 位置应答的有效标志
    pub position_valid: bool,
    /// 拼装完成的出站帧，按到达顺序
    pub frames: Vec<Vec<u8>>,
}

impl Default for ResponderState {
    fn default() -> Self {
        Self {
            silent: false,
            position: [0.0; 3],
            position_valid: true,
            frames: Vec::new(),
        }
    }
}

/// 后台设备模拟
pub struct Responder {
    pub state: Arc<Mutex<ResponderState>>,
}

impl Responder {
    /// 在后台线程上消费 `handles`
    pub fn spawn(handles: MockHandles) -> Responder {
        let state = Arc::new(Mutex::new(ResponderState::default()));
        let thread_state = state.clone();

        std::thread::spawn(move || {
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let frame = match handles.sent.recv_timeout(Duration::from_millis(200)) {
                    Ok(frame) => frame,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                buffer.extend_from_slice(frame.data_slice());

                // 凑满声明总长即一帧
                if buffer.len() < 2 || buffer.len() < buffer[1] as usize {
                    continue;
                }

                let frame_bytes = buffer.clone();
                buffer.clear();

                let mut state = thread_state.lock();
                state.frames.push(frame_bytes.clone());

                if state.silent || frame_bytes[3] != CMD_TYPE_DO_REPLY {
                    continue;
                }

                let serial = u16::from_le_bytes([frame_bytes[8], frame_bytes[9]]);
                let cmd_id = frame_bytes[HEADER_SIZE + DATA_CMD_ID];

                if let Some(reply) = build_scripted_reply(cmd_id, serial, &state) {
                    drop(state);
                    for chunk in reply.chunks(8) {
                        let _ = handles.inbound.send(CanFrame::new(CAN_ID_RX, chunk));
                    }
                }
            }
        });

        Responder { state }
    }

    /// 当前记录的出站帧快照
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state.lock().frames.clone()
    }

    /// 记录里某命令的全部帧
    pub fn frames_with_cmd(&self, cmd_id: u8) -> Vec<Vec<u8>> {
        self.frames()
            .into_iter()
            .filter(|f| f[HEADER_SIZE + DATA_CMD_ID] == cmd_id)
            .collect()
    }
}

fn build_scripted_reply(cmd_id: u8, serial: u16, state: &ResponderState) -> Option<Vec<u8>> {
    match cmd_id {
        CMD_VERSION => {
            let mut data = vec![0u8; 11];
            // data[2] 同时是结果字节，版本只能用高三字节
            data[3] = 3;
            data[4] = 2;
            data[5] = 1;
            Some(build_reply(cmd_id, serial, &data))
        },

        CMD_ANGLE_LIMIT_GET => {
            let mut data = vec![0u8; 9];
            // max/min 成对：pitch {3,4}，yaw {5,6}，roll {7,8}
            for offset in [3usize, 5, 7] {
                data[offset] = 120;
                data[offset + 1] = 120;
            }
            Some(build_reply(cmd_id, serial, &data))
        },

        CMD_MOTOR_STIFFNESS_GET => {
            let mut data = vec![0u8; 6];
            for offset in [3usize, 4, 5] {
                data[offset] = 50;
            }
            Some(build_reply(cmd_id, serial, &data))
        },

        CMD_ANGLE_GET => {
            let mut data = vec![0u8; 10];
            data[3] = u8::from(state.position_valid);
            for (axis, offset) in [(0usize, 8usize), (1, 6), (2, 4)] {
                let raw = (state.position[axis] * 10.0) as i16;
                data[offset..offset + 2].copy_from_slice(&raw.to_le_bytes());
            }
            Some(build_reply(cmd_id, serial, &data))
        },

        // 写入类命令的简单确认
        CMD_ANGLE_LIMIT_SET | CMD_MOTOR_STIFFNESS_SET | CMD_TLV_SET => {
            Some(build_reply(cmd_id, serial, &vec![0u8; 3]))
        },

        _ => None,
    }
}

/// 组一个字段合法的应答帧（结果字节 = OK）
pub fn build_reply(cmd_id: u8, serial: u16, data: &[u8]) -> Vec<u8> {
    assert!(data.len() >= 3);

    let total = frame_total_size(data.len());
    let mut bytes = vec![0u8; total];

    bytes[0] = SOF;
    bytes[1] = total as u8;
    bytes[3] = CMD_TYPE_REPLY;
    bytes[8..10].copy_from_slice(&serial.to_le_bytes());
    let header_crc = crc16(&bytes[..10]);
    bytes[10..12].copy_from_slice(&header_crc.to_le_bytes());

    bytes[HEADER_SIZE..HEADER_SIZE + data.len()].copy_from_slice(data);
    bytes[HEADER_SIZE + DATA_CMD_SET] = CMD_SET_DEFAULT;
    bytes[HEADER_SIZE + DATA_CMD_ID] = cmd_id;
    bytes[HEADER_SIZE + REPLY_RESULT] = DEVICE_OK;

    let body = total - FOOTER_SIZE;
    let footer = crc32(&bytes[..body]);
    bytes[body..].copy_from_slice(&footer.to_le_bytes());

    bytes
}

/// 读出帧数据段的一个 i16 小端字段
pub fn data_i16(frame: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([
        frame[HEADER_SIZE + offset],
        frame[HEADER_SIZE + offset + 1],
    ])
}

/// 数据段单字节
pub fn data_u8(frame: &[u8], offset: usize) -> u8 {
    frame[HEADER_SIZE + offset]
}
