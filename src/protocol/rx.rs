//! 入站帧重组与校验
//!
//! 应答帧被桥接器按 CAN 载荷切片送达：若干满 8 字节的载荷加一个
//! 短尾块。重组缓冲区把载荷拼回完整帧：满载荷按顺序接在流式
//! 写入点之后并推进写入点；更短的载荷（尾块）插在写入点上，把
//! 先收到的尾部字节向后挪。这样即使尾块先于中间载荷到达也能按
//! 原序复原。
//!
//! 校验随缓冲区增长逐字节推进，每个字节的到达恰好激活一项检查。
//! 校验水位只覆盖已处于最终位置的字节：写入点之前的字节，或者
//! 在凑满声明总长后的整帧。任何失败都清空缓冲区，调用方以该
//! 错误完成当前事务。

use super::constants::*;
use super::crc::crc16;
use super::raw_to_angle;
use crate::error::GimbalError;

/// 接收重组缓冲区
pub struct RxBuffer {
    buf: [u8; RX_BUFFER_SIZE],
    /// 流式写入点（只被满载荷推进）
    offset: usize,
    /// 已持有的字节总数
    total: usize,
    /// 已通过校验的字节数
    validated: usize,
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RxBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0u8; RX_BUFFER_SIZE],
            offset: 0,
            total: 0,
            validated: 0,
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.total = 0;
        self.validated = 0;
    }

    /// 已通过校验的字节数
    pub fn validated(&self) -> usize {
        self.validated
    }

    /// 已持有的字节总数（诊断用）
    pub fn total(&self) -> usize {
        self.total
    }

    /// 流式写入点（诊断用）
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 已持有的字节
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.total]
    }

    /// 插入一个 CAN 载荷
    ///
    /// 溢出缓冲区时返回 `false`，调用方应当清空重来。
    pub fn insert(&mut self, payload: &[u8]) -> bool {
        debug_assert!(self.offset <= self.total);

        if self.total + payload.len() > RX_BUFFER_SIZE {
            return false;
        }

        // 把写入点之后的尾部字节向后挪，为新载荷腾位
        let tail = self.total - self.offset;
        if tail > 0 {
            self.buf
                .copy_within(self.offset..self.total, self.offset + payload.len());
        }

        self.buf[self.offset..self.offset + payload.len()].copy_from_slice(payload);
        self.total += payload.len();

        if payload.len() >= 8 {
            self.offset += payload.len();
        }

        true
    }

    /// 当前可以安全校验到的水位
    ///
    /// 写入点之前的字节不会再移动；尾块字节要等凑满声明的帧总长
    /// 才处于最终位置。
    fn checkable(&self) -> usize {
        if self.total >= 2 && self.total == self.buf[1] as usize {
            self.total
        } else {
            self.offset
        }
    }

    /// 按应答帧布局读取缓冲区
    pub fn view(&self) -> ReplyView<'_> {
        ReplyView { buf: &self.buf }
    }
}

/// 应答帧的只读视图
///
/// 访问器不检查字节是否已经到达；校验的阶段顺序保证了引擎只会
/// 读取已经收到的字段。
#[derive(Clone, Copy)]
pub struct ReplyView<'a> {
    buf: &'a [u8],
}

impl ReplyView<'_> {
    pub fn sof(&self) -> u8 {
        self.buf[0]
    }

    pub fn total_len(&self) -> usize {
        self.buf[1] as usize
    }

    pub fn version(&self) -> u8 {
        self.buf[2]
    }

    pub fn cmd_type(&self) -> u8 {
        self.buf[3]
    }

    pub fn encoded(&self) -> u8 {
        self.buf[4]
    }

    pub fn serial(&self) -> u16 {
        u16::from_le_bytes([self.buf[8], self.buf[9]])
    }

    pub fn header_crc(&self) -> u16 {
        u16::from_le_bytes([self.buf[10], self.buf[11]])
    }

    /// 数据段单字节
    pub fn data(&self, offset: usize) -> u8 {
        self.buf[HEADER_SIZE + offset]
    }

    /// 数据偏移处的角度（i16 小端，0.1 度）
    pub fn angle(&self, offset: usize) -> f64 {
        let raw = i16::from_le_bytes([self.data(offset), self.data(offset + 1)]);
        raw_to_angle(raw)
    }
}

/// `threshold` 是否在本次增长区间内被跨越
fn crossing(from: usize, to: usize, threshold: usize) -> bool {
    from < threshold && to >= threshold
}

/// 把校验水位推进到当前可校验的位置
///
/// 返回新的已校验字节数。序列号与帧头 CRC-16 的校验按协议要求
/// 强制执行，失败记为 [`GimbalError::Protocol`]。任何失败都会
/// 清空缓冲区。
pub fn validate_progress(
    rx: &mut RxBuffer,
    expected_cmd_id: u8,
    expected_serial: u16,
) -> Result<usize, GimbalError> {
    let from = rx.validated;
    let to = rx.checkable();

    if to <= from {
        return Ok(from);
    }

    let view = ReplyView { buf: &rx.buf };
    match validate_stages(&view, from, to, expected_cmd_id, expected_serial) {
        Ok(()) => {
            rx.validated = to;
            Ok(to)
        },
        Err(e) => {
            rx.reset();
            Err(e)
        },
    }
}

fn validate_stages(
    view: &ReplyView<'_>,
    from: usize,
    to: usize,
    expected_cmd_id: u8,
    expected_serial: u16,
) -> Result<(), GimbalError> {
    if crossing(from, to, 1) && view.sof() != SOF {
        return Err(GimbalError::Protocol);
    }

    if crossing(from, to, 2) {
        if view.total_len() > RX_BUFFER_SIZE {
            return Err(GimbalError::FrameTooLong);
        }
        if view.total_len() < FRAME_SIZE_MIN {
            return Err(GimbalError::FrameTooShort);
        }
    }

    if crossing(from, to, 3) && view.version() & 0xFC != 0 {
        return Err(GimbalError::GimbalVersion);
    }

    if crossing(from, to, 4) && view.cmd_type() != CMD_TYPE_REPLY {
        return Err(GimbalError::CmdType);
    }

    if crossing(from, to, 5) && view.encoded() != 0 {
        return Err(GimbalError::Encoded);
    }

    if crossing(from, to, 10) && view.serial() != expected_serial {
        return Err(GimbalError::Protocol);
    }

    if crossing(from, to, 12) && view.header_crc() != crc16(&view.buf[..10]) {
        return Err(GimbalError::Protocol);
    }

    if crossing(from, to, 13) && view.data(DATA_CMD_SET) != CMD_SET_DEFAULT {
        return Err(GimbalError::CmdSet);
    }

    if crossing(from, to, 14) && view.data(DATA_CMD_ID) != expected_cmd_id {
        return Err(GimbalError::CmdId);
    }

    if crossing(from, to, 15) && view.data(REPLY_RESULT) != DEVICE_OK {
        return Err(GimbalError::Gimbal);
    }

    Ok(())
}
