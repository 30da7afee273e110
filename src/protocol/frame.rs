//! 出站帧构建
//!
//! 帧结构：12 字节帧头 + 最多 16 字节数据 + 4 字节 CRC-32 帧尾。
//! 帧头字段依次为 SOF、总长、版本、命令类型、编码标志、3 字节
//! 保留、16 位序列号、前 10 字节的 CRC-16。数据段以命令集和
//! 命令 id 开头。
//!
//! 每个出站帧恰好 `seal` 一次（计算并追加 CRC-32），未封口的帧
//! 不得上总线。

use super::constants::*;
use super::crc::{crc16, crc32};
use super::{angle_to_raw, raw_to_angle, speed_to_raw};

/// 帧缓冲区容量（最大帧）
const TX_CAPACITY: usize = frame_total_size(DATA_SIZE_MAX);

/// 一个出站协议帧
///
/// 字段通过类型化访问器读写，偏移都相对数据段起点。
#[derive(Clone)]
pub struct TxFrame {
    buf: [u8; TX_CAPACITY],
    sealed: bool,
}

impl TxFrame {
    /// 构建帧头并写入命令集/命令 id
    ///
    /// `data_len` 是数据段长度（含命令集和命令 id 两字节）。
    pub fn init(data_len: usize, cmd_type: u8, cmd_set: u8, cmd_id: u8, serial: u16) -> Self {
        debug_assert!(data_len >= 2 && data_len <= DATA_SIZE_MAX);
        debug_assert!(cmd_set == CMD_SET_DEFAULT || cmd_set == CMD_SET_THIRD_PARTY);

        let mut buf = [0u8; TX_CAPACITY];

        buf[0] = SOF;
        buf[1] = frame_total_size(data_len) as u8;
        // buf[2] 版本、buf[3] 命令类型、buf[4] 编码标志
        buf[3] = cmd_type;
        buf[8..10].copy_from_slice(&serial.to_le_bytes());

        buf[HEADER_SIZE + DATA_CMD_SET] = cmd_set;
        buf[HEADER_SIZE + DATA_CMD_ID] = cmd_id;

        let header_crc = crc16(&buf[..10]);
        buf[10..12].copy_from_slice(&header_crc.to_le_bytes());

        Self { buf, sealed: false }
    }

    /// 帧总长（字节）
    pub fn total_len(&self) -> usize {
        self.buf[1] as usize
    }

    pub fn serial(&self) -> u16 {
        u16::from_le_bytes([self.buf[8], self.buf[9]])
    }

    pub fn cmd_id(&self) -> u8 {
        self.data_get(DATA_CMD_ID)
    }

    /// 读数据段单字节
    pub fn data_get(&self, offset: usize) -> u8 {
        debug_assert!(HEADER_SIZE + offset < self.buf.len());

        self.buf[HEADER_SIZE + offset]
    }

    /// 写数据段单字节
    pub fn data_set(&mut self, offset: usize, value: u8) {
        debug_assert!(!self.sealed);
        debug_assert!(HEADER_SIZE + offset < self.buf.len());

        self.buf[HEADER_SIZE + offset] = value;
    }

    /// 数据段某偏移位置按位或
    pub fn data_or(&mut self, offset: usize, bits: u8) {
        debug_assert!(!self.sealed);

        self.buf[HEADER_SIZE + offset] |= bits;
    }

    /// 在数据偏移处写入角度（i16 小端，0.1 度）
    pub fn angle_set(&mut self, offset: usize, angle_deg: f64) {
        let raw = angle_to_raw(angle_deg);
        self.data_set(offset, (raw & 0xFF) as u8);
        self.data_set(offset + 1, (raw >> 8) as u8);
    }

    /// 读出数据偏移处的角度
    pub fn angle_get(&self, offset: usize) -> f64 {
        let raw = i16::from_le_bytes([self.data_get(offset), self.data_get(offset + 1)]);
        raw_to_angle(raw)
    }

    /// 在数据偏移处写入角速度（i16 小端，0.1 度/秒）
    pub fn speed_set(&mut self, offset: usize, speed_deg_s: f64) {
        let raw = speed_to_raw(speed_deg_s);
        self.data_set(offset, (raw & 0xFF) as u8);
        self.data_set(offset + 1, (raw >> 8) as u8);
    }

    /// 封口：计算整帧 CRC-32 并追加到帧尾
    ///
    /// 只能调用一次；已封口的帧不可再修改。
    pub fn seal(&mut self) {
        debug_assert!(!self.sealed);

        let body_len = self.total_len() - FOOTER_SIZE;
        let footer = crc32(&self.buf[..body_len]);
        self.buf[body_len..body_len + FOOTER_SIZE].copy_from_slice(&footer.to_le_bytes());
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// 封口后的完整帧字节
    pub fn as_bytes(&self) -> &[u8] {
        debug_assert!(self.sealed);

        &self.buf[..self.total_len()]
    }

    /// 把封好的帧切分为 CAN 载荷
    ///
    /// 每块最多 8 字节，但最后一块不允许比 4 字节帧尾还短：
    /// 如果按 8 字节直切会剩下 1..3 字节，就把上一块削短，让
    /// 最后一块恰好承载帧尾。
    pub fn chunks(&self) -> ChunkIter<'_> {
        ChunkIter {
            bytes: self.as_bytes(),
            offset: 0,
        }
    }

    /// 十六进制转储（诊断用）
    pub fn dump(&self, out: &mut dyn std::io::Write) -> std::io::Result<()> {
        writeln!(out, "SOF      : 0x{:02x}", self.buf[0])?;
        writeln!(out, "Size     : {} bytes", self.total_len())?;
        writeln!(out, "Version  : 0x{:02x}", self.buf[2])?;
        writeln!(out, "Cmd Type : 0x{:02x}", self.buf[3])?;
        writeln!(out, "Encoded  : 0x{:02x}", self.buf[4])?;
        writeln!(out, "Serial   : 0x{:04x}", self.serial())?;

        let data_len = self.total_len() - HEADER_SIZE - FOOTER_SIZE;
        write!(out, "Data     :")?;
        for i in 0..data_len {
            write!(out, " 0x{:02x}", self.data_get(i))?;
        }
        writeln!(out)?;

        Ok(())
    }
}

/// CAN 载荷切分迭代器
pub struct ChunkIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let remaining = self.bytes.len() - self.offset;
        if remaining == 0 {
            return None;
        }

        let size = if remaining > 8 {
            if remaining > 12 { 8 } else { remaining - FOOTER_SIZE }
        } else {
            remaining
        };

        let chunk = &self.bytes[self.offset..self.offset + size];
        self.offset += size;
        Some(chunk)
    }
}
