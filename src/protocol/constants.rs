//! 协议常量定义
//!
//! 帧结构、CAN 总线参数和默认命令集的命令编号。

/// 帧起始字节
pub const SOF: u8 = 0xAA;

/// 帧头长度（字节）
pub const HEADER_SIZE: usize = 12;

/// 帧尾长度（CRC-32，字节）
pub const FOOTER_SIZE: usize = 4;

/// 数据段最大长度（字节）
pub const DATA_SIZE_MAX: usize = 16;

/// 完整帧的总长度
pub const fn frame_total_size(data_len: usize) -> usize {
    HEADER_SIZE + data_len + FOOTER_SIZE
}

/// 最短合法帧（1 字节数据）
pub const FRAME_SIZE_MIN: usize = frame_total_size(1);

/// 接收缓冲区容量
pub const RX_BUFFER_SIZE: usize = 128;

// ===== CAN 总线参数 =======================================================

/// 云台 → 主机方向的 CAN ID
pub const CAN_ID_RX: u32 = 0x222;

/// 主机 → 云台方向的 CAN ID
pub const CAN_ID_TX: u32 = 0x223;

/// 接收过滤掩码
pub const CAN_MASK: u32 = 0x7FF;

/// 总线波特率
pub const CAN_BITRATE: u32 = 1_000_000;

// ===== 命令类型 ===========================================================

/// 请求，要求应答
pub const CMD_TYPE_DO_REPLY: u8 = 0x03;

/// 请求，无应答
pub const CMD_TYPE_NO_REPLY: u8 = 0x00;

/// 应答
pub const CMD_TYPE_REPLY: u8 = 0x20;

// ===== 默认命令集 =========================================================

pub const CMD_SET_DEFAULT: u8 = 0x0E;

/// 第三方命令集（协议认可但本实现不发送）
pub const CMD_SET_THIRD_PARTY: u8 = 0x0D;

pub const CMD_POSITION_SET: u8 = 0x00;
pub const CMD_SPEED_SET: u8 = 0x01;
pub const CMD_ANGLE_GET: u8 = 0x02;
pub const CMD_ANGLE_LIMIT_SET: u8 = 0x03;
pub const CMD_ANGLE_LIMIT_GET: u8 = 0x04;
pub const CMD_MOTOR_STIFFNESS_SET: u8 = 0x05;
pub const CMD_MOTOR_STIFFNESS_GET: u8 = 0x06;
pub const CMD_VERSION: u8 = 0x09;
pub const CMD_CONTROL: u8 = 0x0A;
pub const CMD_TLV_SET: u8 = 0x0C;
pub const CMD_CALIBRATION: u8 = 0x0F;
pub const CMD_TRACK_SWITCH: u8 = 0x11;
pub const CMD_FOCUS: u8 = 0x12;

/// FOCUS 命令内的子命令
pub const CMD_FOCUS_SET: u8 = 0x01;
pub const CMD_FOCUS_CAL: u8 = 0x02;

// ===== 数据段偏移 =========================================================

/// 命令集所在的数据偏移
pub const DATA_CMD_SET: usize = 0;

/// 命令 id 所在的数据偏移
pub const DATA_CMD_ID: usize = 1;

/// 应答结果字节所在的数据偏移
pub const REPLY_RESULT: usize = 2;

// ===== 应答结果编码 =======================================================

pub const DEVICE_OK: u8 = 0x00;
pub const DEVICE_ERROR_PARSE: u8 = 0x01;
pub const DEVICE_ERROR_FAIL: u8 = 0x02;
