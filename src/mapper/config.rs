//! 映射配置文件解析
//!
//! 行式文本格式：
//!
//! ```text
//! # 注释
//! ATEM IPv4 = 192.168.1.240
//! CLEAR
//! GIMBAL ATEM = 11 IPv4 = 192.168.1.50
//! GIMBAL NONE ATEM = 2
//! CHANGED ANALOG_0_X YAW 2.0
//! PRESSED BUTTON_A
//! ```
//!
//! 以 `#`、空格、制表符开头或为空的行忽略。表行两列是删除、
//! 三到五列是 upsert。解析只产出指令值，应用在 [`ControlLink`]。
//!
//! [`ControlLink`]: crate::mapper::ControlLink

use std::net::Ipv4Addr;

use crate::atem::CameraType;
use crate::error::GimbalError;
use crate::gamepad::{Action, Control};
use crate::mapper::table::Function;

/// 一行配置解析出的指令
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigLine {
    /// 注释或空行
    Skip,
    /// 连接切换台，携带标识串
    Atem(String),
    /// 清空控制表
    Clear,
    /// 声明一个云台绑定，携带绑定描述串
    Gimbal(String),
    RemoveEntry {
        action: Action,
        control: Control,
    },
    AddEntry {
        action: Action,
        control: Control,
        function: Function,
        factor: f64,
        offset: f64,
    },
}

/// 解析一行
pub fn parse_line(line: &str) -> Result<ConfigLine, GimbalError> {
    match line.bytes().next() {
        None | Some(b'#') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
            return Ok(ConfigLine::Skip)
        },
        _ => {},
    }

    let trimmed = line.trim_end();

    if let Some(rest) = trimmed.strip_prefix("ATEM ") {
        return Ok(ConfigLine::Atem(rest.trim().to_owned()));
    }

    if trimmed == "CLEAR" || trimmed.starts_with("CLEAR ") {
        return Ok(ConfigLine::Clear);
    }

    if trimmed == "GIMBAL" {
        return Ok(ConfigLine::Gimbal(String::new()));
    }
    if let Some(rest) = trimmed.strip_prefix("GIMBAL ") {
        return Ok(ConfigLine::Gimbal(rest.trim().to_owned()));
    }

    parse_table_row(trimmed)
}

fn parse_table_row(line: &str) -> Result<ConfigLine, GimbalError> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    let parse_number = |s: &str| s.parse::<f64>().map_err(|_| GimbalError::Config);

    match fields.len() {
        2 => Ok(ConfigLine::RemoveEntry {
            action: fields[0].parse()?,
            control: fields[1].parse()?,
        }),

        3..=5 => Ok(ConfigLine::AddEntry {
            action: fields[0].parse()?,
            control: fields[1].parse()?,
            function: fields[2].parse()?,
            factor: fields.get(3).map(|s| parse_number(s)).transpose()?.unwrap_or(0.0),
            offset: fields.get(4).map(|s| parse_number(s)).transpose()?.unwrap_or(0.0),
        }),

        _ => Err(GimbalError::Config),
    }
}

/// 云台绑定里对云台本体的指称
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GimbalRef {
    /// 目录中的序号
    Index(usize),
    /// 按桥接器 IPv4 地址查找
    Ipv4(Ipv4Addr),
    /// 只绑切换台端口，不控制云台
    None,
}

/// 解析后的云台绑定描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    pub gimbal: GimbalRef,
    /// 切换台端口（1..=8），0 = 未绑定
    pub atem_port: u32,
    pub camera_type: CameraType,
}

/// 解析 `GIMBAL` 行的描述串
///
/// 接受的形式（键值对顺序任意）：
/// - 空串：目录 0 号云台，无切换台端口
/// - `ATEM = n`、`INDEX = i`、`IPv4 = a.b.c.d` 及其两两组合
/// - `NONE ATEM = n`：无云台，只占一个切换台端口
///
/// `ATEM` 端口编码相机类型：0..9 为 MFT、10..19 为 EF，模 10 取
/// 真实端口号。
pub fn parse_binding(spec: &str) -> Result<BindingSpec, GimbalError> {
    let tokens: Vec<&str> = spec.split_whitespace().collect();

    let mut atem_raw: Option<u32> = None;
    let mut index: Option<usize> = None;
    let mut ipv4: Option<Ipv4Addr> = None;
    let mut none = false;

    let mut cursor = 0usize;
    if tokens.first() == Some(&"NONE") {
        none = true;
        cursor = 1;
    }

    while cursor < tokens.len() {
        let key = tokens[cursor];
        if tokens.get(cursor + 1) != Some(&"=") {
            return Err(GimbalError::Config);
        }
        let value = tokens.get(cursor + 2).ok_or(GimbalError::Config)?;

        match key {
            "ATEM" => {
                atem_raw = Some(value.parse().map_err(|_| GimbalError::Config)?);
            },
            "INDEX" => {
                index = Some(value.parse().map_err(|_| GimbalError::Config)?);
            },
            "IPv4" => {
                ipv4 = Some(value.parse().map_err(|_| GimbalError::Config)?);
            },
            _ => return Err(GimbalError::Config),
        }

        cursor += 3;
    }

    let gimbal = if none {
        if index.is_some() || ipv4.is_some() || atem_raw.unwrap_or(0) == 0 {
            return Err(GimbalError::Config);
        }
        GimbalRef::None
    } else if let Some(addr) = ipv4 {
        if index.is_some() {
            return Err(GimbalError::Config);
        }
        GimbalRef::Ipv4(addr)
    } else {
        GimbalRef::Index(index.unwrap_or(0))
    };

    let atem_raw = atem_raw.unwrap_or(0);
    let camera_type = match atem_raw / 10 {
        0 => CameraType::Mft,
        1 => CameraType::Ef,
        _ => return Err(GimbalError::Config),
    };

    Ok(BindingSpec {
        gimbal,
        atem_port: atem_raw % 10,
        camera_type,
    })
}
