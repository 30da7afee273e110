//! 扁平错误分类（spec §7）：所有公开操作返回同一个 `GimbalError`。

use thiserror::Error;

/// 所有公开操作返回的扁平错误分类。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GimbalError {
    #[error("unrecognized action")]
    Action,
    #[error("already started")]
    AlreadyStarted,
    #[error("already stopped")]
    AlreadyStopped,
    #[error("already stopping")]
    AlreadyStopping,
    #[error("angle exceeds configured maximum")]
    AngleMax,
    #[error("angle below configured minimum")]
    AngleMin,
    #[error("reply command-id does not match outstanding transaction")]
    CmdId,
    #[error("reply command-set mismatch")]
    CmdSet,
    #[error("reply command-type mismatch")]
    CmdType,
    #[error("invalid code")]
    Code,
    #[error("invalid configuration")]
    Config,
    #[error("unrecognized control")]
    Control,
    #[error("encoded flag set on inbound frame")]
    Encoded,
    #[error("unexpected exception")]
    Exception,
    #[error("failed to open file")]
    FileOpen,
    #[error("declared frame length too long")]
    FrameTooLong,
    #[error("declared frame length too short")]
    FrameTooShort,
    #[error("unrecognized function")]
    Function,
    #[error("gimbal reported a non-OK result")]
    Gimbal,
    #[error("gimbal is not bound")]
    GimbalOff,
    #[error("unsupported gimbal protocol version")]
    GimbalVersion,
    #[error("value exceeds maximum")]
    Max,
    #[error("value below minimum")]
    Min,
    #[error("receiver is not a gamepad")]
    NotAGamepad,
    #[error("not ready")]
    NotReady,
    #[error("unsupported operation")]
    Operation,
    #[error("protocol error")]
    Protocol,
    #[error("receive failed")]
    Receive,
    #[error("receiver error")]
    Receiver,
    #[error("transaction result unavailable")]
    Result,
    #[error("send failed")]
    Send,
    #[error("speed out of configured range")]
    Speed,
    #[error("speed exceeds configured maximum")]
    SpeedMax,
    #[error("speed below configured minimum")]
    SpeedMin,
    #[error("illegal state for this operation")]
    State,
    #[error("worker thread error")]
    Thread,
    #[error("operation timed out")]
    Timeout,
}

/// `Tr_Queue` 的成功结果：入队，或取代了尚未开始的旧事务。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// 事务被正常放入 `next` 槽。
    Queued,
    /// 事务取代了 `next` 槽中尚未开始的旧事务（软运动指令）。
    Replaced,
}

/// 校验 `value` 落在 `[min, max]` 内，否则返回 `Max`/`Min`。
pub fn value_validate(value: f64, min: f64, max: f64) -> Result<(), GimbalError> {
    if value > max {
        return Err(GimbalError::Max);
    }
    if value < min {
        return Err(GimbalError::Min);
    }
    Ok(())
}

/// 将 `value` 夹紧到 `[min, max]`。
pub fn value_limit(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_validate_bounds() {
        assert_eq!(value_validate(50.0, 0.0, 100.0), Ok(()));
        assert_eq!(value_validate(100.1, 0.0, 100.0), Err(GimbalError::Max));
        assert_eq!(value_validate(-0.1, 0.0, 100.0), Err(GimbalError::Min));
    }

    #[test]
    fn test_value_limit_clamps() {
        assert_eq!(value_limit(150.0, -100.0, 100.0), 100.0);
        assert_eq!(value_limit(-150.0, -100.0, 100.0), -100.0);
        assert_eq!(value_limit(10.0, -100.0, 100.0), 10.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", GimbalError::Timeout), "operation timed out");
        assert_eq!(format!("{}", GimbalError::NotReady), "not ready");
    }
}
