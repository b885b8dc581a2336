//! Stable business status codes.
//!
//! These integers are the wire contract with clients and are never
//! renumbered. Transport success is independent of them: a rejected file is
//! still a well-formed response.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum StatusCode {
    Ok = 200,
    MissingAudio = 1001,
    DurationOutOfRange = 1002,
    FileTooLarge = 1003,
    DecodeFailed = 2001,
    ResampleFailed = 2002,
    InvalidAudio = 2003,
    VadInferFailed = 3001,
}

impl StatusCode {
    pub const ALL: [StatusCode; 8] = [
        StatusCode::Ok,
        StatusCode::MissingAudio,
        StatusCode::DurationOutOfRange,
        StatusCode::FileTooLarge,
        StatusCode::DecodeFailed,
        StatusCode::ResampleFailed,
        StatusCode::InvalidAudio,
        StatusCode::VadInferFailed,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    /// Upper snake-case name, as used in logs and reports.
    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::MissingAudio => "MISSING_AUDIO",
            StatusCode::DurationOutOfRange => "DURATION_OUT_OF_RANGE",
            StatusCode::FileTooLarge => "FILE_TOO_LARGE",
            StatusCode::DecodeFailed => "DECODE_FAILED",
            StatusCode::ResampleFailed => "RESAMPLE_FAILED",
            StatusCode::InvalidAudio => "INVALID_AUDIO",
            StatusCode::VadInferFailed => "VAD_INFER_FAILED",
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> Self {
        code.code()
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        StatusCode::ALL
            .into_iter()
            .find(|c| c.code() == value)
            .ok_or_else(|| format!("unknown status code {value}"))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let table: Vec<(u16, &str)> = StatusCode::ALL.iter().map(|c| (c.code(), c.name())).collect();
        assert_eq!(
            table,
            vec![
                (200, "OK"),
                (1001, "MISSING_AUDIO"),
                (1002, "DURATION_OUT_OF_RANGE"),
                (1003, "FILE_TOO_LARGE"),
                (2001, "DECODE_FAILED"),
                (2002, "RESAMPLE_FAILED"),
                (2003, "INVALID_AUDIO"),
                (3001, "VAD_INFER_FAILED"),
            ]
        );
    }

    #[test]
    fn serializes_as_integer() {
        assert_eq!(serde_json::to_string(&StatusCode::VadInferFailed).expect("ser"), "3001");
        let back: StatusCode = serde_json::from_str("1003").expect("de");
        assert_eq!(back, StatusCode::FileTooLarge);
        assert!(serde_json::from_str::<StatusCode>("999").is_err());
    }
}
