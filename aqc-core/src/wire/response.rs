//! Response payloads handed to the HTTP layer.
//!
//! ```json
//! {"request_id": "…", "status_code": 200, "data": { …QcVerdict… }}
//! {"request_id": "…", "status_code": 1003, "data": {}}
//! ```

use serde::Serialize;

use super::StatusCode;
use crate::metrics::{ClarityDetail, SpeechInterval};
use crate::stats::StatsSnapshot;

/// QC result for one successfully processed file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcVerdict {
    pub is_silent: bool,
    /// `vad.speech_ms >= 300`.
    pub has_speech: bool,
    /// `[0, 1]`, 4 decimal places.
    pub speech_ratio: f64,
    pub clip_count: usize,
    /// Onset of each clipping event.
    pub clip_times_ms: Vec<u64>,
    /// `None` when clarity scoring is disabled.
    pub clarity: Option<f64>,
    pub clarity_detail: Option<ClarityDetail>,
    pub vad: VadSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VadSummary {
    /// Merged intervals; empty when segment output is disabled.
    pub segments_ms: Vec<SpeechInterval>,
    pub speech_ms: u64,
}

/// `{}` on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Verdict(Box<QcVerdict>),
    Empty(Empty),
}

/// Envelope returned for every upload, success or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub request_id: String,
    pub status_code: u16,
    pub data: ResponseData,
}

impl ApiResponse {
    pub fn ok(request_id: impl Into<String>, verdict: QcVerdict) -> Self {
        Self {
            request_id: request_id.into(),
            status_code: StatusCode::Ok.code(),
            data: ResponseData::Verdict(Box::new(verdict)),
        }
    }

    pub fn failure(request_id: impl Into<String>, code: StatusCode) -> Self {
        Self {
            request_id: request_id.into(),
            status_code: code.code(),
            data: ResponseData::Empty(Empty {}),
        }
    }

    /// Typed view of `status_code`.
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::try_from(self.status_code).ok()
    }

    pub fn verdict(&self) -> Option<&QcVerdict> {
        match &self.data {
            ResponseData::Verdict(v) => Some(v),
            ResponseData::Empty(_) => None,
        }
    }
}

/// Health endpoint body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: String,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

impl HealthReport {
    pub fn healthy(version: impl Into<String>, stats: StatsSnapshot) -> Self {
        Self {
            status: "healthy",
            version: version.into(),
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verdict() -> QcVerdict {
        QcVerdict {
            is_silent: false,
            has_speech: true,
            speech_ratio: 0.8123,
            clip_count: 1,
            clip_times_ms: vec![6],
            clarity: None,
            clarity_detail: None,
            vad: VadSummary {
                segments_ms: vec![SpeechInterval::new(0, 1500)],
                speech_ms: 1500,
            },
        }
    }

    #[test]
    fn failure_has_empty_object_data() {
        let value = serde_json::to_value(ApiResponse::failure("r1", StatusCode::FileTooLarge))
            .expect("serialize");
        assert_eq!(value, json!({"request_id": "r1", "status_code": 1003, "data": {}}));
    }

    #[test]
    fn success_carries_verdict_with_null_clarity() {
        let resp = ApiResponse::ok("r2", verdict());
        assert_eq!(resp.status(), Some(StatusCode::Ok));
        let value = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(value["status_code"], 200);
        assert_eq!(value["data"]["clarity"], serde_json::Value::Null);
        assert_eq!(value["data"]["clarity_detail"], serde_json::Value::Null);
        assert_eq!(value["data"]["vad"]["segments_ms"], json!([[0, 1500]]));
        assert_eq!(value["data"]["clip_times_ms"], json!([6]));
    }

    #[test]
    fn health_flattens_snapshot() {
        let stats = StatsSnapshot {
            start_time: "2024-01-01 00:00:00".into(),
            uptime_seconds: 5,
            uptime_formatted: "5s".into(),
            total_requests: 2,
            success_count: 1,
            failed_count: 1,
            processing_count: 0,
            processing_ids: vec![],
            queued_count: 0,
            queued_ids: vec![],
        };
        let value = serde_json::to_value(HealthReport::healthy("1.0.0", stats)).expect("serialize");
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["version"], "1.0.0");
        assert_eq!(value["total_requests"], 2);
        assert_eq!(value["uptime_formatted"], "5s");
    }
}
