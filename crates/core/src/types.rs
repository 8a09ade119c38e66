//! 도메인 타입 -- 탐지 결과와 공통 값 타입
//!
//! 탐지기가 생성하는 [`Finding`], 탐지 상태를 구분하는 [`TrackingKey`],
//! 싱크로 전달되는 [`SinkItem`]을 정의합니다.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventRecord;

/// 사용자/호스트가 없을 때 키에 사용하는 값
pub const UNKNOWN_KEY_PART: &str = "-";

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 -- 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 탐지 상태 추적 키 -- (actor.user, source.host)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackingKey {
    pub user: String,
    pub host: String,
}

impl TrackingKey {
    /// 없는 값은 [`UNKNOWN_KEY_PART`]로 대체합니다.
    pub fn new(user: Option<&str>, host: Option<&str>) -> Self {
        Self {
            user: user.unwrap_or(UNKNOWN_KEY_PART).to_owned(),
            host: host.unwrap_or(UNKNOWN_KEY_PART).to_owned(),
        }
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// 탐지 결과
///
/// 하나 이상의 이벤트에 걸친 의심 패턴을 나타냅니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// 결과 고유 ID
    pub finding_id: String,
    /// 결과를 생성한 탐지기 ID
    pub detector_id: String,
    /// 기여한 이벤트 ID 목록 (시간순)
    pub event_ids: Vec<String>,
    /// 심각도
    pub severity: Severity,
    /// 사람이 읽을 수 있는 사유
    pub reason: String,
    /// 추적 키
    pub key: TrackingKey,
    /// 탐지 시각 (트리거 이벤트의 event_time)
    pub detected_at: DateTime<Utc>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} key={} events={}: {}",
            self.severity,
            self.detector_id,
            self.key,
            self.event_ids.len(),
            self.reason,
        )
    }
}

/// 싱크로 전달되는 항목
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SinkItem {
    /// 검증된 이벤트
    Event(Arc<EventRecord>),
    /// 탐지 결과
    Finding(Finding),
}

impl SinkItem {
    /// 항목 종류 이름 (로깅용)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Finding(_) => "finding",
        }
    }

    /// 항목 ID (이벤트 ID 또는 결과 ID)
    pub fn id(&self) -> &str {
        match self {
            Self::Event(event) => event.event_id(),
            Self::Finding(finding) => &finding.finding_id,
        }
    }
}
