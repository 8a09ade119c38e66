//! 키별 탐지 상태
//!
//! ```text
//! clean --(실패)--> warning(count < threshold) --(count >= threshold)--> alerted(cooldown)
//!   ^                     |                                                   |
//!   +---(윈도우 이탈)-----+---------------(cooldown 만료)---------------------+
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 추적 키의 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    /// 윈도우 안에 실패가 없음
    Clean,
    /// 임계값 미만의 실패가 누적됨
    Warning {
        /// 윈도우 안의 실패 수
        count: usize,
    },
    /// finding을 내보냈고 cooldown 중
    Alerted {
        /// cooldown 만료 시각
        until: DateTime<Utc>,
    },
}

impl KeyState {
    /// 윈도우 안의 실패 수와 cooldown 만료 시각으로 상태를 결정합니다.
    pub fn derive(
        failures_in_window: usize,
        cooldown_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        match cooldown_until {
            Some(until) if now < until => Self::Alerted { until },
            _ if failures_in_window == 0 => Self::Clean,
            _ => Self::Warning {
                count: failures_in_window,
            },
        }
    }

    /// 상태 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Warning { .. } => "warning",
            Self::Alerted { .. } => "alerted",
        }
    }
}

impl std::fmt::Display for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Warning { count } => write!(f, "warning({count})"),
            Self::Alerted { until } => write!(f, "alerted(until {until})"),
        }
    }
}
