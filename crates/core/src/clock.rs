//! 시계와 ID 생성기 -- 주입 가능한 전역 의존성
//!
//! `ingest_time`과 `event_id`는 생성자에 주입된 [`Clock`]과 [`IdGenerator`]로
//! 결정됩니다. 테스트는 [`ManualClock`]과 [`SequentialIds`]로 결정적인 값을
//! 사용할 수 있습니다.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};

/// 현재 시각 공급자
pub trait Clock: Send + Sync {
    /// 현재 UTC 시각
    fn now(&self) -> DateTime<Utc>;
}

/// 시스템 시계
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 수동으로 조작하는 시계 (테스트용)
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// 주어진 시각에 고정된 시계를 생성합니다.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 시각을 설정합니다.
    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }

    /// 시각을 앞으로 이동합니다.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 이벤트 ID 생성기
pub trait IdGenerator: Send + Sync {
    /// 전역적으로 유일한 새 ID
    fn next_id(&self) -> String;
}

/// UUID v4 ID 생성기
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// `{prefix}-{n}` 형식의 순차 ID 생성기 (테스트용)
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    /// 1부터 시작하는 생성기를 만듭니다.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn sequential_ids_are_unique() {
        let ids = SequentialIds::new("evt");
        assert_eq!(ids.next_id(), "evt-1");
        assert_eq!(ids.next_id(), "evt-2");
    }

    #[test]
    fn uuid_ids_have_v4_shape() {
        let id = UuidGenerator.next_id();
        assert_eq!(id.len(), 36);
        assert_ne!(id, UuidGenerator.next_id());
    }
}
