//! 파이프라인 처리 통계
//!
//! `metrics` 파사드로 내보내는 카운터와 별개로, 테스트와 CLI 요약 출력에서
//! 바로 읽을 수 있는 원자적 카운터를 유지합니다.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 파이프라인 전역 카운터
#[derive(Debug, Default)]
pub struct PipelineStats {
    lines_read: AtomicU64,
    parse_failures: AtomicU64,
    validation_failures: AtomicU64,
    events_accepted: AtomicU64,
    findings: AtomicU64,
    detector_errors: AtomicU64,
    sink_delivered: AtomicU64,
    sink_dropped: AtomicU64,
    sink_retries: AtomicU64,
    source_errors: AtomicU64,
    rotations: AtomicU64,
}

/// 특정 시점의 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub lines_read: u64,
    pub parse_failures: u64,
    pub validation_failures: u64,
    pub events_accepted: u64,
    pub findings: u64,
    pub detector_errors: u64,
    pub sink_delivered: u64,
    pub sink_dropped: u64,
    pub sink_retries: u64,
    pub source_errors: u64,
    pub rotations: u64,
}

macro_rules! counter_methods {
    ($($field:ident => $inc:ident),* $(,)?) => {
        $(
            #[doc = concat!("`", stringify!($field), "` 카운터를 증가시킵니다.")]
            pub fn $inc(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl PipelineStats {
    /// 모든 카운터가 0인 통계를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    counter_methods! {
        lines_read => add_lines_read,
        parse_failures => add_parse_failures,
        validation_failures => add_validation_failures,
        events_accepted => add_events_accepted,
        findings => add_findings,
        detector_errors => add_detector_errors,
        sink_delivered => add_sink_delivered,
        sink_dropped => add_sink_dropped,
        sink_retries => add_sink_retries,
        source_errors => add_source_errors,
        rotations => add_rotations,
    }

    /// 현재 값을 스냅샷으로 읽습니다.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
            detector_errors: self.detector_errors.load(Ordering::Relaxed),
            sink_delivered: self.sink_delivered.load(Ordering::Relaxed),
            sink_dropped: self.sink_dropped.load(Ordering::Relaxed),
            sink_retries: self.sink_retries.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PipelineStats::new();
        stats.add_lines_read(3);
        stats.add_parse_failures(1);
        stats.add_events_accepted(2);
        stats.add_lines_read(1);

        let snap = stats.snapshot();
        assert_eq!(snap.lines_read, 4);
        assert_eq!(snap.parse_failures, 1);
        assert_eq!(snap.events_accepted, 2);
        assert_eq!(snap.findings, 0);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let stats = PipelineStats::new();
        stats.add_sink_dropped(5);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["sink_dropped"], 5);
        assert_eq!(json["lines_read"], 0);
    }
}
