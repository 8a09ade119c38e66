//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다. 레코더(익스포터)는 설치하지 않으며,
//! 임베딩 애플리케이션이 필요하면 설치합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `siemlite_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(siemlite_core::metrics::EVENTS_ACCEPTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 소스 이름 레이블 키
pub const LABEL_SOURCE: &str = "source";

/// 파서 source_type 레이블 키
pub const LABEL_SOURCE_TYPE: &str = "source_type";

/// 탐지기 ID 레이블 키
pub const LABEL_DETECTOR: &str = "detector";

/// 심각도 레이블 키 (info, low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 싱크 이름 레이블 키
pub const LABEL_SINK: &str = "sink";

/// 드롭 사유 레이블 키 (overflow, shutdown, rejected)
pub const LABEL_REASON: &str = "reason";

// ─── 수집 ───────────────────────────────────────────────────────────

/// 읽은 원시 라인 수 (counter, label: source)
pub const LINES_READ_TOTAL: &str = "siemlite_lines_read_total";

/// 소스 읽기 에러 수 (counter, label: source)
pub const SOURCE_ERRORS_TOTAL: &str = "siemlite_source_errors_total";

/// 회전/절단 감지 횟수 (counter, label: source)
pub const SOURCE_ROTATIONS_TOTAL: &str = "siemlite_source_rotations_total";

// ─── 파싱/검증 ─────────────────────────────────────────────────────

/// 파싱 실패 수 (counter, label: source_type)
pub const PARSE_FAILURES_TOTAL: &str = "siemlite_parse_failures_total";

/// 검증 실패 수 (counter, label: source_type)
pub const VALIDATION_FAILURES_TOTAL: &str = "siemlite_validation_failures_total";

/// 검증을 통과한 이벤트 수 (counter, label: source_type)
pub const EVENTS_ACCEPTED_TOTAL: &str = "siemlite_events_accepted_total";

// ─── 탐지 ───────────────────────────────────────────────────────────

/// 생성된 finding 수 (counter, labels: detector, severity)
pub const FINDINGS_TOTAL: &str = "siemlite_findings_total";

/// 탐지기 에러/패닉 수 (counter, label: detector)
pub const DETECTOR_ERRORS_TOTAL: &str = "siemlite_detector_errors_total";

/// 추적 중인 키 수 (gauge)
pub const TRACKED_KEYS: &str = "siemlite_tracked_keys";

// ─── 싱크 ───────────────────────────────────────────────────────────

/// 전달 성공 항목 수 (counter, label: sink)
pub const SINK_DELIVERED_TOTAL: &str = "siemlite_sink_delivered_total";

/// 드롭된 항목 수 (counter, labels: sink, reason)
pub const SINK_DROPPED_TOTAL: &str = "siemlite_sink_dropped_total";

/// 재시도 횟수 (counter, label: sink)
pub const SINK_RETRIES_TOTAL: &str = "siemlite_sink_retries_total";

/// 싱크 버퍼 내 항목 수 (gauge)
pub const SINK_BUFFER_SIZE: &str = "siemlite_sink_buffer_size";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(LINES_READ_TOTAL, "Raw log lines read from sources");
    describe_counter!(SOURCE_ERRORS_TOTAL, "Source read errors (retried with backoff)");
    describe_counter!(
        SOURCE_ROTATIONS_TOTAL,
        "Log rotations or truncations detected"
    );
    describe_counter!(PARSE_FAILURES_TOTAL, "Lines no parser could normalize");
    describe_counter!(
        VALIDATION_FAILURES_TOTAL,
        "Parsed drafts rejected by the schema validator"
    );
    describe_counter!(EVENTS_ACCEPTED_TOTAL, "Validated events accepted");
    describe_counter!(FINDINGS_TOTAL, "Findings emitted by detectors");
    describe_counter!(DETECTOR_ERRORS_TOTAL, "Detector failures and panics");
    describe_gauge!(TRACKED_KEYS, "Keys tracked across detector shards");
    describe_counter!(SINK_DELIVERED_TOTAL, "Items accepted by the sink");
    describe_counter!(SINK_DROPPED_TOTAL, "Items dropped before delivery");
    describe_counter!(SINK_RETRIES_TOTAL, "Sink delivery retries");
    describe_gauge!(SINK_BUFFER_SIZE, "Items waiting in the sink buffer");
}
