//! 로그 수집 모듈 -- 설정된 로그 파일에서 원시 라인을 수집합니다.
//!
//! # 구성
//! - [`preflight`]: 파싱 전에 소스가 실제로 존재하고 읽을 수 있는지 확인
//! - [`tail`]: 회전/절단을 감지하며 파일을 따라 읽는 [`FileTailer`]
//! - [`worker`]: 소스당 하나의 tokio 태스크로 읽기 → 파싱 → 검증
//!
//! # 아키텍처
//! 각 소스 워커는 자체 tokio 태스크에서 실행되며, 검증된 이벤트를
//! `tokio::mpsc::Sender`를 통해 탐지 샤드로 전달합니다.

pub mod preflight;
pub mod tail;
pub mod worker;

pub use preflight::{
    Diagnostic, PreflightOptions, PreflightReport, SourceReport, run_preflight, verify_source,
};
pub use tail::FileTailer;
pub use worker::{Backoff, DEFAULT_BATCH_SIZE, SourceWorker};

use bytes::Bytes;

/// 수집된 원시 라인
///
/// 종결자(`\n`, `\r\n`)가 제거된 라인 바이트를 그대로 담습니다.
/// 문자열 변환은 [`LineProcessor`](crate::ingest::LineProcessor)가 하며,
/// UTF-8이 아닌 라인은 파싱 실패로 거부됩니다.
#[derive(Debug, Clone)]
pub struct RawLine {
    /// 원시 라인 바이트
    pub data: Bytes,
    /// 소스 이름 (설정상의 이름)
    pub source: String,
    /// 파서 디스패치 키
    pub source_type: String,
}

impl RawLine {
    /// 새 RawLine을 생성합니다.
    pub fn new(data: Bytes, source: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            data,
            source: source.into(),
            source_type: source_type.into(),
        }
    }
}
