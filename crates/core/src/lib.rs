//! siemlite-core -- 공통 이벤트 스키마와 확장 포인트
//!
//! 모든 siemlite 크레이트가 공유하는 타입을 정의합니다.
//!
//! - [`event`]: 아홉 섹션 이벤트 레코드, 초안, 스켈레톤 생성기
//! - [`validate`]: 초안/와이어 문서를 불변 레코드로 고정하는 검증기
//! - [`action`]: 닫힌 액션 열거형과 외부 태그 테이블
//! - [`pipeline`]: 파서/탐지기/싱크/파이프라인 trait
//! - [`config`]: `log_sources.yaml` 설정
//! - [`error`]: 에러 분류 체계

pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;
pub mod validate;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    ConfigError, DetectorError, ParseError, PipelineError, SiemError, SinkError,
    SourceAccessError, ValidationError,
};

// 설정
pub use config::{SiemConfig, SourceSpec};

// 이벤트
pub use action::{ActionCategory, ActionTable, ActionType};
pub use clock::{Clock, IdGenerator, SystemClock, UuidGenerator};
pub use event::{EventDraft, EventFactory, EventRecord, OutcomeResult};
pub use validate::Validator;

// 파이프라인 trait
pub use pipeline::{
    BoxFuture, DetectionContext, Detector, EventParser, EventSink, HealthStatus, Pipeline,
};

// 도메인 타입
pub use types::{Finding, Severity, SinkItem, TrackingKey};
