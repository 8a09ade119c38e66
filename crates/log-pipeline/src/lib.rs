//! siemlite-log-pipeline -- 인증 로그 수집부터 finding 전달까지
//!
//! # 모듈 구성
//!
//! - [`collector`]: 파일 tail, 프리플라이트 검사, 소스 워커
//! - [`parser`]: source_type별 파서 레지스트리 (`auth_log`, `json`)
//! - [`ingest`]: 파싱과 스키마 검증을 묶은 라인 처리기
//! - [`detect`]: 키 샤딩된 탐지기 파이프라인 (반복 실패, 권한 상승)
//! - [`sink`]: 유한 버퍼, 재시도, 종료 플러시를 갖춘 전달 계층
//! - [`pipeline`]: 전체 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`stats`]: 처리 통계 카운터
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! FileTailer -> LineProcessor -> ShardRouter -> DetectorPipeline -> SinkEmitter -> EventSink
//!  (source)     (parse+validate)  hash(user,host)  (per shard)      (buffer+retry)  (jsonl/channel)
//! ```

pub mod collector;
pub mod config;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod stats;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{SiemPipeline, SiemPipelineBuilder};

// 설정
pub use config::{
    DetectorSettings, OverflowPolicy, PipelineConfig, PipelineConfigBuilder,
    PrivilegeEscalationSettings, RepeatedFailureSettings, SinkSettings, SinkTarget,
    StartPosition,
};

// 에러
pub use error::LogPipelineError;

// 파서
pub use parser::{AuthLogParser, JsonEventParser, ParserRegistry};

// 수집
pub use collector::{FileTailer, PreflightOptions, PreflightReport, RawLine, run_preflight};

// 처리
pub use ingest::{LineProcessor, LineRejection};

// 탐지
pub use detect::{DetectorPipeline, KeyState, PrivilegeEscalationDetector, RepeatedFailureDetector};

// 싱크
pub use sink::{ChannelSink, EmitterHandle, JsonLinesSink, SinkEmitter};

// 통계
pub use stats::{PipelineStats, StatsSnapshot};
