//! 로그 파이프라인 에러 타입
//!
//! [`LogPipelineError`]는 파이프라인 조립과 실행 중 발생하는 에러를 표현합니다.
//! `From<LogPipelineError> for SiemError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 라인 단위 실패(파싱, 검증)는 core의 [`ParseError`](siemlite_core::ParseError),
//! [`ValidationError`](siemlite_core::ValidationError)로 표현되며 파이프라인을
//! 멈추지 않습니다.

use siemlite_core::error::{ConfigError, PipelineError, SiemError, SourceAccessError};

/// 로그 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum LogPipelineError {
    /// 같은 source_type에 파서가 이미 등록됨
    #[error("parser already registered for source type '{0}'")]
    DuplicateParser(String),

    /// 소스 접근 실패
    #[error(transparent)]
    Source(#[from] SourceAccessError),

    /// core 설정 해석 실패 (필수 소스 누락 등)
    #[error(transparent)]
    CoreConfig(#[from] ConfigError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 파서 패턴 컴파일 실패
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// 태스크 조인 실패
    #[error("task '{task}' failed: {reason}")]
    Task {
        /// 태스크 이름
        task: String,
        /// 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LogPipelineError> for SiemError {
    fn from(err: LogPipelineError) -> Self {
        match err {
            LogPipelineError::Source(e) => SiemError::SourceAccess(e),
            LogPipelineError::CoreConfig(e) => SiemError::Config(e),
            LogPipelineError::Config { field, reason } => {
                SiemError::Config(ConfigError::InvalidValue { field, reason })
            }
            LogPipelineError::Io(e) => SiemError::Io(e),
            other => SiemError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
