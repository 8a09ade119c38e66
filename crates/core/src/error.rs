//! 에러 타입 -- 도메인별 에러 정의
//!
//! 프로세스를 종료시키는 에러는 [`ConfigError`]와 프리플라이트 단계의
//! [`SourceAccessError`]뿐입니다. 나머지는 해당 지점에서 기록 후 복구됩니다.

/// siemlite 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum SiemError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 로그 소스 접근 에러
    #[error("source access error: {0}")]
    SourceAccess(#[from] SourceAccessError),

    /// 파싱 실패
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 스키마 검증 실패
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// 탐지기 실패
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),

    /// 싱크 전달 실패
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SiemError {
    /// 시작 단계에서 프로세스를 종료해야 하는 에러인지 확인합니다.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::SourceAccess(_))
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파일이 비어 있음 (문서가 없음)
    #[error("config file is empty: {path}")]
    Empty { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 필수 소스가 없거나 비활성화됨
    #[error("{source_name} source is missing or disabled in config")]
    SourceUnavailable { source_name: String },

    /// 소스 경로가 정의되지 않음
    #[error("{source_name} path is not defined in config")]
    MissingPath { source_name: String },
}

/// 로그 소스 접근 에러
#[derive(Debug, thiserror::Error)]
pub enum SourceAccessError {
    /// 경로가 존재하지 않음
    #[error("log file does not exist: {path}")]
    NotFound { path: String },

    /// 경로가 일반 파일이 아님
    #[error("log path exists but is not a file: {path}")]
    NotAFile { path: String },

    /// 현재 사용자가 읽을 수 없음
    #[error("log file is not readable by current user: {path}: {reason}")]
    Unreadable { path: String, reason: String },

    /// 읽기 도중 실패
    #[error("failed to read log file {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

/// 파싱 실패 -- 원시 라인을 항상 보존합니다.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    /// 등록되지 않은 source_type
    #[error("no parser registered for source type '{source_type}'")]
    UnknownSourceType { source_type: String, raw: String },

    /// 파서가 인식하지 못한 라인
    #[error("{parser}: unrecognized line")]
    Unrecognized { parser: String, raw: String },

    /// 필수 필드를 추출할 수 없음
    #[error("{parser}: missing required field '{field}'")]
    MissingField {
        parser: String,
        field: &'static str,
        raw: String,
    },

    /// 필드 값 형식 오류
    #[error("{parser}: invalid value for '{field}': {reason}")]
    InvalidField {
        parser: String,
        field: &'static str,
        reason: String,
        raw: String,
    },

    /// UTF-8이 아닌 라인. `raw`는 로그용 손실 변환 사본
    #[error("line is not valid UTF-8 (invalid byte at offset {valid_up_to})")]
    InvalidEncoding { valid_up_to: usize, raw: String },
}

impl ParseError {
    /// 실패한 원시 라인을 반환합니다.
    pub fn raw(&self) -> &str {
        match self {
            Self::UnknownSourceType { raw, .. }
            | Self::Unrecognized { raw, .. }
            | Self::MissingField { raw, .. }
            | Self::InvalidField { raw, .. }
            | Self::InvalidEncoding { raw, .. } => raw,
        }
    }
}

/// 스키마 검증 실패
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// 최상위 섹션 누락
    #[error("missing required section: {0}")]
    MissingSection(&'static str),

    /// 필수 필드 누락
    #[error("{0} must be set")]
    MissingField(&'static str),

    /// outcome.result 값이 허용 집합 밖
    #[error("outcome.result must be 'success' or 'failure', got {0:?}")]
    InvalidOutcome(String),

    /// action.type이 action.category에 속하지 않음
    #[error("action.type '{kind}' does not belong to category '{category}'")]
    ActionScope { category: String, kind: String },

    /// 알 수 없는 액션 태그
    #[error("unknown {field} tag {value:?}")]
    UnknownTag { field: &'static str, value: String },

    /// 필드 타입이 스키마와 다름
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// 탐지기 실패 -- 해당 탐지기만 격리됩니다.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DetectorError {
    /// 탐지 로직 실패
    #[error("detector '{detector}' failed: {reason}")]
    Failed { detector: String, reason: String },

    /// 탐지기 패닉
    #[error("detector '{detector}' panicked: {reason}")]
    Panicked { detector: String, reason: String },
}

/// 싱크 전달 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// 하위 싱크가 일시적으로 사용 불가
    #[error("sink '{sink}' unavailable: {reason}")]
    Unavailable { sink: String, reason: String },

    /// 전달 타임아웃
    #[error("sink '{sink}' timed out after {timeout_ms}ms")]
    Timeout { sink: String, timeout_ms: u64 },

    /// 직렬화 실패 (재시도해도 성공할 수 없음)
    #[error("failed to encode item for sink '{sink}': {reason}")]
    Encode { sink: String, reason: String },

    /// 싱크가 닫힘
    #[error("sink '{sink}' closed")]
    Closed { sink: String },
}

impl SinkError {
    /// 재시도로 회복될 수 있는 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,

    /// 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_and_source_errors_are_fatal() {
        let config: SiemError = ConfigError::Empty {
            path: "config/log_sources.yaml".to_owned(),
        }
        .into();
        assert!(config.is_fatal_at_startup());

        let source: SiemError = SourceAccessError::NotFound {
            path: "/var/log/auth.log".to_owned(),
        }
        .into();
        assert!(source.is_fatal_at_startup());
    }

    #[test]
    fn parse_and_validation_errors_are_recoverable() {
        let parse: SiemError = ParseError::Unrecognized {
            parser: "auth_log".to_owned(),
            raw: "garbage".to_owned(),
        }
        .into();
        assert!(!parse.is_fatal_at_startup());

        let invalid: SiemError = ValidationError::MissingField("metadata.event_time").into();
        assert!(!invalid.is_fatal_at_startup());
    }

    #[test]
    fn parse_error_preserves_raw_line() {
        let err = ParseError::MissingField {
            parser: "json".to_owned(),
            field: "outcome.result",
            raw: "{\"user\":\"root\"}".to_owned(),
        };
        assert_eq!(err.raw(), "{\"user\":\"root\"}");
        assert!(err.to_string().contains("outcome.result"));
    }

    #[test]
    fn source_unavailable_names_the_source() {
        let err = ConfigError::SourceUnavailable {
            source_name: "auth_log".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "auth_log source is missing or disabled in config"
        );
    }

    #[test]
    fn sink_error_retryability() {
        let unavailable = SinkError::Unavailable {
            sink: "stdout".to_owned(),
            reason: "broken pipe".to_owned(),
        };
        assert!(unavailable.is_retryable());

        let encode = SinkError::Encode {
            sink: "stdout".to_owned(),
            reason: "bad".to_owned(),
        };
        assert!(!encode.is_retryable());
    }
}
