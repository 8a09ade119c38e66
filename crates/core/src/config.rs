//! 설정 관리 -- `log_sources.yaml` 파싱 및 런타임 설정
//!
//! [`SiemConfig`]는 모든 구성요소의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SIEMLITE_SINK_KIND=file` 형식)
//! 3. 설정 파일 (YAML 기본, `.toml` 확장자는 TOML)
//! 4. 기본값 (`Default` 구현)
//!
//! 빈 문서는 로드 직후 [`ConfigError::Empty`]로 거부됩니다. 기본값으로
//! 조용히 대체하지 않습니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), siemlite_core::error::SiemError> {
//! use siemlite_core::config::SiemConfig;
//!
//! let config = SiemConfig::load("config/log_sources.yaml").await?;
//! let auth = config.source_spec("auth_log")?;
//! println!("{}", auth.path.display());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, SiemError};

/// 기본 설정 파일 경로
pub const DEFAULT_CONFIG_PATH: &str = "config/log_sources.yaml";

/// 필수 소스 기본값
pub const DEFAULT_REQUIRED_SOURCE: &str = "auth_log";

/// 설정 문서 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// 파일 확장자로 형식을 결정합니다. `.toml` 외에는 YAML입니다.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

/// siemlite 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiemConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 프리플라이트를 반드시 통과해야 하는 소스 이름
    #[serde(default = "default_required_sources")]
    pub required_sources: Vec<String>,
    /// 이름 → 로그 소스
    #[serde(default)]
    pub log_sources: BTreeMap<String, LogSourceConfig>,
    /// 수집/파이프라인 설정
    #[serde(default)]
    pub pipeline: PipelineSection,
    /// 탐지기 설정
    #[serde(default)]
    pub detectors: DetectorsConfig,
    /// 싱크 설정
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for SiemConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            required_sources: default_required_sources(),
            log_sources: BTreeMap::new(),
            pipeline: PipelineSection::default(),
            detectors: DetectorsConfig::default(),
            sink: SinkConfig::default(),
        }
    }
}

fn default_required_sources() -> Vec<String> {
    vec![DEFAULT_REQUIRED_SOURCE.to_owned()]
}

impl SiemConfig {
    /// 파일에서 설정을 로드하고 환경변수 오버라이드와 검증을 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SiemError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 파일에서 설정을 읽습니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SiemError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SiemError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                SiemError::Io(e)
            }
        })?;

        let config = match ConfigFormat::from_path(path) {
            ConfigFormat::Yaml => Self::parse_yaml(&content),
            ConfigFormat::Toml => Self::parse_toml(&content),
        };
        // 빈 문서 에러에 경로를 붙입니다.
        config.map_err(|e| match e {
            ConfigError::Empty { .. } => ConfigError::Empty {
                path: path.display().to_string(),
            }
            .into(),
            other => other.into(),
        })
    }

    /// YAML 문자열에서 설정을 파싱합니다.
    pub fn parse_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let document: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseFailed {
                reason: e.to_string(),
            })?;
        if document.is_null() {
            return Err(ConfigError::Empty {
                path: "<inline>".to_owned(),
            });
        }
        serde_yaml::from_value(document).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(toml_str).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;
        if table.is_empty() {
            return Err(ConfigError::Empty {
                path: "<inline>".to_owned(),
            });
        }
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SIEMLITE_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SIEMLITE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SIEMLITE_GENERAL_LOG_FORMAT");

        override_csv(&mut self.required_sources, "SIEMLITE_REQUIRED_SOURCES");

        // Pipeline
        override_u64(
            &mut self.pipeline.poll_interval_ms,
            "SIEMLITE_PIPELINE_POLL_INTERVAL_MS",
        );
        override_u64(
            &mut self.pipeline.backoff_base_ms,
            "SIEMLITE_PIPELINE_BACKOFF_BASE_MS",
        );
        override_u64(
            &mut self.pipeline.backoff_cap_ms,
            "SIEMLITE_PIPELINE_BACKOFF_CAP_MS",
        );
        override_string(
            &mut self.pipeline.start_position,
            "SIEMLITE_PIPELINE_START_POSITION",
        );
        override_usize(
            &mut self.pipeline.channel_capacity,
            "SIEMLITE_PIPELINE_CHANNEL_CAPACITY",
        );
        override_usize(
            &mut self.pipeline.shard_count,
            "SIEMLITE_PIPELINE_SHARD_COUNT",
        );
        override_usize(
            &mut self.pipeline.preview_lines,
            "SIEMLITE_PIPELINE_PREVIEW_LINES",
        );

        // Detectors
        override_u64(
            &mut self.detectors.history_window_secs,
            "SIEMLITE_DETECTORS_HISTORY_WINDOW_SECS",
        );
        override_usize(
            &mut self.detectors.max_tracked_keys,
            "SIEMLITE_DETECTORS_MAX_TRACKED_KEYS",
        );
        override_bool(
            &mut self.detectors.repeated_failure.enabled,
            "SIEMLITE_DETECTORS_REPEATED_FAILURE_ENABLED",
        );
        override_usize(
            &mut self.detectors.repeated_failure.threshold,
            "SIEMLITE_DETECTORS_REPEATED_FAILURE_THRESHOLD",
        );
        override_u64(
            &mut self.detectors.repeated_failure.window_secs,
            "SIEMLITE_DETECTORS_REPEATED_FAILURE_WINDOW_SECS",
        );
        override_u64(
            &mut self.detectors.repeated_failure.cooldown_secs,
            "SIEMLITE_DETECTORS_REPEATED_FAILURE_COOLDOWN_SECS",
        );
        override_bool(
            &mut self.detectors.privilege_escalation.enabled,
            "SIEMLITE_DETECTORS_PRIVILEGE_ESCALATION_ENABLED",
        );
        override_usize(
            &mut self.detectors.privilege_escalation.failure_chain,
            "SIEMLITE_DETECTORS_PRIVILEGE_ESCALATION_FAILURE_CHAIN",
        );

        // Sink
        override_string(&mut self.sink.kind, "SIEMLITE_SINK_KIND");
        override_opt_string(&mut self.sink.path, "SIEMLITE_SINK_PATH");
        override_usize(
            &mut self.sink.buffer_capacity,
            "SIEMLITE_SINK_BUFFER_CAPACITY",
        );
        override_string(
            &mut self.sink.overflow_policy,
            "SIEMLITE_SINK_OVERFLOW_POLICY",
        );
        override_u64(
            &mut self.sink.delivery_timeout_ms,
            "SIEMLITE_SINK_DELIVERY_TIMEOUT_MS",
        );
        override_u32(&mut self.sink.max_retries, "SIEMLITE_SINK_MAX_RETRIES");
        override_u64(
            &mut self.sink.flush_timeout_ms,
            "SIEMLITE_SINK_FLUSH_TIMEOUT_MS",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 필수 소스의 존재/활성화 여부는 여기서 검사하지 않습니다.
    /// 그것은 프리플라이트의 책임입니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        one_of(
            "general.log_level",
            &self.general.log_level,
            &["trace", "debug", "info", "warn", "error"],
        )?;
        one_of(
            "general.log_format",
            &self.general.log_format,
            &["json", "pretty"],
        )?;
        one_of(
            "pipeline.start_position",
            &self.pipeline.start_position,
            &["beginning", "end"],
        )?;
        one_of("sink.kind", &self.sink.kind, &["stdout", "file"])?;
        one_of(
            "sink.overflow_policy",
            &self.sink.overflow_policy,
            &["drop_oldest", "drop_newest", "block"],
        )?;

        positive("pipeline.poll_interval_ms", self.pipeline.poll_interval_ms)?;
        positive("pipeline.backoff_base_ms", self.pipeline.backoff_base_ms)?;
        positive("pipeline.channel_capacity", self.pipeline.channel_capacity as u64)?;
        positive("pipeline.shard_count", self.pipeline.shard_count as u64)?;
        if self.pipeline.backoff_cap_ms < self.pipeline.backoff_base_ms {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.backoff_cap_ms".to_owned(),
                reason: "must be >= pipeline.backoff_base_ms".to_owned(),
            });
        }

        positive(
            "detectors.history_window_secs",
            self.detectors.history_window_secs,
        )?;
        positive(
            "detectors.max_tracked_keys",
            self.detectors.max_tracked_keys as u64,
        )?;
        positive(
            "detectors.history_per_key",
            self.detectors.history_per_key as u64,
        )?;
        let rf = &self.detectors.repeated_failure;
        positive("detectors.repeated_failure.threshold", rf.threshold as u64)?;
        positive("detectors.repeated_failure.window_secs", rf.window_secs)?;
        if rf.window_secs > self.detectors.history_window_secs {
            return Err(ConfigError::InvalidValue {
                field: "detectors.repeated_failure.window_secs".to_owned(),
                reason: "must not exceed detectors.history_window_secs".to_owned(),
            });
        }
        positive(
            "detectors.privilege_escalation.failure_chain",
            self.detectors.privilege_escalation.failure_chain as u64,
        )?;

        positive("sink.buffer_capacity", self.sink.buffer_capacity as u64)?;
        positive("sink.delivery_timeout_ms", self.sink.delivery_timeout_ms)?;
        if self.sink.kind == "file" && self.sink.path.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidValue {
                field: "sink.path".to_owned(),
                reason: "path must be set when sink.kind is 'file'".to_owned(),
            });
        }

        for (name, source) in &self.log_sources {
            if let Some(source_type) = &source.source_type
                && source_type.is_empty()
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("log_sources.{name}.source_type"),
                    reason: "must not be empty".to_owned(),
                });
            }
        }

        Ok(())
    }

    /// 이름으로 소스를 해석합니다.
    ///
    /// 소스가 없거나 비활성화되면 [`ConfigError::SourceUnavailable`],
    /// 경로가 없으면 [`ConfigError::MissingPath`]를 반환합니다.
    pub fn source_spec(&self, name: &str) -> Result<SourceSpec, ConfigError> {
        let source = self
            .log_sources
            .get(name)
            .filter(|s| s.enabled)
            .ok_or_else(|| ConfigError::SourceUnavailable {
                source_name: name.to_owned(),
            })?;

        let path = source
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingPath {
                source_name: name.to_owned(),
            })?;

        Ok(SourceSpec {
            name: name.to_owned(),
            path: PathBuf::from(path),
            source_type: source.source_type_or(name).to_owned(),
        })
    }

    /// 필수 소스인지 확인합니다.
    pub fn is_required(&self, name: &str) -> bool {
        self.required_sources.iter().any(|r| r == name)
    }

    /// 활성화된 소스 이름 목록 (필수 소스 먼저, 나머지는 이름순)
    pub fn enabled_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .required_sources
            .iter()
            .filter(|name| self.log_sources.get(*name).is_some_and(|s| s.enabled))
            .cloned()
            .collect();
        for (name, source) in &self.log_sources {
            if source.enabled && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// 해석이 끝난 로그 소스
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// 설정상의 소스 이름
    pub name: String,
    /// 로그 파일 경로
    pub path: PathBuf,
    /// 파서 디스패치에 사용되는 source_type
    pub source_type: String,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 로그 소스 설정
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSourceConfig {
    /// 활성화 여부 (명시하지 않으면 비활성)
    pub enabled: bool,
    /// 로그 파일 경로
    pub path: Option<String>,
    /// 파서 source_type (없으면 소스 이름)
    pub source_type: Option<String>,
}

impl LogSourceConfig {
    /// source_type이 없으면 소스 이름을 사용합니다.
    pub fn source_type_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.source_type.as_deref().unwrap_or(name)
    }
}

/// 수집/파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// 유휴 소스 폴링 간격 (밀리초)
    pub poll_interval_ms: u64,
    /// 읽기 실패 재시도 백오프 기본값 (밀리초)
    pub backoff_base_ms: u64,
    /// 백오프 상한 (밀리초)
    pub backoff_cap_ms: u64,
    /// 최초 읽기 위치 (beginning, end)
    pub start_position: String,
    /// 단계 간 채널 용량
    pub channel_capacity: usize,
    /// 탐지기 샤드 수
    pub shard_count: usize,
    /// 프리플라이트 미리보기 라인 수
    pub preview_lines: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            backoff_base_ms: 100,
            backoff_cap_ms: 30_000,
            start_position: "end".to_owned(),
            channel_capacity: 1024,
            shard_count: 4,
            preview_lines: 5,
        }
    }
}

/// 탐지기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorsConfig {
    /// 키별 히스토리 보존 기간 (초)
    pub history_window_secs: u64,
    /// 키별 히스토리 최대 이벤트 수
    pub history_per_key: usize,
    /// 샤드당 추적 키 최대 수
    pub max_tracked_keys: usize,
    /// 반복 실패 탐지기
    pub repeated_failure: RepeatedFailureConfig,
    /// 권한 상승 탐지기
    pub privilege_escalation: PrivilegeEscalationConfig,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            history_window_secs: 600,
            history_per_key: 256,
            max_tracked_keys: 10_000,
            repeated_failure: RepeatedFailureConfig::default(),
            privilege_escalation: PrivilegeEscalationConfig::default(),
        }
    }
}

/// 반복 실패 탐지기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatedFailureConfig {
    pub enabled: bool,
    /// 결과를 생성하는 실패 횟수
    pub threshold: usize,
    /// 슬라이딩 윈도우 (초)
    pub window_secs: u64,
    /// 결과 생성 후 재경보 억제 기간 (초)
    pub cooldown_secs: u64,
}

impl Default for RepeatedFailureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5,
            window_secs: 300,
            cooldown_secs: 300,
        }
    }
}

/// 권한 상승 탐지기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivilegeEscalationConfig {
    pub enabled: bool,
    /// 성공 직전 연속 실패 횟수
    pub failure_chain: usize,
}

impl Default for PrivilegeEscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_chain: 3,
        }
    }
}

/// 싱크 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// 싱크 종류 (stdout, file)
    pub kind: String,
    /// file 싱크 경로
    pub path: Option<String>,
    /// 버퍼 용량
    pub buffer_capacity: usize,
    /// 버퍼 초과 정책 (drop_oldest, drop_newest, block)
    pub overflow_policy: String,
    /// 전달 1회 타임아웃 (밀리초)
    pub delivery_timeout_ms: u64,
    /// 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프 (밀리초)
    pub retry_backoff_ms: u64,
    /// 종료 시 플러시 데드라인 (밀리초)
    pub flush_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "stdout".to_owned(),
            path: None,
            buffer_capacity: 10_000,
            overflow_policy: "drop_oldest".to_owned(),
            delivery_timeout_ms: 2_000,
            max_retries: 3,
            retry_backoff_ms: 200,
            flush_timeout_ms: 5_000,
        }
    }
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ConfigError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_owned(),
            reason: format!("must be one of: {}", allowed.join(", ")),
        })
    }
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_owned(),
            reason: "must be greater than 0".to_owned(),
        });
    }
    Ok(())
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_opt_string(target: &mut Option<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = if val.is_empty() { None } else { Some(val) };
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
