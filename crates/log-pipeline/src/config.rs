//! 로그 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`SiemConfig`]를 기반으로 파이프라인이
//! 실제로 사용하는 값(해석된 소스 목록, `Duration`, 정책 열거형)을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use siemlite_core::config::SiemConfig;
//! use siemlite_log_pipeline::config::PipelineConfig;
//!
//! let core_config = SiemConfig::load("config/log_sources.yaml").await?;
//! let config = PipelineConfig::from_core(&core_config)?;
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use siemlite_core::config::{SiemConfig, SourceSpec};
use tracing::warn;

use crate::error::LogPipelineError;

/// 싱크 버퍼가 가득 찼을 때의 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// 가장 오래된 항목을 드롭 (기본값)
    #[default]
    DropOldest,
    /// 새 항목을 드롭 (유입 거부)
    DropNewest,
    /// 공간이 생길 때까지 생산자가 대기
    Block,
}

impl FromStr for OverflowPolicy {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "drop_oldest" => Ok(Self::DropOldest),
            "drop_newest" => Ok(Self::DropNewest),
            "block" => Ok(Self::Block),
            other => Err(LogPipelineError::Config {
                field: "sink.overflow_policy".to_owned(),
                reason: format!("unknown policy '{other}'"),
            }),
        }
    }
}

/// 소스를 처음 열 때의 읽기 위치
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// 파일 처음부터
    Beginning,
    /// 현재 파일 끝부터 (새 라인만)
    #[default]
    End,
}

impl FromStr for StartPosition {
    type Err = LogPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beginning" => Ok(Self::Beginning),
            "end" => Ok(Self::End),
            other => Err(LogPipelineError::Config {
                field: "pipeline.start_position".to_owned(),
                reason: format!("unknown position '{other}'"),
            }),
        }
    }
}

/// 기본 싱크 대상
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SinkTarget {
    /// 표준 출력에 JSON lines
    #[default]
    Stdout,
    /// 파일에 JSON lines (append)
    File(PathBuf),
}

/// 반복 실패 탐지 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedFailureSettings {
    pub threshold: usize,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for RepeatedFailureSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(300),
            cooldown: Duration::from_secs(300),
        }
    }
}

/// 권한 상승 탐지 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeEscalationSettings {
    /// 성공 직전 연속 실패 횟수
    pub failure_chain: usize,
}

impl Default for PrivilegeEscalationSettings {
    fn default() -> Self {
        Self { failure_chain: 3 }
    }
}

/// 탐지 단계 설정
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// 키별 히스토리 보존 기간
    pub history_window: Duration,
    /// 키별 히스토리 최대 이벤트 수
    pub history_per_key: usize,
    /// 샤드당 추적 키 최대 수
    pub max_tracked_keys: usize,
    /// `None`이면 비활성
    pub repeated_failure: Option<RepeatedFailureSettings>,
    /// `None`이면 비활성
    pub privilege_escalation: Option<PrivilegeEscalationSettings>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            history_window: Duration::from_secs(600),
            history_per_key: 256,
            max_tracked_keys: 10_000,
            repeated_failure: Some(RepeatedFailureSettings::default()),
            privilege_escalation: Some(PrivilegeEscalationSettings::default()),
        }
    }
}

/// 싱크 전달 설정
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub target: SinkTarget,
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// 전달 1회 타임아웃
    pub delivery_timeout: Duration,
    /// 첫 시도 이후 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프 기본값 (선형 증가)
    pub retry_backoff: Duration,
    /// 종료 시 플러시 데드라인
    pub flush_timeout: Duration,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            target: SinkTarget::Stdout,
            buffer_capacity: 10_000,
            overflow_policy: OverflowPolicy::DropOldest,
            delivery_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

/// 로그 파이프라인 설정
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 읽을 소스 (활성화되고 경로가 있는 것만)
    pub sources: Vec<SourceSpec>,
    /// 유휴 소스 폴링 간격
    pub poll_interval: Duration,
    /// 읽기 실패 재시도 백오프 기본값
    pub backoff_base: Duration,
    /// 백오프 상한
    pub backoff_cap: Duration,
    /// 최초 읽기 위치
    pub start_position: StartPosition,
    /// 단계 간 채널 용량
    pub channel_capacity: usize,
    /// 탐지기 샤드 수
    pub shard_count: usize,
    /// 탐지 설정
    pub detectors: DetectorSettings,
    /// 싱크 설정
    pub sink: SinkSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            poll_interval: Duration::from_millis(500),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(30),
            start_position: StartPosition::End,
            channel_capacity: 1024,
            shard_count: 4,
            detectors: DetectorSettings::default(),
            sink: SinkSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    ///
    /// 필수 소스를 해석할 수 없으면 에러입니다. 선택 소스의 경로가 없으면
    /// 경고 후 건너뜁니다.
    pub fn from_core(core: &SiemConfig) -> Result<Self, LogPipelineError> {
        let mut sources = Vec::new();
        for name in &core.required_sources {
            sources.push(core.source_spec(name)?);
        }
        for name in core.enabled_source_names() {
            if core.is_required(&name) {
                continue;
            }
            match core.source_spec(&name) {
                Ok(spec) => sources.push(spec),
                Err(e) => warn!(source = %name, error = %e, "skipping optional source"),
            }
        }

        let detectors = &core.detectors;
        let rf = &detectors.repeated_failure;
        let pe = &detectors.privilege_escalation;
        let sink = &core.sink;

        let target = match sink.kind.as_str() {
            "file" => SinkTarget::File(PathBuf::from(sink.path.clone().unwrap_or_default())),
            _ => SinkTarget::Stdout,
        };

        let config = Self {
            sources,
            poll_interval: Duration::from_millis(core.pipeline.poll_interval_ms),
            backoff_base: Duration::from_millis(core.pipeline.backoff_base_ms),
            backoff_cap: Duration::from_millis(core.pipeline.backoff_cap_ms),
            start_position: core.pipeline.start_position.parse()?,
            channel_capacity: core.pipeline.channel_capacity,
            shard_count: core.pipeline.shard_count,
            detectors: DetectorSettings {
                history_window: Duration::from_secs(detectors.history_window_secs),
                history_per_key: detectors.history_per_key,
                max_tracked_keys: detectors.max_tracked_keys,
                repeated_failure: rf.enabled.then(|| RepeatedFailureSettings {
                    threshold: rf.threshold,
                    window: Duration::from_secs(rf.window_secs),
                    cooldown: Duration::from_secs(rf.cooldown_secs),
                }),
                privilege_escalation: pe.enabled.then(|| PrivilegeEscalationSettings {
                    failure_chain: pe.failure_chain,
                }),
            },
            sink: SinkSettings {
                target,
                buffer_capacity: sink.buffer_capacity,
                overflow_policy: sink.overflow_policy.parse()?,
                delivery_timeout: Duration::from_millis(sink.delivery_timeout_ms),
                max_retries: sink.max_retries,
                retry_backoff: Duration::from_millis(sink.retry_backoff_ms),
                flush_timeout: Duration::from_millis(sink.flush_timeout_ms),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogPipelineError> {
        const MAX_SHARDS: usize = 256;
        const MAX_CHANNEL_CAPACITY: usize = 1_000_000;

        if self.shard_count == 0 || self.shard_count > MAX_SHARDS {
            return Err(LogPipelineError::Config {
                field: "shard_count".to_owned(),
                reason: format!("must be 1-{MAX_SHARDS}"),
            });
        }

        if self.channel_capacity == 0 || self.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(LogPipelineError::Config {
                field: "channel_capacity".to_owned(),
                reason: format!("must be 1-{MAX_CHANNEL_CAPACITY}"),
            });
        }

        if self.poll_interval.is_zero() {
            return Err(LogPipelineError::Config {
                field: "poll_interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.backoff_cap < self.backoff_base {
            return Err(LogPipelineError::Config {
                field: "backoff_cap".to_owned(),
                reason: "must be >= backoff_base".to_owned(),
            });
        }

        if self.sink.buffer_capacity == 0 {
            return Err(LogPipelineError::Config {
                field: "sink.buffer_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if let SinkTarget::File(path) = &self.sink.target
            && path.as_os_str().is_empty()
        {
            return Err(LogPipelineError::Config {
                field: "sink.path".to_owned(),
                reason: "file sink requires a path".to_owned(),
            });
        }

        if self.detectors.max_tracked_keys == 0 || self.detectors.history_per_key == 0 {
            return Err(LogPipelineError::Config {
                field: "detectors".to_owned(),
                reason: "max_tracked_keys and history_per_key must be greater than 0".to_owned(),
            });
        }

        if let Some(rf) = &self.detectors.repeated_failure {
            if rf.threshold == 0 {
                return Err(LogPipelineError::Config {
                    field: "repeated_failure.threshold".to_owned(),
                    reason: "must be greater than 0".to_owned(),
                });
            }
            if rf.window > self.detectors.history_window {
                return Err(LogPipelineError::Config {
                    field: "repeated_failure.window".to_owned(),
                    reason: "must not exceed history_window".to_owned(),
                });
            }
        }

        if let Some(pe) = &self.detectors.privilege_escalation
            && pe.failure_chain == 0
        {
            return Err(LogPipelineError::Config {
                field: "privilege_escalation.failure_chain".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(())
    }
}

/// 파이프라인 설정 빌더
///
/// 3개 이상의 설정 필드가 있으므로 빌더 패턴을 사용합니다.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 소스를 추가합니다.
    pub fn source(mut self, spec: SourceSpec) -> Self {
        self.config.sources.push(spec);
        self
    }

    /// 유휴 폴링 간격을 설정합니다.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// 읽기 실패 백오프(기본값, 상한)를 설정합니다.
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_cap = cap;
        self
    }

    /// 최초 읽기 위치를 설정합니다.
    pub fn start_position(mut self, position: StartPosition) -> Self {
        self.config.start_position = position;
        self
    }

    /// 채널 용량을 설정합니다.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// 탐지기 샤드 수를 설정합니다.
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// 히스토리 보존 기간을 설정합니다.
    pub fn history_window(mut self, window: Duration) -> Self {
        self.config.detectors.history_window = window;
        self
    }

    /// 샤드당 추적 키 상한을 설정합니다.
    pub fn max_tracked_keys(mut self, max: usize) -> Self {
        self.config.detectors.max_tracked_keys = max;
        self
    }

    /// 반복 실패 탐지를 설정합니다. `None`이면 비활성화합니다.
    pub fn repeated_failure(mut self, settings: Option<RepeatedFailureSettings>) -> Self {
        self.config.detectors.repeated_failure = settings;
        self
    }

    /// 권한 상승 탐지를 설정합니다. `None`이면 비활성화합니다.
    pub fn privilege_escalation(mut self, settings: Option<PrivilegeEscalationSettings>) -> Self {
        self.config.detectors.privilege_escalation = settings;
        self
    }

    /// 기본 싱크 대상을 설정합니다.
    pub fn sink_target(mut self, target: SinkTarget) -> Self {
        self.config.sink.target = target;
        self
    }

    /// 싱크 버퍼 용량을 설정합니다.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.sink.buffer_capacity = capacity;
        self
    }

    /// 버퍼 초과 정책을 설정합니다.
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.sink.overflow_policy = policy;
        self
    }

    /// 전달 타임아웃을 설정합니다.
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.sink.delivery_timeout = timeout;
        self
    }

    /// 재시도 횟수와 백오프를 설정합니다.
    pub fn retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.config.sink.max_retries = max_retries;
        self.config.sink.retry_backoff = backoff;
        self
    }

    /// 종료 플러시 데드라인을 설정합니다.
    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.sink.flush_timeout = timeout;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, LogPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
