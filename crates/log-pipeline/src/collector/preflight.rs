//! 프리플라이트 -- 파싱 전에 로그 소스를 검증합니다.
//!
//! 파일이 존재하는지, 일반 파일인지, 현재 프로세스가 읽을 수 있는지 확인하고
//! 크기를 보고합니다. 비어 있지 않으면 처음 몇 라인을 미리 보여줍니다.
//!
//! 필수 소스의 실패는 치명적([`Diagnostic::Fatal`])이며 검사를 즉시 중단합니다.
//! 선택 소스의 실패는 경고([`Diagnostic::Warn`])로 기록하고 계속합니다.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use siemlite_core::config::SiemConfig;
use siemlite_core::error::SourceAccessError;

/// 기본 미리보기 라인 수
pub const DEFAULT_PREVIEW_LINES: usize = 5;

/// 프리플라이트 진단 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "level", content = "message", rename_all = "lowercase")]
pub enum Diagnostic {
    /// 정보성 확인
    Info(String),
    /// 선택 소스의 문제 (계속 진행)
    Warn(String),
    /// 프로세스를 종료시키는 문제
    Fatal(String),
    /// 미리보기 라인
    Preview(String),
}

impl Diagnostic {
    /// 치명적 진단인지 확인합니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// 메시지 본문
    pub fn message(&self) -> &str {
        match self {
            Self::Info(m) | Self::Warn(m) | Self::Fatal(m) | Self::Preview(m) => m,
        }
    }
}

/// 검증을 통과한 소스 정보
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    /// 소스 이름
    pub name: String,
    /// 파일 경로
    pub path: PathBuf,
    /// source_type
    pub source_type: String,
    /// 파일 크기 (바이트)
    pub size: u64,
    /// 처음 N개 라인 (손실 허용 UTF-8)
    pub preview: Vec<String>,
}

/// 프리플라이트 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    /// 발생 순서대로의 진단
    pub diagnostics: Vec<Diagnostic>,
    /// 통과한 소스
    pub sources: Vec<SourceReport>,
}

impl PreflightReport {
    /// 치명적 진단이 없으면 `true`
    pub fn passed(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_fatal)
    }

    /// 첫 번째 치명적 메시지
    pub fn fatal(&self) -> Option<&str> {
        self.diagnostics
            .iter()
            .find(|d| d.is_fatal())
            .map(Diagnostic::message)
    }

    fn info(&mut self, message: String) {
        info!(check = "preflight", "{message}");
        self.diagnostics.push(Diagnostic::Info(message));
    }

    fn warn(&mut self, message: String) {
        warn!(check = "preflight", "{message}");
        self.diagnostics.push(Diagnostic::Warn(message));
    }

    fn fatal_msg(&mut self, message: String) {
        error!(check = "preflight", "{message}");
        self.diagnostics.push(Diagnostic::Fatal(message));
    }
}

/// 프리플라이트 옵션
#[derive(Debug, Clone)]
pub struct PreflightOptions {
    /// 지정하면 이 소스 하나만 (필수로) 검사합니다.
    pub only: Option<String>,
    /// 미리보기 라인 수
    pub preview_lines: usize,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            only: None,
            preview_lines: DEFAULT_PREVIEW_LINES,
        }
    }
}

/// 경로가 읽을 수 있는 일반 파일인지 확인하고 크기를 반환합니다.
pub async fn verify_source(path: &Path) -> Result<u64, SourceAccessError> {
    let display = path.display().to_string();

    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceAccessError::NotFound {
                path: display.clone(),
            }
        } else {
            SourceAccessError::Unreadable {
                path: display.clone(),
                reason: e.to_string(),
            }
        }
    })?;

    if !metadata.is_file() {
        return Err(SourceAccessError::NotAFile { path: display });
    }

    // 권한 비트 대신 실제로 열어 봅니다.
    tokio::fs::File::open(path)
        .await
        .map_err(|e| SourceAccessError::Unreadable {
            path: display,
            reason: e.to_string(),
        })?;

    Ok(metadata.len())
}

/// 파일의 처음 `lines`개 라인을 읽습니다.
///
/// 잘못된 UTF-8은 대체 문자로 바뀌고 라인 종결자는 제거됩니다.
pub async fn preview(path: &Path, lines: usize) -> Result<Vec<String>, SourceAccessError> {
    let read_failed = |e: std::io::Error| SourceAccessError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let file = tokio::fs::File::open(path).await.map_err(read_failed)?;
    let mut reader = BufReader::new(file);
    let mut out = Vec::with_capacity(lines);
    let mut buf = Vec::new();

    while out.len() < lines {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await.map_err(read_failed)?;
        if n == 0 {
            break;
        }
        out.push(String::from_utf8_lossy(strip_terminator(&buf)).into_owned());
    }
    Ok(out)
}

/// 라인 끝의 `\n` 또는 `\r\n`을 제거합니다.
pub(crate) fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// 설정된 소스에 대해 프리플라이트를 실행합니다.
pub async fn run_preflight(config: &SiemConfig, options: &PreflightOptions) -> PreflightReport {
    let mut report = PreflightReport::default();

    let targets: Vec<(String, bool)> = match &options.only {
        Some(name) => vec![(name.clone(), true)],
        None => {
            let mut targets: Vec<(String, bool)> = config
                .required_sources
                .iter()
                .map(|name| (name.clone(), true))
                .collect();
            for name in config.enabled_source_names() {
                if !config.is_required(&name) {
                    targets.push((name, false));
                }
            }
            targets
        }
    };

    if targets.is_empty() {
        report.warn("no log sources are required or enabled".to_owned());
        return report;
    }

    for (name, required) in targets {
        if !check_source(config, &name, required, options.preview_lines, &mut report).await {
            return report;
        }
    }

    report.info("Preflight completed successfully".to_owned());
    report
}

/// 소스 하나를 검사합니다. 치명적 실패면 `false`를 반환합니다.
async fn check_source(
    config: &SiemConfig,
    name: &str,
    required: bool,
    preview_lines: usize,
    report: &mut PreflightReport,
) -> bool {
    let fail = |report: &mut PreflightReport, message: String| {
        if required {
            report.fatal_msg(message);
            false
        } else {
            report.warn(format!("{message} (optional source skipped)"));
            true
        }
    };

    report.info(format!("Starting {name} access verification"));

    let spec = match config.source_spec(name) {
        Ok(spec) => spec,
        Err(e) => return fail(report, e.to_string()),
    };

    report.info(format!("Verifying log file path: {}", spec.path.display()));
    let size = match verify_source(&spec.path).await {
        Ok(size) => size,
        Err(e) => return fail(report, e.to_string()),
    };

    report.info(format!("Log file size: {size} bytes"));
    let mut lines = Vec::new();
    if size == 0 {
        report.info("Log file is empty (this may be normal for a baseline system)".to_owned());
    } else {
        report.info("Log file contains data".to_owned());
        if preview_lines > 0 {
            report.info(format!("Previewing first {preview_lines} lines of log file"));
            match preview(&spec.path, preview_lines).await {
                Ok(preview) => {
                    for line in &preview {
                        report.diagnostics.push(Diagnostic::Preview(line.clone()));
                    }
                    lines = preview;
                }
                Err(e) => return fail(report, e.to_string()),
            }
        }
    }

    report.info(format!("{name} verification completed successfully"));
    report.sources.push(SourceReport {
        name: spec.name,
        path: spec.path,
        source_type: spec.source_type,
        size,
        preview: lines,
    });
    true
}
