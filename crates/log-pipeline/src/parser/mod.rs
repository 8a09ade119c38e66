//! 로그 파싱 모듈 -- source_type별 파서와 레지스트리
//!
//! [`ParserRegistry`]는 source_type 문자열을 정확히 일치하는 파서 하나에
//! 매핑합니다. 각 파서는 core의 [`EventParser`] trait을 구현하며,
//! 공유 [`EventFactory`]가 만든 스켈레톤을 채워 [`EventDraft`]를 반환합니다.
//!
//! # 내장 파서
//! - `auth_log` ([`AuthLogParser`], `authlog-v1`): `/var/log/auth.log` BSD syslog 라인
//! - `json` ([`JsonEventParser`], `json-v1`): 한 줄에 하나의 평탄 JSON 객체
//!
//! # 사용 예시
//! ```ignore
//! use siemlite_log_pipeline::parser::ParserRegistry;
//! use siemlite_core::{ActionTable, EventFactory};
//!
//! let registry = ParserRegistry::with_defaults(ActionTable::builtin())?;
//! let factory = EventFactory::system();
//! let draft = registry.parse("auth_log", line, &factory)?;
//! ```

pub mod auth_log;
pub mod json;

pub use auth_log::AuthLogParser;
pub use json::JsonEventParser;

use std::collections::HashMap;
use std::sync::Arc;

use siemlite_core::error::ParseError;
use siemlite_core::{ActionTable, EventDraft, EventFactory, EventParser};

use crate::error::LogPipelineError;

/// 파서 레지스트리
///
/// 디스패치는 정확한 source_type 일치로만 이루어지며, 형식 자동 감지는 하지 않습니다.
pub struct ParserRegistry {
    parsers: HashMap<String, Box<dyn EventParser>>,
}

impl ParserRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// 내장 파서(`auth_log`, `json`)가 등록된 레지스트리를 생성합니다.
    pub fn with_defaults(table: ActionTable) -> Result<Self, LogPipelineError> {
        let mut registry = Self::new();
        registry.register(Box::new(AuthLogParser::new()?))?;
        registry.register(Box::new(JsonEventParser::new(Arc::new(table))))?;
        Ok(registry)
    }

    /// 파서를 등록합니다.
    ///
    /// 같은 source_type에 이미 파서가 있으면 기존 파서를 유지하고 에러를 반환합니다.
    pub fn register(&mut self, parser: Box<dyn EventParser>) -> Result<(), LogPipelineError> {
        let source_type = parser.source_type().to_owned();
        if self.parsers.contains_key(&source_type) {
            return Err(LogPipelineError::DuplicateParser(source_type));
        }
        tracing::debug!(
            source_type = %source_type,
            parser_version = parser.parser_version(),
            "registered parser"
        );
        self.parsers.insert(source_type, parser);
        Ok(())
    }

    /// 라인 하나를 source_type에 맞는 파서로 파싱합니다.
    pub fn parse(
        &self,
        source_type: &str,
        line: &str,
        factory: &EventFactory,
    ) -> Result<EventDraft, ParseError> {
        let Some(parser) = self.parsers.get(source_type) else {
            return Err(ParseError::UnknownSourceType {
                source_type: source_type.to_owned(),
                raw: line.to_owned(),
            });
        };
        parser.parse(line, factory)
    }

    /// 해당 source_type의 파서가 등록되어 있는지 확인합니다.
    pub fn contains(&self, source_type: &str) -> bool {
        self.parsers.contains_key(source_type)
    }

    /// 등록된 source_type 목록 (정렬됨)
    pub fn source_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// 등록된 파서 수
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// 레지스트리가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("source_types", &self.source_types())
            .finish()
    }
}
