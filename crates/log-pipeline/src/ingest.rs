//! 라인 처리 -- 파싱과 검증을 하나의 단계로 묶습니다.
//!
//! 소스 워커와 `replay` 경로가 같은 [`LineProcessor`]를 공유하므로
//! 파싱 실패와 검증 실패는 어느 경로에서든 동일하게 분리 집계됩니다.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use siemlite_core::error::{ParseError, ValidationError};
use siemlite_core::metrics as names;
use siemlite_core::{EventFactory, EventRecord, Validator};

use crate::collector::RawLine;
use crate::parser::ParserRegistry;
use crate::stats::PipelineStats;

/// 라인이 이벤트가 되지 못한 이유
#[derive(Debug, Clone, thiserror::Error)]
pub enum LineRejection {
    /// 파서가 라인을 해석하지 못함
    #[error("parse failure: {0}")]
    Parse(#[from] ParseError),

    /// 초안이 스키마 검증을 통과하지 못함
    #[error("validation failure: {error}")]
    Invalid {
        /// 검증 에러
        error: ValidationError,
        /// 원시 라인
        raw: String,
    },
}

impl LineRejection {
    /// 원시 라인
    pub fn raw(&self) -> &str {
        match self {
            Self::Parse(e) => e.raw(),
            Self::Invalid { raw, .. } => raw,
        }
    }
}

/// 파서 레지스트리 + 검증기
#[derive(Debug, Clone)]
pub struct LineProcessor {
    registry: Arc<ParserRegistry>,
    factory: EventFactory,
    stats: Arc<PipelineStats>,
}

impl LineProcessor {
    /// 새 라인 처리기를 생성합니다.
    pub fn new(
        registry: Arc<ParserRegistry>,
        factory: EventFactory,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            registry,
            factory,
            stats,
        }
    }

    /// 수집된 라인을 처리합니다.
    pub fn process(&self, line: &RawLine) -> Result<EventRecord, LineRejection> {
        self.process_bytes(&line.source, &line.source_type, &line.data)
    }

    /// 바이트 라인 하나를 처리합니다.
    ///
    /// `raw.message`는 원본과 같아야 하므로 UTF-8이 아닌 라인은 대체 문자로
    /// 바꾸지 않고 [`ParseError::InvalidEncoding`]으로 거부합니다.
    pub fn process_bytes(
        &self,
        source: &str,
        source_type: &str,
        line: &[u8],
    ) -> Result<EventRecord, LineRejection> {
        match std::str::from_utf8(line) {
            Ok(text) => self.process_str(source, source_type, text),
            Err(e) => Err(self.parse_failed(
                source,
                source_type,
                ParseError::InvalidEncoding {
                    valid_up_to: e.valid_up_to(),
                    raw: String::from_utf8_lossy(line).into_owned(),
                },
            )),
        }
    }

    /// 문자열 라인 하나를 파싱하고 검증합니다.
    ///
    /// 실패는 카운터에 기록되고 원시 라인과 함께 로그로 남습니다.
    pub fn process_str(
        &self,
        source: &str,
        source_type: &str,
        line: &str,
    ) -> Result<EventRecord, LineRejection> {
        let draft = match self.registry.parse(source_type, line, &self.factory) {
            Ok(draft) => draft,
            Err(e) => return Err(self.parse_failed(source, source_type, e)),
        };

        match Validator::validate(&draft) {
            Ok(record) => {
                self.stats.add_events_accepted(1);
                counter!(names::EVENTS_ACCEPTED_TOTAL, names::LABEL_SOURCE_TYPE => source_type.to_owned())
                    .increment(1);
                debug!(source, event_id = record.event_id(), "event accepted");
                Ok(record)
            }
            Err(error) => {
                self.stats.add_validation_failures(1);
                counter!(names::VALIDATION_FAILURES_TOTAL, names::LABEL_SOURCE_TYPE => source_type.to_owned())
                    .increment(1);
                warn!(source, source_type, error = %error, raw = line, "validation failure");
                Err(LineRejection::Invalid {
                    error,
                    raw: line.to_owned(),
                })
            }
        }
    }

    fn parse_failed(&self, source: &str, source_type: &str, e: ParseError) -> LineRejection {
        self.stats.add_parse_failures(1);
        counter!(names::PARSE_FAILURES_TOTAL, names::LABEL_SOURCE_TYPE => source_type.to_owned())
            .increment(1);
        warn!(source, source_type, error = %e, raw = e.raw(), "parse failure");
        e.into()
    }

    /// 공유 이벤트 팩토리
    pub fn factory(&self) -> &EventFactory {
        &self.factory
    }

    /// 공유 통계
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siemlite_core::{ActionTable, EventDraft, EventParser};

    /// 항상 outcome 없는 초안을 만드는 파서
    struct NoOutcomeParser;

    impl EventParser for NoOutcomeParser {
        fn source_type(&self) -> &str {
            "broken"
        }

        fn parser_version(&self) -> &str {
            "broken-v0"
        }

        fn parse(&self, line: &str, factory: &EventFactory) -> Result<EventDraft, ParseError> {
            let mut draft = factory.skeleton("broken", line);
            draft.metadata.event_time = Some(factory.now());
            draft.metadata.parser_version = Some("broken-v0".to_owned());
            draft.action.set(siemlite_core::ActionType::Login);
            Ok(draft)
        }
    }

    fn processor() -> LineProcessor {
        let mut registry = ParserRegistry::with_defaults(ActionTable::builtin()).unwrap();
        registry.register(Box::new(NoOutcomeParser)).unwrap();
        LineProcessor::new(
            Arc::new(registry),
            EventFactory::system(),
            Arc::new(PipelineStats::new()),
        )
    }

    #[test]
    fn accepted_line_becomes_record() {
        let processor = processor();
        let line = "Mar  9 08:15:01 web-01 sshd[1]: Failed password for alice from 10.0.0.1 port 22 ssh2";
        let record = processor.process_str("auth_log", "auth_log", line).unwrap();
        assert_eq!(record.raw().message, line);
        assert_eq!(processor.stats().snapshot().events_accepted, 1);
    }

    #[test]
    fn parse_and_validation_failures_are_counted_separately() {
        let processor = processor();

        let err = processor
            .process_str("auth_log", "auth_log", "garbage")
            .unwrap_err();
        assert!(matches!(err, LineRejection::Parse(_)));
        assert_eq!(err.raw(), "garbage");

        let err = processor
            .process_str("custom", "broken", "anything")
            .unwrap_err();
        assert!(matches!(
            err,
            LineRejection::Invalid {
                error: ValidationError::InvalidOutcome(ref got),
                ..
            } if got == "null"
        ));
        assert_eq!(err.raw(), "anything");

        let snap = processor.stats().snapshot();
        assert_eq!(snap.parse_failures, 1);
        assert_eq!(snap.validation_failures, 1);
        assert_eq!(snap.events_accepted, 0);
    }

    #[test]
    fn non_utf8_line_is_a_parse_failure() {
        let processor = processor();
        let line: &[u8] =
            b"Mar  9 08:15:01 web-01 sshd[1]: Failed password for al\xffice from 10.0.0.1 port 22 ssh2";
        let raw = RawLine::new(bytes::Bytes::from_static(line), "auth_log", "auth_log");

        let err = processor.process(&raw).unwrap_err();
        let offset = line.iter().position(|b| *b == 0xff).unwrap();
        assert!(matches!(
            err,
            LineRejection::Parse(ParseError::InvalidEncoding { valid_up_to, .. })
                if valid_up_to == offset
        ));
        // 로그용 사본만 손실 변환됨
        assert!(err.raw().contains("al\u{FFFD}ice"));

        let snap = processor.stats().snapshot();
        assert_eq!(snap.parse_failures, 1);
        assert_eq!(snap.validation_failures, 0);
        assert_eq!(snap.events_accepted, 0);
    }

    #[test]
    fn accepted_bytes_are_kept_verbatim() {
        let processor = processor();
        let line = "Mar  9 08:15:01 web-01 sshd[1]: Failed password for alice from 10.0.0.1 port 22 ssh2";
        let raw = RawLine::new(bytes::Bytes::from(line.as_bytes().to_vec()), "auth_log", "auth_log");
        let record = processor.process(&raw).unwrap();
        assert_eq!(record.raw().message.as_bytes(), line.as_bytes());
    }
}
