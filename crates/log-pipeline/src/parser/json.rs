//! JSON 이벤트 파서
//!
//! 한 줄에 하나의 평탄(flat) JSON 객체를 받아 이벤트 초안으로 변환합니다.
//! 액션 태그는 [`ActionTable`]을 통해 해석되므로 외부 도구의 별칭 태그도
//! 등록만 하면 사용할 수 있습니다.
//!
//! # 인식하는 키
//! - 필수: `event_time`(또는 `timestamp`), `category`, `type`, `outcome`(또는 `result`)
//! - 선택: `reason`, `user`, `uid`, `target_user`, `resource`, `host`, `program`,
//!   `pid`, `src_ip`, `src_port`, `protocol`, `escalated`
//!
//! `event_time`은 RFC 3339 문자열 또는 Unix 타임스탬프(초/밀리초)를 허용합니다.
//!
//! # 사용 예시
//! ```ignore
//! let parser = JsonEventParser::new(Arc::new(ActionTable::builtin()));
//! let line = r#"{"event_time":"2024-01-15T12:00:00Z","category":"authentication","type":"login","outcome":"failure","user":"alice","host":"web-01"}"#;
//! let draft = parser.parse(line, &factory)?;
//! ```

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use siemlite_core::error::ParseError;
use siemlite_core::event::OutcomeResult;
use siemlite_core::{ActionTable, EventDraft, EventFactory, EventParser};

/// 파서가 처리하는 source_type
pub const SOURCE_TYPE: &str = "json";

/// 파서 버전
pub const PARSER_VERSION: &str = "json-v1";

/// 기본 최대 입력 크기 (1MB)
const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;

/// JSON 이벤트 파서
pub struct JsonEventParser {
    /// 액션 태그 테이블
    table: Arc<ActionTable>,
    /// 최대 허용 입력 크기 (바이트)
    max_input_size: usize,
}

impl JsonEventParser {
    /// 주어진 액션 테이블로 파서를 생성합니다.
    pub fn new(table: Arc<ActionTable>) -> Self {
        Self {
            table,
            max_input_size: DEFAULT_MAX_INPUT_SIZE,
        }
    }

    /// 최대 입력 크기를 설정합니다.
    pub fn with_max_input_size(mut self, size: usize) -> Self {
        self.max_input_size = size;
        self
    }

    fn missing(field: &'static str, line: &str) -> ParseError {
        ParseError::MissingField {
            parser: PARSER_VERSION.to_owned(),
            field,
            raw: line.to_owned(),
        }
    }

    fn invalid(field: &'static str, reason: impl Into<String>, line: &str) -> ParseError {
        ParseError::InvalidField {
            parser: PARSER_VERSION.to_owned(),
            field,
            reason: reason.into(),
            raw: line.to_owned(),
        }
    }
}

impl EventParser for JsonEventParser {
    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn parser_version(&self) -> &str {
        PARSER_VERSION
    }

    fn parse(&self, line: &str, factory: &EventFactory) -> Result<EventDraft, ParseError> {
        if line.len() > self.max_input_size {
            return Err(Self::invalid(
                "raw.message",
                format!(
                    "input too large: {} bytes (max: {})",
                    line.len(),
                    self.max_input_size
                ),
                line,
            ));
        }

        let value: Value = serde_json::from_str(line).map_err(|_| ParseError::Unrecognized {
            parser: PARSER_VERSION.to_owned(),
            raw: line.to_owned(),
        })?;
        // 최상위가 JSON 객체여야 합니다
        let Some(obj) = value.as_object() else {
            return Err(ParseError::Unrecognized {
                parser: PARSER_VERSION.to_owned(),
                raw: line.to_owned(),
            });
        };

        let time_value = obj
            .get("event_time")
            .or_else(|| obj.get("timestamp"))
            .filter(|v| !v.is_null())
            .ok_or_else(|| Self::missing("metadata.event_time", line))?;
        let event_time = parse_time(time_value)
            .ok_or_else(|| Self::invalid("metadata.event_time", time_value.to_string(), line))?;

        let category =
            string(obj, "category").ok_or_else(|| Self::missing("action.category", line))?;
        let kind = string(obj, "type").ok_or_else(|| Self::missing("action.type", line))?;
        let action = self
            .table
            .resolve(&category, &kind)
            .map_err(|e| Self::invalid("action.type", e.to_string(), line))?;

        let outcome = string(obj, "outcome")
            .or_else(|| string(obj, "result"))
            .ok_or_else(|| Self::missing("outcome.result", line))?;
        let result = OutcomeResult::from_tag(&outcome.to_ascii_lowercase()).ok_or_else(|| {
            Self::invalid(
                "outcome.result",
                format!("expected 'success' or 'failure', got '{outcome}'"),
                line,
            )
        })?;

        let mut draft = factory.skeleton(SOURCE_TYPE, line);
        draft.metadata.event_time = Some(event_time);
        draft.metadata.parser_version = Some(PARSER_VERSION.to_owned());
        draft.action.set(action);
        draft.outcome.result = Some(result);
        draft.outcome.reason = string(obj, "reason");

        draft.source.host = string(obj, "host");
        draft.source.program = string(obj, "program");
        draft.source.pid = number(obj, "pid");
        draft.actor.user = string(obj, "user");
        draft.actor.uid = number(obj, "uid");
        draft.target.user = string(obj, "target_user");
        draft.target.resource = string(obj, "resource");
        draft.network.src_ip = string(obj, "src_ip").and_then(|ip| ip.parse::<IpAddr>().ok());
        draft.network.src_port = number(obj, "src_port");
        draft.network.protocol = string(obj, "protocol");
        draft.privilege.escalated = obj.get("escalated").and_then(Value::as_bool);
        draft.privilege.target_user = string(obj, "target_user");

        Ok(draft)
    }
}

impl std::fmt::Debug for JsonEventParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonEventParser")
            .field("actions", &self.table.len())
            .field("max_input_size", &self.max_input_size)
            .finish()
    }
}

/// 문자열/숫자/불리언 값을 문자열로 추출합니다. 빈 문자열은 없는 것으로 봅니다.
fn string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 숫자 또는 숫자 문자열을 추출합니다.
fn number<T: TryFrom<u64> + std::str::FromStr>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    match obj.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| T::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// 타임스탬프 값을 해석합니다.
///
/// - RFC 3339: `2024-01-15T12:00:00Z`
/// - Unix 초: `1705320000`
/// - Unix 밀리초: `1705320000000`
fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    let secs_or_millis = match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            s.parse::<i64>().ok()?
        }
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };

    // 10자리 = 초, 13자리 = 밀리초
    if secs_or_millis > 9_999_999_999 {
        Utc.timestamp_millis_opt(secs_or_millis).single()
    } else {
        Utc.timestamp_opt(secs_or_millis, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siemlite_core::clock::{ManualClock, SequentialIds};
    use siemlite_core::{ActionCategory, ActionType};

    fn factory() -> EventFactory {
        EventFactory::new(
            Arc::new(ManualClock::new(
                Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap(),
            )),
            Arc::new(SequentialIds::new("json")),
        )
    }

    fn parser() -> JsonEventParser {
        JsonEventParser::new(Arc::new(ActionTable::builtin()))
    }

    #[test]
    fn parses_flat_object() {
        let line = r#"{"event_time":"2024-01-15T12:00:00Z","category":"authentication","type":"login","outcome":"failure","reason":"bad password","user":"alice","host":"web-01","src_ip":"203.0.113.7","src_port":2222,"pid":"311"}"#;
        let draft = parser().parse(line, &factory()).unwrap();

        assert_eq!(draft.metadata.event_id, "json-1");
        assert_eq!(
            draft.metadata.event_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap())
        );
        assert_eq!(
            draft.metadata.ingest_time,
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap()
        );
        assert_eq!(draft.metadata.parser_version.as_deref(), Some("json-v1"));
        assert_eq!(draft.action.category, Some(ActionCategory::Authentication));
        assert_eq!(draft.action.kind, Some(ActionType::Login));
        assert_eq!(draft.outcome.result, Some(OutcomeResult::Failure));
        assert_eq!(draft.outcome.reason.as_deref(), Some("bad password"));
        assert_eq!(draft.actor.user.as_deref(), Some("alice"));
        assert_eq!(draft.source.host.as_deref(), Some("web-01"));
        assert_eq!(draft.source.pid, Some(311));
        assert_eq!(draft.network.src_port, Some(2222));
        assert_eq!(draft.raw.message.as_deref(), Some(line));
    }

    #[test]
    fn alias_tags_resolve_through_table() {
        let mut table = ActionTable::builtin();
        table
            .register("auth", "ssh_login", ActionType::Login)
            .unwrap();
        let parser = JsonEventParser::new(Arc::new(table));

        let line = r#"{"timestamp":1705320000,"category":"auth","type":"ssh_login","result":"SUCCESS"}"#;
        let draft = parser.parse(line, &factory()).unwrap();
        assert_eq!(draft.action.kind, Some(ActionType::Login));
        assert_eq!(draft.action.category, Some(ActionCategory::Authentication));
        assert_eq!(draft.outcome.result, Some(OutcomeResult::Success));
        assert_eq!(
            draft.metadata.event_time,
            Some(Utc.timestamp_opt(1_705_320_000, 0).unwrap())
        );
    }

    #[test]
    fn millisecond_timestamps() {
        let line = r#"{"timestamp":"1705320000123","category":"authorization","type":"sudo","outcome":"success","escalated":true}"#;
        let draft = parser().parse(line, &factory()).unwrap();
        assert_eq!(
            draft.metadata.event_time,
            Some(Utc.timestamp_millis_opt(1_705_320_000_123).unwrap())
        );
        assert_eq!(draft.privilege.escalated, Some(true));
    }

    #[test]
    fn missing_required_keys() {
        let cases = [
            (r#"{"category":"authentication","type":"login","outcome":"success"}"#, "metadata.event_time"),
            (r#"{"event_time":"2024-01-15T12:00:00Z","type":"login","outcome":"success"}"#, "action.category"),
            (r#"{"event_time":"2024-01-15T12:00:00Z","category":"authentication","outcome":"success"}"#, "action.type"),
            (r#"{"event_time":"2024-01-15T12:00:00Z","category":"authentication","type":"login"}"#, "outcome.result"),
        ];
        for (line, expected) in cases {
            let err = parser().parse(line, &factory()).unwrap_err();
            assert!(
                matches!(err, ParseError::MissingField { field, .. } if field == expected),
                "{line}: {err:?}"
            );
            assert_eq!(err.raw(), line);
        }
    }

    #[test]
    fn invalid_values() {
        let bad_outcome = r#"{"event_time":"2024-01-15T12:00:00Z","category":"authentication","type":"login","outcome":"unknown"}"#;
        assert!(matches!(
            parser().parse(bad_outcome, &factory()).unwrap_err(),
            ParseError::InvalidField { field: "outcome.result", .. }
        ));

        let mismatched = r#"{"event_time":"2024-01-15T12:00:00Z","category":"account","type":"login","outcome":"success"}"#;
        assert!(matches!(
            parser().parse(mismatched, &factory()).unwrap_err(),
            ParseError::InvalidField { field: "action.type", .. }
        ));

        let bad_time = r#"{"event_time":"yesterday","category":"authentication","type":"login","outcome":"success"}"#;
        assert!(matches!(
            parser().parse(bad_time, &factory()).unwrap_err(),
            ParseError::InvalidField { field: "metadata.event_time", .. }
        ));
    }

    #[test]
    fn non_object_input_is_unrecognized() {
        for line in ["not json", "[1,2,3]", "\"string\"", ""] {
            let err = parser().parse(line, &factory()).unwrap_err();
            assert!(matches!(err, ParseError::Unrecognized { .. }), "{line}");
        }
    }

    #[test]
    fn oversized_input_is_rejected() {
        let parser = parser().with_max_input_size(16);
        let line = r#"{"event_time":"2024-01-15T12:00:00Z"}"#;
        assert!(parser.parse(line, &factory()).is_err());
    }
}
