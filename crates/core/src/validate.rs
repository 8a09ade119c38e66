//! 스키마 검증기 -- 초안을 불변 레코드로 고정합니다.
//!
//! 검증은 순수하게 구조적입니다. 사용자명이 그럴듯한지 같은 의미 검사는
//! 하지 않으며, 필수 필드 하나라도 빠지면 레코드 전체를 거부합니다.
//!
//! # 검사 순서
//! 1. 아홉 개 최상위 섹션 존재 ([`validate_value`](Validator::validate_value)만 해당)
//! 2. `metadata.event_time`
//! 3. `action.category`, `action.type`
//! 4. `outcome.result` ∈ {success, failure}
//! 5. `raw.message` (비어 있지 않음)
//! 6. 타입-카테고리 일치, `source_type`, `parser_version`, `event_id`

use serde_json::Value;

use crate::action::{ActionCategory, ActionType};
use crate::error::ValidationError;
use crate::event::{
    Action, EventDraft, EventRecord, Outcome, OutcomeResult, RawMessage, RecordMetadata, SECTIONS,
};

/// 이벤트 스키마 검증기
///
/// 상태가 없으며, 같은 입력에 대해 항상 같은 결과를 반환합니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// 파서가 채운 초안을 검증하고 불변 레코드를 생성합니다.
    pub fn validate(draft: &EventDraft) -> Result<EventRecord, ValidationError> {
        let event_time = draft
            .metadata
            .event_time
            .ok_or(ValidationError::MissingField("metadata.event_time"))?;

        let category = draft
            .action
            .category
            .ok_or(ValidationError::MissingField("action.category"))?;
        let kind = draft
            .action
            .kind
            .ok_or(ValidationError::MissingField("action.type"))?;

        let result = draft
            .outcome
            .result
            .ok_or_else(|| ValidationError::InvalidOutcome("null".to_owned()))?;

        let message = match draft.raw.message.as_deref() {
            Some(message) if !message.is_empty() => message.to_owned(),
            _ => return Err(ValidationError::MissingField("raw.message")),
        };

        if kind.category() != category {
            return Err(ValidationError::ActionScope {
                category: category.to_string(),
                kind: kind.to_string(),
            });
        }

        let source_type = non_empty(draft.metadata.source_type.as_deref())
            .ok_or(ValidationError::MissingField("metadata.source_type"))?;
        let parser_version = non_empty(draft.metadata.parser_version.as_deref())
            .ok_or(ValidationError::MissingField("metadata.parser_version"))?;
        if draft.metadata.event_id.is_empty() {
            return Err(ValidationError::MissingField("metadata.event_id"));
        }

        Ok(EventRecord::from_parts(
            RecordMetadata {
                event_id: draft.metadata.event_id.clone(),
                event_time,
                ingest_time: draft.metadata.ingest_time,
                source_type: source_type.to_owned(),
                parser_version: parser_version.to_owned(),
            },
            draft.source.clone(),
            draft.actor.clone(),
            draft.target.clone(),
            Action { category, kind },
            Outcome {
                result,
                reason: draft.outcome.reason.clone(),
            },
            draft.network.clone(),
            draft.privilege.clone(),
            RawMessage { message },
        ))
    }

    /// 와이어 형식(JSON 문서)의 레코드를 검증합니다.
    ///
    /// 외부에서 전달된 레코드에 사용합니다. 섹션 존재 여부와 필수 필드를
    /// 문서 수준에서 먼저 확인한 뒤, 타입이 지정된 초안으로 변환하여
    /// [`validate`](Self::validate)와 같은 규칙을 적용합니다.
    pub fn validate_value(value: &Value) -> Result<EventRecord, ValidationError> {
        let object = value
            .as_object()
            .ok_or_else(|| ValidationError::Malformed("record must be a JSON object".to_owned()))?;

        for section in SECTIONS {
            match object.get(section) {
                None | Some(Value::Null) => return Err(ValidationError::MissingSection(section)),
                Some(Value::Object(_)) => {}
                Some(_) => {
                    return Err(ValidationError::Malformed(format!(
                        "section '{section}' must be an object"
                    )));
                }
            }
        }

        require_leaf(value, "metadata", "event_time", "metadata.event_time")?;
        require_leaf(value, "action", "category", "action.category")?;
        require_leaf(value, "action", "type", "action.type")?;

        match &value["outcome"]["result"] {
            Value::String(tag) if OutcomeResult::from_tag(tag).is_some() => {}
            other => return Err(ValidationError::InvalidOutcome(other.to_string())),
        }

        require_leaf(value, "raw", "message", "raw.message")?;

        // 알 수 없는 태그는 serde 에러 대신 태그 에러로 보고합니다.
        if let Some(tag) = value["action"]["category"].as_str() {
            tag.parse::<ActionCategory>()?;
        }
        if let Some(tag) = value["action"]["type"].as_str() {
            tag.parse::<ActionType>()?;
        }

        let draft: EventDraft = serde_json::from_value(value.clone())
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::validate(&draft)
    }
}

fn require_leaf(
    value: &Value,
    section: &str,
    field: &str,
    path: &'static str,
) -> Result<(), ValidationError> {
    match value[section].get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(path)),
        Some(_) => Ok(()),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
