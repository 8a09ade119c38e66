//! 액션 분류 -- 카테고리와 카테고리별 액션 타입의 닫힌 열거형
//!
//! 탐지기는 문자열 대신 [`ActionType`] 변형을 패턴 매칭합니다.
//! 외부 로그 소스가 사용하는 태그(벤더 별칭 포함)는 [`ActionTable`]에
//! 등록하여 이 열거형으로 변환합니다.
//!
//! | category       | types                                   |
//! |----------------|-----------------------------------------|
//! | authentication | login, logout                           |
//! | authorization  | sudo, su                                |
//! | account        | user_add, user_delete, password_change  |

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// 액션 카테고리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// 인증 (로그인/로그아웃)
    Authentication,
    /// 권한 부여 (sudo, su)
    Authorization,
    /// 계정 관리
    Account,
}

impl ActionCategory {
    /// 모든 카테고리
    pub const ALL: [Self; 3] = [Self::Authentication, Self::Authorization, Self::Account];

    /// 안정적인 문자열 태그를 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Account => "account",
        }
    }
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownTag {
                field: "action.category",
                value: s.to_owned(),
            })
    }
}

/// 액션 타입 -- 각 변형은 정확히 하나의 카테고리에 속합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// 로그인 시도
    Login,
    /// 로그아웃 / 세션 종료
    Logout,
    /// sudo 명령 실행
    Sudo,
    /// su 사용자 전환
    Su,
    /// 사용자 추가
    UserAdd,
    /// 사용자 삭제
    UserDelete,
    /// 비밀번호 변경
    PasswordChange,
}

impl ActionType {
    /// 모든 액션 타입
    pub const ALL: [Self; 7] = [
        Self::Login,
        Self::Logout,
        Self::Sudo,
        Self::Su,
        Self::UserAdd,
        Self::UserDelete,
        Self::PasswordChange,
    ];

    /// 이 타입이 속한 카테고리를 반환합니다.
    pub fn category(self) -> ActionCategory {
        match self {
            Self::Login | Self::Logout => ActionCategory::Authentication,
            Self::Sudo | Self::Su => ActionCategory::Authorization,
            Self::UserAdd | Self::UserDelete | Self::PasswordChange => ActionCategory::Account,
        }
    }

    /// 안정적인 문자열 태그를 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Sudo => "sudo",
            Self::Su => "su",
            Self::UserAdd => "user_add",
            Self::UserDelete => "user_delete",
            Self::PasswordChange => "password_change",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownTag {
                field: "action.type",
                value: s.to_owned(),
            })
    }
}

/// 액션 태그 등록 테이블
///
/// `(category 태그, type 태그)` 쌍을 [`ActionType`]으로 매핑합니다.
/// 기본 테이블은 모든 표준 태그를 포함하며, 외부 소스의 별칭은
/// [`register`](Self::register)로 추가합니다. 이미 등록된 쌍을 다시
/// 등록하면 에러입니다.
#[derive(Debug, Clone)]
pub struct ActionTable {
    entries: HashMap<(String, String), ActionType>,
}

impl ActionTable {
    /// 빈 테이블을 생성합니다.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// 표준 태그가 등록된 테이블을 생성합니다.
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        for kind in ActionType::ALL {
            entries.insert(
                (kind.category().as_str().to_owned(), kind.as_str().to_owned()),
                kind,
            );
        }
        Self { entries }
    }

    /// 태그 쌍을 등록합니다.
    ///
    /// 같은 쌍이 이미 있으면 기존 매핑을 유지하고 에러를 반환합니다.
    pub fn register(
        &mut self,
        category: impl Into<String>,
        kind: impl Into<String>,
        action: ActionType,
    ) -> Result<(), ValidationError> {
        let key = (category.into(), kind.into());
        if self.entries.contains_key(&key) {
            return Err(ValidationError::Malformed(format!(
                "action tag pair ({}, {}) is already registered",
                key.0, key.1
            )));
        }
        self.entries.insert(key, action);
        Ok(())
    }

    /// 태그 쌍을 조회합니다.
    pub fn resolve(&self, category: &str, kind: &str) -> Result<ActionType, ValidationError> {
        self.entries
            .get(&(category.to_owned(), kind.to_owned()))
            .copied()
            .ok_or_else(|| ValidationError::UnknownTag {
                field: "action.type",
                value: format!("{category}/{kind}"),
            })
    }

    /// 등록된 항목 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 테이블이 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::builtin()
    }
}
