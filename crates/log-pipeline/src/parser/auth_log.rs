//! `/var/log/auth.log` 파서
//!
//! BSD syslog 헤더(`Mmm dd HH:MM:SS host program[pid]: message`)를 분리한 뒤
//! 프로그램별 메시지 패턴으로 액션과 결과를 결정합니다. rsyslog의 고정밀
//! RFC 3339 타임스탬프 헤더도 허용합니다.
//!
//! # 인식하는 메시지
//! - sshd: `Failed/Accepted <method> for [invalid user] X from IP port P`,
//!   `Invalid user X from IP`, 세션 종료
//! - sudo: 명령 실행, `N incorrect password attempts`, `user NOT in sudoers`
//! - su: `session opened for user T by X`, `FAILED SU (to T) X on TTY`
//! - useradd, userdel, passwd
//!
//! # 연도 추론
//! BSD 타임스탬프에는 연도가 없으므로 주입된 시계의 연도를 사용합니다.
//! 결과가 현재보다 하루 이상 미래이면 전년도 로그로 간주합니다.
//! 타임스탬프는 UTC로 해석합니다.

use std::net::IpAddr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::{Captures, Regex};

use siemlite_core::error::ParseError;
use siemlite_core::event::OutcomeResult;
use siemlite_core::{ActionType, EventDraft, EventFactory, EventParser};

use crate::error::LogPipelineError;

/// 파서가 처리하는 source_type
pub const SOURCE_TYPE: &str = "auth_log";

/// 파서 버전
pub const PARSER_VERSION: &str = "authlog-v1";

const HEADER_PATTERN: &str = r"^(?P<ts>[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}|\d{4}-\d{2}-\d{2}T[0-9:.]+(?:Z|[+-]\d{2}:?\d{2}))\s+(?P<host>\S+)\s+(?P<prog>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s?(?P<msg>.*)$";

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// 메시지 패턴 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    SshFailed,
    SshAccepted,
    SshInvalidUser,
    SshSessionClosed,
    SudoCommand,
    SuSessionOpened,
    SuFailed,
    UserAdd,
    UserAddFailed,
    UserDelete,
    PasswordChanged,
}

struct Rule {
    pattern: Pattern,
    programs: &'static [&'static str],
    regex: Regex,
}

const SSHD: &[&str] = &["sshd", "sshd-session"];

const RULES: &[(Pattern, &[&str], &str)] = &[
    (
        Pattern::SshFailed,
        SSHD,
        r"^Failed (?P<method>\S+) for (?P<invalid>invalid user )?(?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)(?: (?P<proto>ssh\d*))?",
    ),
    (
        Pattern::SshAccepted,
        SSHD,
        r"^Accepted (?P<method>\S+) for (?P<user>\S+) from (?P<ip>\S+) port (?P<port>\d+)(?: (?P<proto>ssh\d*))?",
    ),
    (
        Pattern::SshInvalidUser,
        SSHD,
        r"^Invalid user (?P<user>\S*) from (?P<ip>\S+)(?: port (?P<port>\d+))?",
    ),
    (
        Pattern::SshSessionClosed,
        SSHD,
        r"^pam_unix\(sshd:session\): session closed for user (?P<user>\S+)",
    ),
    (
        Pattern::SudoCommand,
        &["sudo"],
        r"^\s*(?P<user>\S+) : (?:(?P<attempts>\d+) incorrect password attempts? ; |(?P<denied>user NOT in sudoers|command not allowed) ; )?TTY=(?P<tty>\S+) ; PWD=(?P<pwd>.*?) ; USER=(?P<target>\S+) ;(?: COMMAND=(?P<command>.*))?$",
    ),
    (
        Pattern::SuSessionOpened,
        &["su"],
        r"^pam_unix\(su(?:-l)?:session\): session opened for user (?P<target>[^\s(]+)(?:\(uid=\d+\))? by (?P<user>[^\s(]*)(?:\(uid=(?P<uid>\d+)\))?",
    ),
    (
        Pattern::SuFailed,
        &["su"],
        r"^FAILED SU \(to (?P<target>\S+)\) (?P<user>\S+) on (?P<tty>\S+)",
    ),
    (
        Pattern::UserAdd,
        &["useradd"],
        r"^new user: name=(?P<name>[^,]+), UID=(?P<uid>\d+)",
    ),
    (
        Pattern::UserAddFailed,
        &["useradd"],
        r"^failed adding user '(?P<name>[^']+)'",
    ),
    (
        Pattern::UserDelete,
        &["userdel"],
        r"^delete user '(?P<name>[^']+)'",
    ),
    (
        Pattern::PasswordChanged,
        &["passwd"],
        r"^pam_unix\(passwd:chauthtok\): password changed for (?P<user>\S+)",
    ),
];

/// auth.log 파서
pub struct AuthLogParser {
    header: Regex,
    rules: Vec<Rule>,
}

impl AuthLogParser {
    /// 패턴을 컴파일하여 파서를 생성합니다.
    pub fn new() -> Result<Self, LogPipelineError> {
        let header = Regex::new(HEADER_PATTERN)?;
        let rules = RULES
            .iter()
            .map(|(pattern, programs, source)| {
                Ok(Rule {
                    pattern: *pattern,
                    programs: *programs,
                    regex: Regex::new(source)?,
                })
            })
            .collect::<Result<Vec<_>, LogPipelineError>>()?;
        Ok(Self { header, rules })
    }

    fn unrecognized(line: &str) -> ParseError {
        ParseError::Unrecognized {
            parser: PARSER_VERSION.to_owned(),
            raw: line.to_owned(),
        }
    }

    fn apply(pattern: Pattern, caps: &Captures<'_>, draft: &mut EventDraft) {
        match pattern {
            Pattern::SshFailed => {
                draft.action.set(ActionType::Login);
                draft.actor.user = owned(caps, "user");
                let reason = if caps.name("invalid").is_some() {
                    "invalid user".to_owned()
                } else {
                    format!("failed {}", group(caps, "method").unwrap_or("authentication"))
                };
                fail(draft, reason);
                ssh_network(caps, draft);
            }
            Pattern::SshAccepted => {
                draft.action.set(ActionType::Login);
                draft.actor.user = owned(caps, "user");
                succeed(
                    draft,
                    Some(format!(
                        "accepted {}",
                        group(caps, "method").unwrap_or("authentication")
                    )),
                );
                ssh_network(caps, draft);
            }
            Pattern::SshInvalidUser => {
                draft.action.set(ActionType::Login);
                draft.actor.user = owned(caps, "user");
                fail(draft, "invalid user".to_owned());
                ssh_network(caps, draft);
            }
            Pattern::SshSessionClosed => {
                draft.action.set(ActionType::Logout);
                draft.actor.user = owned(caps, "user");
                succeed(draft, None);
            }
            Pattern::SudoCommand => {
                draft.action.set(ActionType::Sudo);
                draft.actor.user = owned(caps, "user");
                let target = owned(caps, "target");
                draft.target.user = target.clone();
                draft.target.resource = owned(caps, "command");
                draft.privilege.target_user = target.clone();

                if let Some(attempts) = group(caps, "attempts") {
                    fail(draft, format!("{attempts} incorrect password attempts"));
                    draft.privilege.escalated = Some(false);
                } else if let Some(denied) = group(caps, "denied") {
                    fail(draft, denied.to_owned());
                    draft.privilege.escalated = Some(false);
                } else {
                    succeed(draft, None);
                    draft.privilege.escalated = Some(target.as_deref() == Some("root"));
                }
            }
            Pattern::SuSessionOpened => {
                draft.action.set(ActionType::Su);
                draft.actor.user = owned(caps, "user");
                draft.actor.uid = group(caps, "uid").and_then(|uid| uid.parse().ok());
                let target = owned(caps, "target");
                draft.target.user = target.clone();
                draft.privilege.escalated = Some(target.as_deref() == Some("root"));
                draft.privilege.target_user = target;
                succeed(draft, None);
            }
            Pattern::SuFailed => {
                draft.action.set(ActionType::Su);
                draft.actor.user = owned(caps, "user");
                draft.target.user = owned(caps, "target");
                draft.target.resource = owned(caps, "tty");
                draft.privilege.escalated = Some(false);
                draft.privilege.target_user = owned(caps, "target");
                fail(draft, "authentication failure".to_owned());
            }
            Pattern::UserAdd => {
                draft.action.set(ActionType::UserAdd);
                draft.target.user = owned(caps, "name");
                let uid: Option<u32> = group(caps, "uid").and_then(|uid| uid.parse().ok());
                draft.privilege.escalated = Some(uid == Some(0));
                draft.privilege.target_user = owned(caps, "name");
                succeed(draft, uid.map(|uid| format!("uid {uid}")));
            }
            Pattern::UserAddFailed => {
                draft.action.set(ActionType::UserAdd);
                draft.target.user = owned(caps, "name");
                draft.privilege.escalated = Some(false);
                fail(draft, "failed adding user".to_owned());
            }
            Pattern::UserDelete => {
                draft.action.set(ActionType::UserDelete);
                draft.target.user = owned(caps, "name");
                succeed(draft, None);
            }
            Pattern::PasswordChanged => {
                draft.action.set(ActionType::PasswordChange);
                draft.actor.user = owned(caps, "user");
                draft.target.user = owned(caps, "user");
                succeed(draft, None);
            }
        }
    }
}

impl EventParser for AuthLogParser {
    fn source_type(&self) -> &str {
        SOURCE_TYPE
    }

    fn parser_version(&self) -> &str {
        PARSER_VERSION
    }

    fn parse(&self, line: &str, factory: &EventFactory) -> Result<EventDraft, ParseError> {
        let Some(header) = self.header.captures(line) else {
            return Err(Self::unrecognized(line));
        };
        let program = group(&header, "prog").unwrap_or_default();
        let message = group(&header, "msg").unwrap_or_default();

        let matched = self
            .rules
            .iter()
            .filter(|rule| rule.programs.contains(&program))
            .find_map(|rule| rule.regex.captures(message).map(|caps| (rule.pattern, caps)));
        let Some((pattern, caps)) = matched else {
            return Err(Self::unrecognized(line));
        };

        let ts = group(&header, "ts").unwrap_or_default();
        let event_time =
            parse_timestamp(ts, factory.now()).map_err(|reason| ParseError::InvalidField {
                parser: PARSER_VERSION.to_owned(),
                field: "metadata.event_time",
                reason,
                raw: line.to_owned(),
            })?;

        let mut draft = factory.skeleton(SOURCE_TYPE, line);
        draft.metadata.event_time = Some(event_time);
        draft.metadata.parser_version = Some(PARSER_VERSION.to_owned());
        draft.source.host = owned(&header, "host");
        draft.source.program = Some(program.to_owned());
        draft.source.pid = group(&header, "pid").and_then(|pid| pid.parse().ok());

        Self::apply(pattern, &caps, &mut draft);
        Ok(draft)
    }
}

impl std::fmt::Debug for AuthLogParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthLogParser")
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn group<'h>(caps: &Captures<'h>, name: &str) -> Option<&'h str> {
    caps.name(name).map(|m| m.as_str())
}

fn owned(caps: &Captures<'_>, name: &str) -> Option<String> {
    group(caps, name)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn succeed(draft: &mut EventDraft, reason: Option<String>) {
    draft.outcome.result = Some(OutcomeResult::Success);
    draft.outcome.reason = reason;
}

fn fail(draft: &mut EventDraft, reason: String) {
    draft.outcome.result = Some(OutcomeResult::Failure);
    draft.outcome.reason = Some(reason);
}

fn ssh_network(caps: &Captures<'_>, draft: &mut EventDraft) {
    draft.network.src_ip = group(caps, "ip").and_then(|ip| ip.parse::<IpAddr>().ok());
    draft.network.src_port = group(caps, "port").and_then(|port| port.parse().ok());
    draft.network.protocol = Some(group(caps, "proto").unwrap_or("ssh").to_owned());
}

/// 헤더 타임스탬프를 UTC 시각으로 변환합니다.
fn parse_timestamp(ts: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    if ts.as_bytes().first().is_some_and(u8::is_ascii_digit) {
        return DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid RFC 3339 timestamp '{ts}': {e}"));
    }
    bsd_timestamp(ts, now)
}

fn bsd_timestamp(ts: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let mut parts = ts.split_whitespace();
    let (Some(mon), Some(day), Some(time)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("malformed timestamp '{ts}'"));
    };
    let month = MONTHS
        .iter()
        .position(|m| *m == mon)
        .map(|idx| idx as u32 + 1)
        .ok_or_else(|| format!("unknown month '{mon}'"))?;
    let day: u32 = day.parse().map_err(|_| format!("invalid day '{day}'"))?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .map_err(|e| format!("invalid time '{time}': {e}"))?;

    let at = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day).map(|date| Utc.from_utc_datetime(&date.and_time(time)))
    };

    match at(now.year()) {
        Some(dt) if dt <= now + Duration::days(1) => Ok(dt),
        // 12월 로그를 1월에 읽는 경우
        _ => at(now.year() - 1).ok_or_else(|| format!("invalid date '{ts}'")),
    }
}
