//! Closed-world validation of `agent-capsule/v1` payloads.
//!
//! Every field on every level must be on the allow-list below. Validation
//! never stops at the first problem: all violations are gathered in one pass
//! and returned deduplicated, in the order first seen, so a writer can fix
//! everything in one round trip.
//!
//! Array elements share a path segment (`memory.facts[].key`), so the same
//! defect repeated across elements is reported once.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use serde_json::{Map, Value};

use capsule_kernel_core::{AgentId, ReasonCode};

use crate::grant::Scope;
use crate::limits::TierLimits;
use crate::urls::{parse_http_url, MAX_URL_LEN};

/// The only schema identifier accepted.
pub const SCHEMA_ID: &str = "agent-capsule/v1";

pub const MAX_NAME_CHARS: usize = 64;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_TAG_CHARS: usize = 32;
pub const MAX_FACT_VALUE_CHARS: usize = 500;

const TOP_LEVEL: &[&str] = &[
    "schema",
    "agent_id",
    "updated_at",
    "profile",
    "memory",
    "links",
    "access_control",
];
const PROFILE: &[&str] = &["name", "description", "tags"];
const MEMORY: &[&str] = &["summary", "facts"];
const FACT: &[&str] = &["key", "value", "updated_at"];
const LINK: &[&str] = &["rel", "url"];
const ACCESS_CONTROL: &[&str] = &["public", "grants"];
const GRANT: &[&str] = &["agent_id", "scopes", "expires_at"];

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid regex"))
}

fn fact_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9_.-]{1,64}$").expect("valid regex"))
}

fn rel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_-]{0,31}$").expect("valid regex"))
}

/// What is wrong with a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    MissingField,
    UnknownField,
    WrongType,
    TooLong,
    TooShort,
    TooMany,
    InvalidFormat,
    InvalidValue,
    NotAnObject,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MissingField => "missing_field",
            ViolationKind::UnknownField => "unknown_field",
            ViolationKind::WrongType => "wrong_type",
            ViolationKind::TooLong => "too_long",
            ViolationKind::TooShort => "too_short",
            ViolationKind::TooMany => "too_many",
            ViolationKind::InvalidFormat => "invalid_format",
            ViolationKind::InvalidValue => "invalid_value",
            ViolationKind::NotAnObject => "not_an_object",
        }
    }
}

/// One schema violation at a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Violation {
    pub kind: ViolationKind,
    pub path: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// The `<kind>:<path>` wire code, or just `<kind>` at the root.
    pub fn code(&self) -> String {
        if self.path.is_empty() {
            self.kind.as_str().to_string()
        } else {
            format!("{}:{}", self.kind.as_str(), self.path)
        }
    }

    pub fn to_reason(&self) -> ReasonCode {
        ReasonCode::Schema(self.code())
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Outcome of validating one payload.
pub type ValidationResult = Result<(), Vec<Violation>>;

/// Validate a capsule payload against the schema and tier limits.
pub fn validate_capsule(payload: &Value, limits: &TierLimits) -> ValidationResult {
    let mut v = Validator {
        limits,
        violations: Vec::new(),
        seen: HashSet::new(),
    };
    v.capsule(payload);
    if v.violations.is_empty() {
        Ok(())
    } else {
        Err(v.violations)
    }
}

struct Validator<'a> {
    limits: &'a TierLimits,
    violations: Vec<Violation>,
    seen: HashSet<Violation>,
}

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

impl Validator<'_> {
    fn push(&mut self, kind: ViolationKind, path: impl Into<String>) {
        let violation = Violation::new(kind, path);
        if self.seen.insert(violation.clone()) {
            self.violations.push(violation);
        }
    }

    /// Flag keys outside `allowed`.
    fn closed(&mut self, obj: &Map<String, Value>, allowed: &[&str], path: &str) {
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                self.push(ViolationKind::UnknownField, join(path, key));
            }
        }
    }

    fn object<'v>(&mut self, value: &'v Value, path: &str) -> Option<&'v Map<String, Value>> {
        match value.as_object() {
            Some(obj) => Some(obj),
            None => {
                self.push(ViolationKind::WrongType, path);
                None
            }
        }
    }

    fn array<'v>(&mut self, value: &'v Value, path: &str, max: usize) -> Option<&'v Vec<Value>> {
        match value.as_array() {
            Some(items) => {
                if items.len() > max {
                    self.push(ViolationKind::TooMany, path);
                }
                Some(items)
            }
            None => {
                self.push(ViolationKind::WrongType, path);
                None
            }
        }
    }

    /// Check a string's type and character length; returns it if the type is right.
    fn string<'v>(&mut self, value: &'v Value, path: &str, min: usize, max: usize) -> Option<&'v str> {
        let Some(s) = value.as_str() else {
            self.push(ViolationKind::WrongType, path);
            return None;
        };
        let len = s.chars().count();
        if len < min {
            self.push(ViolationKind::TooShort, path);
        } else if len > max {
            self.push(ViolationKind::TooLong, path);
        }
        Some(s)
    }

    fn matching(&mut self, value: &Value, path: &str, re: &Regex) {
        if let Some(s) = value.as_str() {
            if !re.is_match(s) {
                self.push(ViolationKind::InvalidFormat, path);
            }
        } else {
            self.push(ViolationKind::WrongType, path);
        }
    }

    fn timestamp(&mut self, value: &Value, path: &str) {
        match value.as_str() {
            Some(s) if DateTime::parse_from_rfc3339(s).is_ok() => {}
            Some(_) => self.push(ViolationKind::InvalidFormat, path),
            None => self.push(ViolationKind::WrongType, path),
        }
    }

    fn agent_id(&mut self, value: &Value, path: &str) {
        match value.as_str() {
            Some(s) if AgentId::parse(s).is_ok() => {}
            Some(_) => self.push(ViolationKind::InvalidFormat, path),
            None => self.push(ViolationKind::WrongType, path),
        }
    }

    fn capsule(&mut self, payload: &Value) {
        let Some(obj) = payload.as_object() else {
            self.push(ViolationKind::NotAnObject, "");
            return;
        };
        self.closed(obj, TOP_LEVEL, "");

        match obj.get("schema") {
            None => self.push(ViolationKind::MissingField, "schema"),
            Some(Value::String(s)) if s == SCHEMA_ID => {}
            Some(Value::String(_)) => self.push(ViolationKind::InvalidValue, "schema"),
            Some(_) => self.push(ViolationKind::WrongType, "schema"),
        }
        if let Some(id) = obj.get("agent_id") {
            self.agent_id(id, "agent_id");
        }
        if let Some(ts) = obj.get("updated_at") {
            self.timestamp(ts, "updated_at");
        }
        if let Some(profile) = obj.get("profile") {
            self.profile(profile);
        }
        if let Some(memory) = obj.get("memory") {
            self.memory(memory);
        }
        if let Some(links) = obj.get("links") {
            self.links(links);
        }
        if let Some(ac) = obj.get("access_control") {
            self.access_control(ac);
        }
    }

    fn profile(&mut self, value: &Value) {
        let Some(obj) = self.object(value, "profile") else {
            return;
        };
        self.closed(obj, PROFILE, "profile");
        if let Some(name) = obj.get("name") {
            self.string(name, "profile.name", 1, MAX_NAME_CHARS);
        }
        if let Some(desc) = obj.get("description") {
            self.string(desc, "profile.description", 0, MAX_DESCRIPTION_CHARS);
        }
        if let Some(tags) = obj.get("tags") {
            let Some(items) = self.array(tags, "profile.tags", self.limits.max_tags) else {
                return;
            };
            for tag in items {
                if let Some(s) = self.string(tag, "profile.tags[]", 1, MAX_TAG_CHARS) {
                    if !s.is_empty() && !tag_re().is_match(s) {
                        self.push(ViolationKind::InvalidFormat, "profile.tags[]");
                    }
                }
            }
        }
    }

    fn memory(&mut self, value: &Value) {
        let Some(obj) = self.object(value, "memory") else {
            return;
        };
        self.closed(obj, MEMORY, "memory");
        if let Some(summary) = obj.get("summary") {
            self.string(summary, "memory.summary", 0, self.limits.max_summary_chars);
        }
        if let Some(facts) = obj.get("facts") {
            let Some(items) = self.array(facts, "memory.facts", self.limits.max_facts) else {
                return;
            };
            for fact in items {
                self.fact(fact);
            }
        }
    }

    fn fact(&mut self, value: &Value) {
        let path = "memory.facts[]";
        let Some(obj) = self.object(value, path) else {
            return;
        };
        self.closed(obj, FACT, path);
        match obj.get("key") {
            Some(key) => self.matching(key, "memory.facts[].key", fact_key_re()),
            None => self.push(ViolationKind::MissingField, "memory.facts[].key"),
        }
        match obj.get("value") {
            Some(v) => {
                self.string(v, "memory.facts[].value", 0, MAX_FACT_VALUE_CHARS);
            }
            None => self.push(ViolationKind::MissingField, "memory.facts[].value"),
        }
        if let Some(ts) = obj.get("updated_at") {
            self.timestamp(ts, "memory.facts[].updated_at");
        }
    }

    fn links(&mut self, value: &Value) {
        let Some(items) = self.array(value, "links", self.limits.max_links) else {
            return;
        };
        for link in items {
            let Some(obj) = self.object(link, "links[]") else {
                continue;
            };
            self.closed(obj, LINK, "links[]");
            match obj.get("rel") {
                Some(rel) => self.matching(rel, "links[].rel", rel_re()),
                None => self.push(ViolationKind::MissingField, "links[].rel"),
            }
            match obj.get("url") {
                Some(Value::String(url)) if url.len() > MAX_URL_LEN => {
                    self.push(ViolationKind::TooLong, "links[].url")
                }
                Some(Value::String(url)) => {
                    if parse_http_url(url).is_err() {
                        self.push(ViolationKind::InvalidFormat, "links[].url");
                    }
                }
                Some(_) => self.push(ViolationKind::WrongType, "links[].url"),
                None => self.push(ViolationKind::MissingField, "links[].url"),
            }
        }
    }

    fn access_control(&mut self, value: &Value) {
        let Some(obj) = self.object(value, "access_control") else {
            return;
        };
        self.closed(obj, ACCESS_CONTROL, "access_control");
        if let Some(public) = obj.get("public") {
            if !public.is_boolean() {
                self.push(ViolationKind::WrongType, "access_control.public");
            }
        }
        if let Some(grants) = obj.get("grants") {
            let Some(items) = self.array(grants, "access_control.grants", self.limits.max_grants)
            else {
                return;
            };
            for grant in items {
                self.grant(grant);
            }
        }
    }

    fn grant(&mut self, value: &Value) {
        let path = "access_control.grants[]";
        let obj = match value {
            Value::String(_) => return self.agent_id(value, path),
            Value::Object(obj) => obj,
            _ => return self.push(ViolationKind::WrongType, path),
        };
        self.closed(obj, GRANT, path);
        match obj.get("agent_id") {
            Some(id) => self.agent_id(id, "access_control.grants[].agent_id"),
            None => self.push(ViolationKind::MissingField, "access_control.grants[].agent_id"),
        }
        match obj.get("scopes") {
            Some(Value::Array(scopes)) => {
                if scopes.is_empty() {
                    self.push(ViolationKind::TooShort, "access_control.grants[].scopes");
                }
                for scope in scopes {
                    match scope.as_str() {
                        Some(s) if Scope::parse(s).is_some() => {}
                        Some(_) => self.push(
                            ViolationKind::InvalidValue,
                            "access_control.grants[].scopes[]",
                        ),
                        None => {
                            self.push(ViolationKind::WrongType, "access_control.grants[].scopes[]")
                        }
                    }
                }
            }
            Some(_) => self.push(ViolationKind::WrongType, "access_control.grants[].scopes"),
            None => self.push(ViolationKind::MissingField, "access_control.grants[].scopes"),
        }
        if let Some(ts) = obj.get("expires_at") {
            self.timestamp(ts, "access_control.grants[].expires_at");
        }
    }
}
