//! Deterministic content safety scan.
//!
//! Walks a payload's keys and string values looking for instruction-override
//! phrases, credential-shaped substrings and bare URLs. Pattern matching only:
//! the same input always yields the same findings.
//!
//! The walk is bounded twice. A branch deeper than `max_depth` is not
//! descended, and once `max_keys` object keys have been seen the walk stops.
//! Both cases are themselves findings.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scanner bounds and the URL allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_depth: usize,
    pub max_keys: usize,
    /// Paths (in `a.b[].c` form) whose string values may hold URLs.
    pub url_allowed_paths: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_depth: 12,
            max_keys: 2_000,
            url_allowed_paths: vec!["links[].url".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    BadPattern,
    Secret,
    Url,
    DepthExceeded,
    KeyBudgetExceeded,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::BadPattern => "bad_pattern",
            FindingKind::Secret => "secret",
            FindingKind::Url => "url",
            FindingKind::DepthExceeded => "depth_exceeded",
            FindingKind::KeyBudgetExceeded => "key_budget_exceeded",
        }
    }
}

/// One flagged location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub path: String,
    pub rule: String,
}

struct Rule {
    kind: FindingKind,
    id: &'static str,
    pattern: Regex,
}

fn rule(kind: FindingKind, id: &'static str, pattern: &str) -> Rule {
    Rule {
        kind,
        id,
        pattern: Regex::new(pattern).expect("valid regex"),
    }
}

fn text_rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        use FindingKind::{BadPattern, Secret};
        vec![
            rule(
                BadPattern,
                "ignore_previous_instructions",
                r"(?i)\bignore\s+(?:all\s+)?(?:the\s+)?(?:previous|prior|above|earlier)\s+(?:instructions|prompts|messages|rules)\b",
            ),
            rule(
                BadPattern,
                "disregard_instructions",
                r"(?i)\bdisregard\s+(?:all\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier)?\s*(?:instructions|prompts|rules)\b",
            ),
            rule(
                BadPattern,
                "reveal_system_prompt",
                r"(?i)\b(?:reveal|print|show|repeat|output)\s+(?:your\s+|the\s+)?system\s+prompt\b",
            ),
            rule(
                BadPattern,
                "role_override",
                r"(?i)\byou\s+are\s+now\s+(?:in\s+)?(?:developer\s+mode|dan|jailbroken)\b",
            ),
            rule(Secret, "openai_key", r"\bsk-[A-Za-z0-9_-]{20,}"),
            rule(Secret, "aws_access_key", r"\bAKIA[0-9A-Z]{16}\b"),
            rule(Secret, "github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}"),
            rule(Secret, "slack_token", r"\bxox[abpr]-[A-Za-z0-9-]{10,}"),
            rule(
                Secret,
                "private_key_pem",
                r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |ENCRYPTED |PGP )?PRIVATE KEY(?: BLOCK)?-----",
            ),
            rule(Secret, "bearer_token", r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{20,}"),
        ]
    })
}

fn url_rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            rule(FindingKind::Url, "bare_url", r"(?i)\b(?:https?|ftp)://[^\s]+"),
            rule(FindingKind::Url, "www_host", r"(?i)\bwww\.[a-z0-9-]+\.[a-z]{2,}"),
        ]
    })
}

/// Scan a payload. An empty result means no finding.
pub fn scan(payload: &Value, config: &SafetyConfig) -> Vec<Finding> {
    let mut scanner = Scanner {
        config,
        findings: Vec::new(),
        keys_seen: 0,
        halted: false,
    };
    scanner.walk(payload, "", 0);
    scanner.findings
}

struct Scanner<'a> {
    config: &'a SafetyConfig,
    findings: Vec<Finding>,
    keys_seen: usize,
    halted: bool,
}

impl Scanner<'_> {
    fn push(&mut self, kind: FindingKind, path: &str, rule: &str) {
        let finding = Finding {
            kind,
            path: path.to_string(),
            rule: rule.to_string(),
        };
        if !self.findings.contains(&finding) {
            self.findings.push(finding);
        }
    }

    fn walk(&mut self, value: &Value, path: &str, depth: usize) {
        if self.halted {
            return;
        }
        if depth > self.config.max_depth {
            self.push(FindingKind::DepthExceeded, path, "max_depth");
            return;
        }
        match value {
            Value::String(s) => self.text(s, path),
            Value::Array(items) => {
                let child = format!("{path}[]");
                for item in items {
                    self.walk(item, &child, depth + 1);
                }
            }
            Value::Object(map) => {
                for (key, child_value) in map {
                    self.keys_seen += 1;
                    if self.keys_seen > self.config.max_keys {
                        self.push(FindingKind::KeyBudgetExceeded, path, "max_keys");
                        self.halted = true;
                        return;
                    }
                    let child = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    // URLs are never allowed in keys.
                    self.key(key, &child);
                    self.walk(child_value, &child, depth + 1);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    fn key(&mut self, key: &str, path: &str) {
        self.patterns(key, path);
        for rule in url_rules() {
            if rule.pattern.is_match(key) {
                self.push(rule.kind, path, rule.id);
            }
        }
    }

    fn text(&mut self, text: &str, path: &str) {
        self.patterns(text, path);
        if self.config.url_allowed_paths.iter().any(|p| p == path) {
            return;
        }
        for rule in url_rules() {
            if rule.pattern.is_match(text) {
                self.push(rule.kind, path, rule.id);
            }
        }
    }

    fn patterns(&mut self, text: &str, path: &str) {
        for rule in text_rules() {
            if rule.pattern.is_match(text) {
                self.push(rule.kind, path, rule.id);
            }
        }
    }
}
