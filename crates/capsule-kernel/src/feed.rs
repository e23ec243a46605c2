//! Publisher-owned feeds: the multi-item form of versioned state.
//!
//! A publish is a signed envelope whose payload is `{"items": [...]}`. After
//! the envelope and sequence checks, the batch is checked for duplicate ids
//! and each item is validated structurally. A batch with any bad item is
//! rejected whole. Accepted items are upserted by id into the stored feed,
//! items past the age bound are dropped, and the rest are sorted newest
//! first and truncated. The feed cursor covers only the set of
//! `(source, id, content_hash)` triples, so re-publishing identical content
//! at a later time does not change it.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use capsule_kernel_core::{feed_cursor, AgentId, Cursor, FeedCursorEntry, ReasonCode};
use capsule_kernel_policy::{validate_public_url, PolicyError};
use capsule_kernel_store::{KvStore, KvStoreExt, PutResult, Versioned};
use capsule_kernel_sync::FeedItemError;

use crate::capsule::{check_seq, open_envelope, Accepted, Rejection, WriteOutcome};
use crate::config::FeedConfig;
use crate::error::{KernelError, Result};
use crate::keys::{feed_key, load_json};

const MAX_ID_CHARS: usize = 128;
const MAX_SOURCE_CHARS: usize = 64;

const ITEM_FIELDS: &[&str] = &[
    "id",
    "source",
    "url",
    "headline",
    "published_at",
    "updated_at",
    "provenance",
    "risk",
];
const PROVENANCE_FIELDS: &[&str] = &["fetched_at", "evidence_urls", "content_hash"];

fn content_hash_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("valid regex"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub evidence_urls: Vec<String>,
    pub content_hash: String,
}

/// One item in a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub source: String,
    pub url: String,
    pub headline: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub provenance: Provenance,
    /// Publisher-supplied annotation. Stored as given, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<Value>,
}

impl FeedItem {
    fn cursor_entry(&self) -> FeedCursorEntry<'_> {
        FeedCursorEntry {
            source: &self.source,
            id: &self.id,
            content_hash: &self.provenance.content_hash,
        }
    }
}

/// Everything stored under `feed:{publisher}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDocument {
    /// Newest first.
    pub items: Vec<FeedItem>,
    pub cursor: Cursor,
    pub prev_cursor: Option<Cursor>,
    pub seq: i64,
    pub sources_included: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Collects per-item problems in first-seen order.
struct ItemErrors<'a> {
    index: usize,
    id: Option<&'a str>,
    errors: Vec<FeedItemError>,
}

impl<'a> ItemErrors<'a> {
    fn push(&mut self, kind: &str, path: &str) {
        let code = format!("{kind}:{path}");
        if !self.errors.iter().any(|e| e.code == code) {
            self.errors.push(FeedItemError {
                index: self.index,
                id: self.id.map(str::to_string),
                code,
            });
        }
    }

    fn string(&mut self, obj: &'a Map<String, Value>, field: &str, max_chars: usize) -> Option<&'a str> {
        match obj.get(field) {
            None | Some(Value::Null) => {
                self.push("missing_field", field);
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                self.push("too_short", field);
                None
            }
            Some(Value::String(s)) if s.chars().count() > max_chars => {
                self.push("too_long", field);
                None
            }
            Some(Value::String(s)) => Some(s),
            Some(_) => {
                self.push("wrong_type", field);
                None
            }
        }
    }

    fn timestamp(&mut self, obj: &Map<String, Value>, field: &str, path: &str) -> Option<DateTime<Utc>> {
        match obj.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => match DateTime::parse_from_rfc3339(s) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(_) => {
                    self.push("invalid_format", path);
                    None
                }
            },
            Some(_) => {
                self.push("wrong_type", path);
                None
            }
        }
    }

    fn url(&mut self, raw: &str, path: &str) -> bool {
        match validate_public_url(raw) {
            Ok(_) => true,
            Err(PolicyError::NonPublicAddress(_)) => {
                self.push("non_public_address", path);
                false
            }
            Err(_) => {
                self.push("invalid_format", path);
                false
            }
        }
    }

    fn unknown_fields(&mut self, obj: &Map<String, Value>, allowed: &[&str], prefix: &str) {
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                self.push("unknown_field", &format!("{prefix}{key}"));
            }
        }
    }
}

/// Validate one raw item. All problems are reported, not just the first.
pub fn validate_item(
    index: usize,
    raw: &Value,
    config: &FeedConfig,
) -> std::result::Result<FeedItem, Vec<FeedItemError>> {
    let Some(obj) = raw.as_object() else {
        return Err(vec![FeedItemError {
            index,
            id: None,
            code: "not_an_object".to_string(),
        }]);
    };
    let mut errs = ItemErrors {
        index,
        id: obj.get("id").and_then(Value::as_str),
        errors: Vec::new(),
    };
    errs.unknown_fields(obj, ITEM_FIELDS, "");

    let id = errs.string(obj, "id", MAX_ID_CHARS);
    if id.is_some_and(|id| id.chars().any(|c| c.is_whitespace() || c.is_control())) {
        errs.push("invalid_format", "id");
    }
    let source = errs.string(obj, "source", MAX_SOURCE_CHARS);
    let url = errs.string(obj, "url", capsule_kernel_policy::MAX_URL_LEN);
    let url_ok = url.is_some_and(|u| errs.url(u, "url"));
    let headline = errs.string(obj, "headline", config.max_headline_chars);

    let published_at = errs.timestamp(obj, "published_at", "published_at");
    if published_at.is_none() && !obj.contains_key("published_at") {
        errs.push("missing_field", "published_at");
    }
    let updated_at = errs.timestamp(obj, "updated_at", "updated_at");

    let risk = match obj.get("risk") {
        None | Some(Value::Null) => None,
        Some(v @ Value::Object(_)) => Some(v.clone()),
        Some(_) => {
            errs.push("wrong_type", "risk");
            None
        }
    };

    let provenance = match obj.get("provenance") {
        Some(Value::Object(p)) => validate_provenance(&mut errs, p, config),
        None | Some(Value::Null) => {
            errs.push("missing_field", "provenance");
            None
        }
        Some(_) => {
            errs.push("wrong_type", "provenance");
            None
        }
    };

    match (id, source, url, headline, published_at, provenance) {
        (Some(id), Some(source), Some(url), Some(headline), Some(published_at), Some(provenance))
            if errs.errors.is_empty() && url_ok =>
        {
            Ok(FeedItem {
                id: id.to_string(),
                source: source.to_string(),
                url: url.to_string(),
                headline: headline.to_string(),
                published_at,
                updated_at,
                provenance,
                risk,
            })
        }
        _ => Err(errs.errors),
    }
}

fn validate_provenance(
    errs: &mut ItemErrors<'_>,
    obj: &Map<String, Value>,
    config: &FeedConfig,
) -> Option<Provenance> {
    errs.unknown_fields(obj, PROVENANCE_FIELDS, "provenance.");

    let fetched_at = errs.timestamp(obj, "fetched_at", "provenance.fetched_at");
    if fetched_at.is_none() && !obj.contains_key("fetched_at") {
        errs.push("missing_field", "provenance.fetched_at");
    }

    let content_hash = match obj.get("content_hash") {
        Some(Value::String(h)) if content_hash_pattern().is_match(h) => Some(h.clone()),
        Some(Value::String(_)) => {
            errs.push("invalid_format", "provenance.content_hash");
            None
        }
        None | Some(Value::Null) => {
            errs.push("missing_field", "provenance.content_hash");
            None
        }
        Some(_) => {
            errs.push("wrong_type", "provenance.content_hash");
            None
        }
    };

    let mut evidence_urls = Vec::new();
    match obj.get("evidence_urls") {
        None | Some(Value::Null) => {}
        Some(Value::Array(urls)) => {
            if urls.len() > config.max_evidence_urls {
                errs.push("too_many", "provenance.evidence_urls");
            }
            for url in urls {
                match url.as_str() {
                    Some(u) => {
                        if errs.url(u, "provenance.evidence_urls[]") {
                            evidence_urls.push(u.to_string());
                        }
                    }
                    None => errs.push("wrong_type", "provenance.evidence_urls[]"),
                }
            }
        }
        Some(_) => errs.push("wrong_type", "provenance.evidence_urls"),
    }

    Some(Provenance {
        fetched_at: fetched_at?,
        evidence_urls,
        content_hash: content_hash?,
    })
}

/// Item errors for every repeated id in a batch, after its first occurrence.
pub fn duplicate_ids(items: &[Value]) -> Vec<FeedItemError> {
    let mut seen = HashSet::new();
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let id = item.get("id")?.as_str()?;
            (!seen.insert(id)).then(|| FeedItemError {
                index,
                id: Some(id.to_string()),
                code: "duplicate_id".to_string(),
            })
        })
        .collect()
}

fn batch_items<'a>(
    payload: &'a Value,
    config: &FeedConfig,
) -> std::result::Result<&'a [Value], ReasonCode> {
    let schema = |code: &str| ReasonCode::Schema(code.to_string());
    let obj = payload.as_object().ok_or_else(|| schema("not_an_object"))?;
    if let Some(key) = obj.keys().find(|k| k.as_str() != "items") {
        return Err(schema(&format!("unknown_field:{key}")));
    }
    match obj.get("items") {
        Some(Value::Array(items)) if items.len() > config.max_items => Err(schema("too_many:items")),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(schema("wrong_type:items")),
        None => Err(schema("missing_field:items")),
    }
}

/// Merge incoming items over stored ones and build the next document.
pub fn merge(
    previous: Option<&FeedDocument>,
    incoming: Vec<FeedItem>,
    seq: i64,
    config: &FeedConfig,
    now: DateTime<Utc>,
) -> FeedDocument {
    let mut by_id: BTreeMap<String, FeedItem> = previous
        .map(|doc| doc.items.iter().map(|i| (i.id.clone(), i.clone())).collect())
        .unwrap_or_default();
    for item in incoming {
        by_id.insert(item.id.clone(), item);
    }

    let cutoff = now
        .checked_sub_signed(config.max_age())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut items: Vec<FeedItem> = by_id
        .into_values()
        .filter(|i| i.published_at >= cutoff)
        .collect();
    items.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    items.truncate(config.max_items);

    let cursor = feed_cursor(items.iter().map(FeedItem::cursor_entry));
    let mut sources_included: Vec<String> = items.iter().map(|i| i.source.clone()).collect();
    sources_included.sort();
    sources_included.dedup();

    FeedDocument {
        items,
        cursor,
        prev_cursor: previous.map(|d| d.cursor.clone()),
        seq,
        sources_included,
        created_at: previous.map_or(now, |d| d.created_at),
        updated_at: now,
    }
}

/// Feeds over a key-value store.
pub struct FeedStore<S: KvStore> {
    store: Arc<S>,
    config: FeedConfig,
    max_retries: u32,
}

impl<S: KvStore> FeedStore<S> {
    pub fn new(store: Arc<S>, config: FeedConfig, max_retries: u32) -> Self {
        Self {
            store,
            config,
            max_retries,
        }
    }

    pub async fn load(&self, publisher: &AgentId) -> Result<Option<Versioned<FeedDocument>>> {
        load_json(&*self.store, &feed_key(publisher)).await
    }

    /// Validate and merge one publish batch.
    pub async fn publish(
        &self,
        publisher: &AgentId,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        if body.len() > self.config.max_raw_bytes {
            return Ok(ReasonCode::PayloadTooLarge.into());
        }
        let verified = match open_envelope(body, publisher) {
            Ok(v) => v,
            Err(code) => return Ok(code.into()),
        };

        let mut current = self.load(publisher).await?;
        if let Some(code) = check_seq(verified.seq, current.as_ref().map(|d| d.value.seq)) {
            return Ok(code.into());
        }

        let raw_items = match batch_items(&verified.payload, &self.config) {
            Ok(items) => items,
            Err(code) => return Ok(code.into()),
        };

        let duplicates = duplicate_ids(raw_items);
        if !duplicates.is_empty() {
            info!(publisher = %publisher, duplicates = duplicates.len(), "feed batch has duplicate ids");
            return Ok(Rejection {
                item_errors: duplicates,
                ..Rejection::from(ReasonCode::DuplicateItemId)
            }
            .into());
        }

        let mut incoming = Vec::with_capacity(raw_items.len());
        let mut item_errors = Vec::new();
        for (index, raw) in raw_items.iter().enumerate() {
            match validate_item(index, raw, &self.config) {
                Ok(item) => incoming.push(item),
                Err(errors) => item_errors.extend(errors),
            }
        }
        if !item_errors.is_empty() {
            info!(publisher = %publisher, errors = item_errors.len(), "feed batch has invalid items");
            return Ok(Rejection {
                item_errors,
                ..Rejection::from(ReasonCode::InvalidItems)
            }
            .into());
        }

        let key = feed_key(publisher);
        let mut attempts = 0u32;
        loop {
            let doc = merge(
                current.as_ref().map(|d| &d.value),
                incoming.clone(),
                verified.seq,
                &self.config,
                now,
            );
            let expected = current.as_ref().map(|d| d.version);
            match self.store.put_json_if_version(&key, &doc, expected, None).await? {
                PutResult::Written { .. } => {
                    let changed = doc.prev_cursor.as_ref() != Some(&doc.cursor);
                    info!(
                        publisher = %publisher,
                        seq = doc.seq,
                        items = doc.items.len(),
                        cursor = %doc.cursor,
                        changed,
                        "feed publish accepted"
                    );
                    return Ok(WriteOutcome::Accepted(Accepted {
                        seq: doc.seq,
                        cursor: doc.cursor,
                        prev_cursor: doc.prev_cursor,
                        changed,
                    }));
                }
                PutResult::Conflict { .. } => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        warn!(key = %key, attempts, "feed commit gave up");
                        return Err(KernelError::Contention { key, attempts });
                    }
                    current = self.load(publisher).await?;
                    if let Some(code) = check_seq(verified.seq, current.as_ref().map(|d| d.value.seq)) {
                        debug!(key = %key, reason = %code, "lost feed commit race");
                        return Ok(code.into());
                    }
                }
            }
        }
    }
}
