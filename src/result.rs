//! # Result Builder
//! Creates the result shell for a source, merges gatherer responses into it and
//! derives the overall status and the provenance-tagged error list.

use chrono::{DateTime, Utc};
use serde_json::Map;
use std::collections::BTreeMap;

use crate::status::{reduce, Status};
use crate::types::{GatherResult, GathererResponse, ResultKind, Source};

/// Short, stable fingerprint of a source id (first 6 bytes of SHA-256, hex).
fn short_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// `<created millis>-<source fingerprint>-<position in pass>`; unique within a pass.
pub fn result_id(source: &Source, now: DateTime<Utc>, seq: usize) -> String {
    format!("{}-{}-{}", now.timestamp_millis(), short_hash(&source.id), seq)
}

/// Empty result for `source`, stamped at `now`. Errors already attached to the
/// source (e.g. by `before_run`) seed the result's error list.
pub fn create_empty(source: &Source, kind: ResultKind, now: DateTime<Utc>, seq: usize) -> GatherResult {
    GatherResult {
        id: result_id(source, now, seq),
        source_id: source.id.clone(),
        kind,
        gatherer: source.gatherer.clone(),
        label: source.label.clone(),
        status: Status::Submitted,
        created_timestamp: now,
        modified_timestamp: now,
        errors: source.errors.clone(),
        responses: BTreeMap::new(),
        metadata: Map::new(),
    }
}

/// Attach one gatherer's response and remember its status for reduction.
pub fn merge(result: &mut GatherResult, name: &str, response: GathererResponse, statuses: &mut Vec<Status>) {
    statuses.push(response.status);
    result.responses.insert(name.to_string(), response);
}

/// `"[name] message"` for every non-empty message.
pub fn tag_errors(name: &str, errors: &[String]) -> Vec<String> {
    errors
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(|m| format!("[{name}] {m}"))
        .collect()
}

/// Set the overall status and append tagged gatherer errors for `names`.
/// Returns the errors that were appended.
pub fn finalize(result: &mut GatherResult, statuses: &[Status], names: &[String]) -> Vec<String> {
    if let Some(s) = reduce(statuses) {
        result.status = s;
    }

    let mut added = Vec::new();
    let mut seen: Vec<&str> = Vec::with_capacity(names.len());
    for name in names {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);
        if let Some(resp) = result.responses.get(name) {
            added.extend(tag_errors(name, &resp.errors));
        }
    }
    result.errors.extend(added.iter().cloned());
    added
}

/// Replace one gatherer's response after polling, recompute the overall status
/// from every stored response and bump `modified_timestamp`.
/// Returns the tagged errors appended to the result.
pub fn apply_retrieved(
    result: &mut GatherResult,
    name: &str,
    response: GathererResponse,
    now: DateTime<Utc>,
) -> Vec<String> {
    let added = tag_errors(name, &response.errors);
    result.responses.insert(name.to_string(), response);
    let statuses: Vec<Status> = result.responses.values().map(|r| r.status).collect();
    if let Some(s) = reduce(&statuses) {
        result.status = s;
    }
    result.errors.extend(added.iter().cloned());
    result.modified_timestamp = now;
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn empty_result_copies_source_fields() {
        let mut src = Source::new("s1", vec!["a", "b"]);
        src.label = Some("Home".into());
        src.errors.push("[ext] beforeRun: x".into());

        let r = create_empty(&src, ResultKind::Recurring, now(), 3);
        assert_eq!(r.source_id, "s1");
        assert_eq!(r.kind, ResultKind::Recurring);
        assert_eq!(r.label.as_deref(), Some("Home"));
        assert_eq!(r.errors, vec!["[ext] beforeRun: x".to_string()]);
        assert_eq!(r.created_timestamp, now());
        assert_eq!(r.modified_timestamp, now());
        assert!(r.id.starts_with(&now().timestamp_millis().to_string()));
        assert!(r.id.ends_with("-3"));
    }

    #[test]
    fn ids_differ_within_a_pass() {
        let src = Source::new("s1", "a");
        assert_ne!(result_id(&src, now(), 0), result_id(&src, now(), 1));
    }

    #[test]
    fn finalize_reduces_and_tags() {
        let src = Source::new("s1", vec!["a", "b"]);
        let mut r = create_empty(&src, ResultKind::Single, now(), 0);
        let mut statuses = Vec::new();
        merge(&mut r, "a", GathererResponse::retrieved(serde_json::json!({})), &mut statuses);
        merge(&mut r, "b", GathererResponse::error("boom"), &mut statuses);

        let names = vec!["a".to_string(), "b".to_string()];
        let added = finalize(&mut r, &statuses, &names);
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.errors, vec!["[b] boom".to_string()]);
        assert_eq!(added, r.errors);
    }

    #[test]
    fn empty_messages_are_dropped() {
        let tagged = tag_errors("x", &["".into(), "  ".into(), "real".into()]);
        assert_eq!(tagged, vec!["[x] real".to_string()]);
    }

    #[test]
    fn apply_retrieved_recomputes_status() {
        let src = Source::new("s1", vec!["a", "b"]);
        let mut r = create_empty(&src, ResultKind::Single, now(), 0);
        let mut statuses = Vec::new();
        merge(&mut r, "a", GathererResponse::retrieved(serde_json::json!(1)), &mut statuses);
        merge(&mut r, "b", GathererResponse::submitted(), &mut statuses);
        finalize(&mut r, &statuses, &["a".into(), "b".into()]);
        assert_eq!(r.status, Status::Submitted);

        let later = now() + chrono::Duration::minutes(5);
        apply_retrieved(&mut r, "b", GathererResponse::retrieved(serde_json::json!(2)), later);
        assert_eq!(r.status, Status::Retrieved);
        assert_eq!(r.modified_timestamp, later);
        assert_eq!(r.created_timestamp, now());
    }
}
