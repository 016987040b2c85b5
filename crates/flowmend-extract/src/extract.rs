use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// How a structured value was recovered from generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Recovery {
    /// The whole text parsed as-is.
    Direct,
    /// The contents of a code fence parsed as-is.
    Fenced,
    /// Located by a balanced-delimiter scan and textually repaired.
    Scanned,
    /// The structure was unterminated and had to be force-closed.
    /// Content may have been lost.
    TruncationRepaired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: Value,
    pub recovery: Recovery,
}

impl Extraction {
    pub fn is_degraded(&self) -> bool {
        self.recovery == Recovery::TruncationRepaired
    }
}

#[derive(Debug, Error)]
#[error("Could not extract a structured value from {input_length} bytes of text")]
pub struct ExtractionError {
    pub input_length: usize,
    /// The best candidate that was tried, after repairs.
    pub candidate: Option<String>,
    #[source]
    pub source: Option<serde_json::Error>,
}

/// Recover a JSON object or array from free-form generated text.
///
/// Tries, in order: the (fence-stripped) text as-is, then every balanced
/// `{...}` / `[...]` region in position order, each after a fixed set of
/// textual repairs. An unterminated region is force-closed and reported as
/// [`Recovery::TruncationRepaired`].
pub fn extract(text: &str) -> Result<Extraction, ExtractionError> {
    let input_length = text.len();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError {
            input_length,
            candidate: None,
            source: None,
        });
    }

    let (body, fenced) = strip_fence(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && is_structured(&value)
    {
        let recovery = if fenced {
            Recovery::Fenced
        } else {
            Recovery::Direct
        };
        return Ok(Extraction { value, recovery });
    }

    let mut sources = vec![body];
    if fenced {
        // The fence may have held something else; fall back to the full text.
        sources.push(trimmed);
    }

    let mut first_failure: Option<(String, serde_json::Error)> = None;
    for source in sources {
        let mut from = 0;
        while let Some(offset) = source[from..].find(['{', '[']) {
            let start = from + offset;
            let span = balanced_span(&source[start..]);
            let raw = &source[start..start + span.len];
            let truncated = span.is_truncated();
            let candidate = if truncated {
                close_truncated(raw, &span)
            } else {
                raw.to_string()
            };
            let repaired = repair_candidate(&candidate);

            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) if is_structured(&value) => {
                    let recovery = if truncated {
                        warn!(
                            "Recovered truncated structure by appending {} closer(s)",
                            span.pending.len()
                        );
                        Recovery::TruncationRepaired
                    } else {
                        debug!("Recovered structure at byte {} of {}", start, source.len());
                        Recovery::Scanned
                    };
                    return Ok(Extraction { value, recovery });
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Candidate at byte {} failed to parse: {}", start, e);
                    // Openers before the parse error belong to this candidate;
                    // anything after it may still start the payload.
                    let consistent = error_offset(&repaired, &e).clamp(1, span.len);
                    from = next_char_boundary(source, start + consistent);
                    if first_failure.is_none() {
                        first_failure = Some((repaired, e));
                    }
                    continue;
                }
            }
            from = start + span.len;
        }
    }

    let (candidate, source) = match first_failure {
        Some((candidate, e)) => (Some(candidate), Some(e)),
        None => (None, None),
    };
    Err(ExtractionError {
        input_length,
        candidate,
        source,
    })
}

/// Byte offset of a parse error within `text`.
fn error_offset(text: &str, error: &serde_json::Error) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(error.line().saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + error.column()).min(text.len())
}

fn next_char_boundary(text: &str, mut at: usize) -> usize {
    while at < text.len() && !text.is_char_boundary(at) {
        at += 1;
    }
    at.min(text.len())
}

fn is_structured(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

/// Strip a triple-backtick fence, preferring one labelled `json`.
/// An unclosed fence (truncated output) yields everything after it.
///
/// Only a marker that opens a line counts as a fence. JSON strings cannot
/// hold a raw newline, so a marker quoted inside the payload never does.
fn strip_fence(text: &str) -> (&str, bool) {
    let openers: Vec<usize> = text
        .match_indices("```")
        .map(|(i, _)| i)
        .filter(|&i| opens_line(text, i))
        .collect();
    let labelled = openers.iter().copied().find(|&i| {
        let tag = &text[i + 3..];
        tag.starts_with("json") || tag.starts_with("JSON")
    });
    let Some(start) = labelled.or(openers.first().copied()) else {
        return (text, false);
    };

    // Drop the language tag, e.g. "```json" or "```javascript".
    let after_fence = &text[start + 3..];
    let tag_len = after_fence
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_fence.len());
    (fence_body(&after_fence[tag_len..]), true)
}

fn fence_body(body: &str) -> &str {
    let end = body
        .match_indices("```")
        .map(|(i, _)| i)
        .find(|&i| opens_line(body, i) || closes_line(body, i + 3));
    match end {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn opens_line(text: &str, at: usize) -> bool {
    let before = text[..at].trim_end_matches([' ', '\t']);
    before.is_empty() || before.ends_with('\n')
}

fn closes_line(text: &str, from: usize) -> bool {
    text[from..]
        .split('\n')
        .next()
        .is_none_or(|rest| rest.trim().is_empty())
}

/// Result of scanning from an opening marker.
struct Span {
    /// Bytes consumed: up to and including the matching closer, or the
    /// whole input when the structure never closes.
    len: usize,
    /// Closers still owed at end of input, outermost first.
    pending: Vec<u8>,
    /// Input ended inside a string literal.
    in_string: bool,
}

impl Span {
    fn is_truncated(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Scan from an opening `{`/`[` to its matching closer. Markers inside
/// string literals are ignored; `\"` does not end a string.
fn balanced_span(text: &str) -> Span {
    let mut pending = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => pending.push(b'}'),
            b'[' => pending.push(b']'),
            b'}' | b']' => {
                pending.pop();
                if pending.is_empty() {
                    return Span {
                        len: i + 1,
                        pending,
                        in_string: false,
                    };
                }
            }
            _ => {}
        }
    }

    Span {
        len: text.len(),
        pending,
        in_string,
    }
}

/// Force-close an unterminated structure: finish an open string, drop a
/// dangling separator, complete a dangling key, then append the owed closers.
fn close_truncated(raw: &str, span: &Span) -> String {
    let mut closed = raw.to_string();
    if span.in_string {
        if ends_with_odd_backslashes(&closed) {
            closed.pop();
        }
        closed.push('"');
    }

    let keep = closed.trim_end().len();
    closed.truncate(keep);
    if closed.ends_with(',') {
        closed.pop();
    }
    if closed.ends_with(':') {
        closed.push_str("null");
    }

    for &closer in span.pending.iter().rev() {
        closed.push(closer as char);
    }
    closed
}

fn ends_with_odd_backslashes(text: &str) -> bool {
    text.bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 1
}

/// Fixed, ordered textual repairs applied outside string literals:
/// 1. drop a separator directly before a closer (`[1, 2,]`);
/// 2. insert a missing separator after a closer that is followed by a new
///    key or value (`{"a": {}} "b": 1`);
/// 3. discard anything after the last closer.
fn repair_candidate(candidate: &str) -> String {
    let bytes = candidate.as_bytes();
    let mut out = String::with_capacity(candidate.len() + 8);
    let mut copied = 0;
    let mut last_closer_end = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b',' if matches!(next_significant(bytes, i + 1), Some(b'}' | b']')) => {
                out.push_str(&candidate[copied..i]);
                copied = i + 1;
            }
            b'}' | b']' => {
                out.push_str(&candidate[copied..=i]);
                copied = i + 1;
                last_closer_end = Some(out.len());
                if matches!(next_significant(bytes, i + 1), Some(b'"' | b'{' | b'[')) {
                    out.push(',');
                }
            }
            _ => {}
        }
    }
    out.push_str(&candidate[copied..]);

    if let Some(end) = last_closer_end {
        out.truncate(end);
    }
    out
}

fn next_significant(bytes: &[u8], from: usize) -> Option<u8> {
    bytes
        .get(from..)?
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_is_direct() {
        let extraction = extract(r#"{"nodes": []}"#).unwrap();
        assert_eq!(extraction.value, json!({"nodes": []}));
        assert_eq!(extraction.recovery, Recovery::Direct);
    }

    #[test]
    fn json_fence_is_preferred_over_generic_fence() {
        let text = "```\nnot this\n```\nand\n```json\n{\"nodes\": [1]}\n```";
        let extraction = extract(text).unwrap();
        assert_eq!(extraction.value, json!({"nodes": [1]}));
        assert_eq!(extraction.recovery, Recovery::Fenced);
    }

    #[test]
    fn generic_fence_with_language_tag() {
        let text = "```javascript\n[1, 2]\n```";
        assert_eq!(extract(text).unwrap().value, json!([1, 2]));
    }

    #[test]
    fn fence_quoted_inside_a_payload_is_not_a_wrapper() {
        let payload = json!({
            "nodes": [{
                "id": "a",
                "kind": "start",
                "attributes": {"description": "paste ```json [1, 2]``` here"}
            }],
            "connections": []
        });
        let compact = serde_json::to_string(&payload).unwrap();
        let extraction = extract(&compact).unwrap();
        assert_eq!(extraction.value, payload);
        assert_eq!(extraction.recovery, Recovery::Direct);

        let pretty = format!("Result:\n{}", serde_json::to_string_pretty(&payload).unwrap());
        let extraction = extract(&pretty).unwrap();
        assert_eq!(extraction.value, payload);
        assert_eq!(extraction.recovery, Recovery::Scanned);
    }

    #[test]
    fn single_line_fence_is_stripped() {
        let extraction = extract("```json {\"a\": \"x```y\"}```").unwrap();
        assert_eq!(extraction.value, json!({"a": "x```y"}));
        assert_eq!(extraction.recovery, Recovery::Fenced);
    }

    #[test]
    fn unclosed_prose_bracket_does_not_hide_payload() {
        let text = r#"Step [1 of 2. Here is the graph: {"nodes": [], "connections": []}"#;
        let extraction = extract(text).unwrap();
        assert_eq!(extraction.value, json!({"nodes": [], "connections": []}));
        assert_eq!(extraction.recovery, Recovery::Scanned);
    }

    #[test]
    fn fragments_of_a_broken_payload_are_not_returned() {
        // The inner objects parse on their own but belong to the broken outer one.
        let text = r#"{"nodes": [{"id": "a"}, {"id": "b", "kind"#;
        let err = extract(text).unwrap_err();
        assert!(err.candidate.is_some_and(|c| c.starts_with(r#"{"nodes""#)));
    }

    #[test]
    fn payload_inside_prose_is_scanned() {
        let payload = json!({
            "nodes": [{"id": "s", "kind": "start", "attributes": {"label": "Go {now} [really]"}}],
            "connections": []
        });
        let text = format!(
            "Sure! Here is the process you asked for:\n{}\nLet me know if you need changes.",
            serde_json::to_string_pretty(&payload).unwrap()
        );
        let extraction = extract(&text).unwrap();
        assert_eq!(extraction.value, payload);
        assert_eq!(extraction.recovery, Recovery::Scanned);
    }

    #[test]
    fn prose_brackets_before_payload_are_skipped() {
        let text = r#"Nodes are listed [see below] as {id, kind} pairs: {"nodes": [{"id": "a"}]} done."#;
        let extraction = extract(text).unwrap();
        assert_eq!(extraction.value, json!({"nodes": [{"id": "a"}]}));
    }

    #[test]
    fn earlier_array_wins_over_later_object() {
        let text = r#"result: [{"id": 1}, {"id": 2}] trailing {"ignored": true}"#;
        assert_eq!(extract(text).unwrap().value, json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let text = r#"output: {"label": "say \"}\" twice", "n": 1} end"#;
        let extraction = extract(text).unwrap();
        assert_eq!(extraction.value, json!({"label": "say \"}\" twice", "n": 1}));
    }

    #[test]
    fn truncated_object_is_closed_and_flagged() {
        let text = r#"Here you go: {"nodes": [{"id": "a", "kind": "start"}, {"id": "b", "kind": "end"}"#;
        let extraction = extract(text).unwrap();
        assert!(extraction.is_degraded());
        assert_eq!(
            extraction.value,
            json!({"nodes": [{"id": "a", "kind": "start"}, {"id": "b", "kind": "end"}]})
        );
    }

    #[test]
    fn truncation_inside_string_and_after_key() {
        let mid_string = extract(r#"{"nodes": [{"id": "a", "label": "Appro"#).unwrap();
        assert_eq!(
            mid_string.value,
            json!({"nodes": [{"id": "a", "label": "Appro"}]})
        );

        let dangling_key = extract(r#"{"a": 1, "b": "#).unwrap();
        assert_eq!(dangling_key.value, json!({"a": 1, "b": null}));

        let dangling_comma = extract("[1, 2, ").unwrap();
        assert_eq!(dangling_comma.value, json!([1, 2]));
        assert!(dangling_comma.is_degraded());
    }

    #[test]
    fn trailing_separators_are_removed() {
        let text = "Result:\n{\"a\": [1, 2,], \"b\": {\"c\": true,},}";
        let extraction = extract(text).unwrap();
        assert_eq!(extraction.value, json!({"a": [1, 2], "b": {"c": true}}));
        assert!(!extraction.is_degraded());
    }

    #[test]
    fn missing_separator_after_closer_is_inserted() {
        let text = r#"x {"a": {"b": {"c": 1}} "d": 2, "e": [{"f": 1} {"f": 2}]}"#;
        let extraction = extract(text).unwrap();
        assert_eq!(
            extraction.value,
            json!({"a": {"b": {"c": 1}}, "d": 2, "e": [{"f": 1}, {"f": 2}]})
        );
    }

    #[test]
    fn repairs_leave_string_contents_alone() {
        let repaired = repair_candidate(r#"{"s": "a,] b} \"c\"",}"#);
        assert_eq!(repaired, r#"{"s": "a,] b} \"c\""}"#);
    }

    #[test]
    fn trailing_content_after_last_closer_is_dropped() {
        assert_eq!(repair_candidate(r#"{"a": 1} trailing"#), r#"{"a": 1}"#);
    }

    #[test]
    fn empty_input_fails_immediately() {
        let err = extract("   \n ").unwrap_err();
        assert_eq!(err.input_length, 5);
        assert!(err.candidate.is_none());
    }

    #[test]
    fn unparseable_text_reports_candidate() {
        let err = extract("Here: {nodes: broken}").unwrap_err();
        assert_eq!(err.input_length, 21);
        assert_eq!(err.candidate.as_deref(), Some("{nodes: broken}"));
        assert!(err.source.is_some());
    }

    #[test]
    fn scalar_is_not_a_structured_value() {
        assert!(extract("42").is_err());
        assert!(extract("\"just text\"").is_err());
    }
}
