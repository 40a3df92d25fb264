//! Step-content search over a catalog snapshot.
//!
//! Case-insensitive substring match across step titles and bodies, with a
//! short snippet around the first hit. Deterministic: results come back in
//! catalog (course key, module, step) order.

use serde::Serialize;

use crate::models::{CatalogSnapshot, StepType};

/// Characters of context shown on each side of a match.
const SNIPPET_CONTEXT: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub course_key: String,
    pub module_id: String,
    pub step_type: StepType,
    pub snippet: String,
}

pub fn search_catalog(
    catalog: &CatalogSnapshot,
    query: &str,
    level_filter: Option<&str>,
) -> Vec<SearchHit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for course in catalog.courses.values() {
        if let Some(level) = level_filter {
            if !course.level.eq_ignore_ascii_case(level) {
                continue;
            }
        }
        for module in &course.modules {
            for step in &module.steps {
                let snippet = if step.title.to_lowercase().contains(&needle) {
                    Some(step.title.clone())
                } else {
                    find_case_insensitive(&step.body, &needle)
                        .map(|(pos, len)| make_snippet(&step.body, pos, len))
                };
                if let Some(snippet) = snippet {
                    hits.push(SearchHit {
                        course_key: course.course_key.clone(),
                        module_id: module.module_id.clone(),
                        step_type: step.step_type,
                        snippet,
                    });
                }
            }
        }
    }
    hits
}

/// Locate a lowercased needle in the original body, returning the match's
/// byte offset and length in the ORIGINAL string. Lowercasing can change
/// byte length (e.g. `İ` lowers to two chars), so offsets into a lowered
/// copy of the whole body cannot be used to slice the original.
fn find_case_insensitive(body: &str, needle: &str) -> Option<(usize, usize)> {
    for (start, _) in body.char_indices() {
        let mut lowered = String::new();
        let mut consumed = 0;
        for c in body[start..].chars() {
            lowered.extend(c.to_lowercase());
            consumed += c.len_utf8();
            if lowered.len() >= needle.len() {
                break;
            }
        }
        if lowered.starts_with(needle) {
            return Some((start, consumed));
        }
    }
    None
}

/// Window of text around a match, clamped to char boundaries, newlines
/// flattened for single-line display.
fn make_snippet(body: &str, pos: usize, match_len: usize) -> String {
    let start = floor_char_boundary(body, pos.saturating_sub(SNIPPET_CONTEXT));
    let end = ceil_char_boundary(body, (pos + match_len + SNIPPET_CONTEXT).min(body.len()));

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(body[start..end].trim());
    if end < body.len() {
        snippet.push_str("...");
    }
    snippet.replace('\n', " ")
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
