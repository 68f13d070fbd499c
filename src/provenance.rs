//! Provenance collection: walking an extracted-facts JSON tree and pulling
//! out the `(page_number, text_snippet)` records worth annotating.
//!
//! The walk carries an explicit, immutable context value (current module,
//! nearest section number, dotted path) down each recursive call, so the
//! module attribution of one subtree can never leak into a sibling.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Snippets shorter than this are unanchorable noise and are rejected.
const MIN_SNIPPET_CHARS: usize = 5;

const PROVENANCE_KEY: &str = "provenance";
const SECTION_NUMBER_KEY: &str = "section_number";
const DEFAULT_MODULE: &str = "General";

/// Section keys in the fact tree mapped to reader-facing module names.
const SECTION_MODULES: &[(&str, &str)] = &[
    ("study_design", "Study Design"),
    ("eligibility_criteria", "Eligibility"),
    ("endpoints", "Endpoints"),
    ("interventions", "Interventions"),
    ("visit_schedule", "Visit Schedule"),
    ("assessments", "Assessments"),
    ("safety_monitoring", "Safety Monitoring"),
    ("adverse_events", "Adverse Events"),
    ("concomitant_medications", "Concomitant Medications"),
    ("statistics", "Statistical Analysis"),
];

/// Structural keys that never contain annotatable facts.
const SKIP_KEYS: &[&str] = &[
    "metadata",
    "extraction_info",
    "model_info",
    "token_usage",
    "timings",
    "schema_version",
];

/// One annotatable fact: where it came from in the tree and where it claims
/// to live in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceItem {
    /// Dotted path of the walk, e.g. `eligibility_criteria.inclusion[2].provenance`.
    pub field_path: String,
    /// Last meaningful path segment; a trailing `provenance` segment
    /// collapses to its parent.
    pub field_name: String,
    /// Module attribution from the section table, `"General"` outside any
    /// known section.
    pub module_name: String,
    /// 1-based page the snippet claims to appear on.
    pub page_number: u32,
    /// Verbatim text the extractor says justifies the fact.
    pub text_snippet: String,
    /// Nearest section number seen on the walk, if any.
    pub section_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub total_found: usize,
    pub unique_after_dedup: usize,
    pub pages_covered: usize,
    pub per_module: BTreeMap<String, usize>,
}

/// Context handed down the recursion. Cloned, never mutated in place.
#[derive(Debug, Clone)]
struct WalkContext {
    module: String,
    section_number: Option<String>,
    path: String,
}

impl WalkContext {
    fn root() -> Self {
        Self {
            module: DEFAULT_MODULE.to_string(),
            section_number: None,
            path: String::new(),
        }
    }

    fn child(&self, segment: &str) -> Self {
        let path = if self.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}.{}", self.path, segment)
        };
        Self {
            module: self.module.clone(),
            section_number: self.section_number.clone(),
            path,
        }
    }

    fn element(&self, index: usize) -> Self {
        Self {
            module: self.module.clone(),
            section_number: self.section_number.clone(),
            path: format!("{}[{}]", self.path, index),
        }
    }
}

#[derive(Debug, Default)]
pub struct ProvenanceCollector;

impl ProvenanceCollector {
    pub fn new() -> Self {
        Self
    }

    /// Depth-first walk of the fact tree. Rejected records are logged and
    /// dropped; the walk itself never fails.
    pub fn collect(&self, root: &Value) -> Vec<ProvenanceItem> {
        let mut items = Vec::new();
        let mut rejected = 0usize;
        self.walk(root, &WalkContext::root(), &mut items, &mut rejected);
        debug!(
            found = items.len(),
            rejected, "provenance collection finished"
        );
        items
    }

    fn walk(
        &self,
        node: &Value,
        ctx: &WalkContext,
        out: &mut Vec<ProvenanceItem>,
        rejected: &mut usize,
    ) {
        match node {
            Value::Object(map) => {
                // A sibling section_number scopes every record in this subtree.
                let ctx = match map.get(SECTION_NUMBER_KEY).and_then(Value::as_str) {
                    Some(sn) if !sn.trim().is_empty() => {
                        let mut scoped = ctx.clone();
                        scoped.section_number = Some(sn.trim().to_string());
                        scoped
                    }
                    _ => ctx.clone(),
                };

                if let Some(prov) = map.get(PROVENANCE_KEY) {
                    self.try_emit(prov, &ctx, out, rejected);
                }

                for (key, child) in map {
                    if key == PROVENANCE_KEY || SKIP_KEYS.contains(&key.as_str()) {
                        continue;
                    }
                    let mut child_ctx = ctx.child(key);
                    if let Some(module) = section_module(key) {
                        child_ctx.module = module.to_string();
                    }
                    self.walk(child, &child_ctx, out, rejected);
                }
            }
            Value::Array(arr) => {
                for (index, child) in arr.iter().enumerate() {
                    self.walk(child, &ctx.element(index), out, rejected);
                }
            }
            _ => {}
        }
    }

    fn try_emit(
        &self,
        prov: &Value,
        ctx: &WalkContext,
        out: &mut Vec<ProvenanceItem>,
        rejected: &mut usize,
    ) {
        let field_path = if ctx.path.is_empty() {
            PROVENANCE_KEY.to_string()
        } else {
            format!("{}.{}", ctx.path, PROVENANCE_KEY)
        };

        let Some(obj) = prov.as_object() else {
            warn!(path = %field_path, "provenance record is not an object, rejected");
            *rejected += 1;
            return;
        };

        let page = obj.get("page_number").and_then(Value::as_u64);
        let snippet = obj
            .get("text_snippet")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();

        let page = match page {
            Some(p) if (1..=u64::from(u32::MAX)).contains(&p) => p as u32,
            _ => {
                warn!(path = %field_path, "provenance record has no valid page_number, rejected");
                *rejected += 1;
                return;
            }
        };
        if snippet.chars().count() < MIN_SNIPPET_CHARS {
            warn!(
                path = %field_path,
                page,
                "provenance snippet shorter than {MIN_SNIPPET_CHARS} chars, rejected"
            );
            *rejected += 1;
            return;
        }

        let section_number = obj
            .get(SECTION_NUMBER_KEY)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| ctx.section_number.clone());

        out.push(ProvenanceItem {
            field_name: field_name_of(&ctx.path),
            field_path,
            module_name: ctx.module.clone(),
            page_number: page,
            text_snippet: snippet.to_string(),
            section_number,
        });
    }
}

fn section_module(key: &str) -> Option<&'static str> {
    SECTION_MODULES
        .iter()
        .find(|(section, _)| *section == key)
        .map(|(_, module)| *module)
}

/// Last meaningful segment of a dotted path; the whole document when empty.
fn field_name_of(path: &str) -> String {
    path.rsplit('.')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

/// Stable first-occurrence-wins dedup keyed on `(page_number, text_snippet)`.
pub fn dedup(items: Vec<ProvenanceItem>) -> Vec<ProvenanceItem> {
    let mut seen: HashSet<(u32, String)> = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert((item.page_number, item.text_snippet.clone())))
        .collect()
}

/// Groups items by page, preserving within-page input order.
pub fn group_by_page(items: &[ProvenanceItem]) -> BTreeMap<u32, Vec<ProvenanceItem>> {
    let mut pages: BTreeMap<u32, Vec<ProvenanceItem>> = BTreeMap::new();
    for item in items {
        pages.entry(item.page_number).or_default().push(item.clone());
    }
    pages
}

/// Groups items by module attribution.
pub fn group_by_module(items: &[ProvenanceItem]) -> BTreeMap<String, Vec<ProvenanceItem>> {
    let mut modules: BTreeMap<String, Vec<ProvenanceItem>> = BTreeMap::new();
    for item in items {
        modules
            .entry(item.module_name.clone())
            .or_default()
            .push(item.clone());
    }
    modules
}

pub fn collection_stats(total_found: usize, deduped: &[ProvenanceItem]) -> CollectionStats {
    let pages: HashSet<u32> = deduped.iter().map(|i| i.page_number).collect();
    let mut per_module: BTreeMap<String, usize> = BTreeMap::new();
    for item in deduped {
        *per_module.entry(item.module_name.clone()).or_default() += 1;
    }
    CollectionStats {
        total_found,
        unique_after_dedup: deduped.len(),
        pages_covered: pages.len(),
        per_module,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(value: &Value) -> Vec<ProvenanceItem> {
        ProvenanceCollector::new().collect(value)
    }

    fn item(page: u32, snippet: &str) -> ProvenanceItem {
        ProvenanceItem {
            field_path: format!("f{page}.provenance"),
            field_name: format!("f{page}"),
            module_name: "General".into(),
            page_number: page,
            text_snippet: snippet.into(),
            section_number: None,
        }
    }

    // ── collection walk ──

    #[test]
    fn collects_nested_records_with_paths() {
        let tree = json!({
            "eligibility_criteria": {
                "inclusion": [
                    {
                        "text": "Age 18 or older",
                        "provenance": { "page_number": 4, "text_snippet": "Subjects aged 18 years or older" }
                    }
                ]
            }
        });
        let items = collect(&tree);
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].field_path,
            "eligibility_criteria.inclusion[0].provenance"
        );
        assert_eq!(items[0].field_name, "inclusion[0]");
        assert_eq!(items[0].module_name, "Eligibility");
        assert_eq!(items[0].page_number, 4);
    }

    #[test]
    fn module_defaults_to_general_outside_known_sections() {
        let tree = json!({
            "sponsor": {
                "name": "Acme Trials",
                "provenance": { "page_number": 1, "text_snippet": "Sponsored by Acme Trials Inc." }
            }
        });
        let items = collect(&tree);
        assert_eq!(items[0].module_name, "General");
        assert_eq!(items[0].field_name, "sponsor");
    }

    #[test]
    fn sibling_module_contexts_do_not_leak() {
        let tree = json!({
            "endpoints": {
                "primary": {
                    "provenance": { "page_number": 9, "text_snippet": "Overall survival at 24 months" }
                }
            },
            "zz_after": {
                "provenance": { "page_number": 2, "text_snippet": "General administrative note" }
            }
        });
        let mut items = collect(&tree);
        items.sort_by_key(|i| i.page_number);
        assert_eq!(items[0].module_name, "General");
        assert_eq!(items[1].module_name, "Endpoints");
    }

    #[test]
    fn section_number_scopes_the_subtree_and_prov_override_wins() {
        let tree = json!({
            "study_design": {
                "section_number": "3.1",
                "arms": {
                    "provenance": { "page_number": 7, "text_snippet": "Two-arm randomized design" }
                },
                "blinding": {
                    "provenance": {
                        "page_number": 8,
                        "text_snippet": "Double-blind throughout",
                        "section_number": "3.2"
                    }
                }
            }
        });
        let mut items = collect(&tree);
        items.sort_by_key(|i| i.page_number);
        assert_eq!(items[0].section_number.as_deref(), Some("3.1"));
        assert_eq!(items[1].section_number.as_deref(), Some("3.2"));
    }

    #[test]
    fn skip_keys_are_never_descended() {
        let tree = json!({
            "metadata": {
                "provenance": { "page_number": 1, "text_snippet": "Should never be collected" }
            },
            "real": {
                "provenance": { "page_number": 2, "text_snippet": "Should be collected here" }
            }
        });
        let items = collect(&tree);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].page_number, 2);
    }

    #[test]
    fn contract_violations_are_rejected() {
        let tree = json!({
            "a": { "provenance": { "page_number": 0, "text_snippet": "Valid length text" } },
            "b": { "provenance": { "page_number": 3, "text_snippet": "tiny" } },
            "c": { "provenance": { "page_number": 3 } },
            "d": { "provenance": "not an object" },
            "e": { "provenance": { "page_number": 5, "text_snippet": "  padded but long enough  " } }
        });
        let items = collect(&tree);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text_snippet, "padded but long enough");
    }

    #[test]
    fn root_level_provenance_is_named_document() {
        let tree = json!({
            "provenance": { "page_number": 1, "text_snippet": "Title page of the protocol" }
        });
        let items = collect(&tree);
        assert_eq!(items[0].field_name, "document");
        assert_eq!(items[0].field_path, "provenance");
    }

    // ── dedup ──

    #[test]
    fn dedup_keeps_first_occurrence() {
        let a = item(1, "same text here");
        let mut b = item(1, "same text here");
        b.field_name = "later".into();
        let c = item(1, "different text");
        let out = dedup(vec![a.clone(), b, c.clone()]);
        assert_eq!(out, vec![a, c]);
    }

    #[test]
    fn dedup_is_idempotent() {
        let items = vec![item(1, "alpha text"), item(1, "alpha text"), item(2, "beta text")];
        let once = dedup(items);
        let twice = dedup(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn same_snippet_on_different_pages_survives() {
        let out = dedup(vec![item(1, "repeated header"), item(2, "repeated header")]);
        assert_eq!(out.len(), 2);
    }

    // ── grouping and stats ──

    #[test]
    fn grouping_preserves_within_page_order() {
        let first = item(3, "first on page");
        let second = item(3, "second on page");
        let grouped = group_by_page(&[first.clone(), item(1, "page one"), second.clone()]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&3], vec![first, second]);
    }

    #[test]
    fn stats_count_pages_and_modules() {
        let mut a = item(1, "alpha text");
        a.module_name = "Eligibility".into();
        let b = item(1, "beta text");
        let c = item(4, "gamma text");
        let stats = collection_stats(5, &[a, b, c]);
        assert_eq!(stats.total_found, 5);
        assert_eq!(stats.unique_after_dedup, 3);
        assert_eq!(stats.pages_covered, 2);
        assert_eq!(stats.per_module["General"], 2);
        assert_eq!(stats.per_module["Eligibility"], 1);
    }
}
