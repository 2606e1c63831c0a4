//! # Inspect
//!
//! Static scan of the artifact's bytes against a table of risky call
//! patterns. Works on binaries (imported symbol names survive in the string
//! table) and on scripts alike.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::bytes::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use super::{StageExecutor, StageInput};
use crate::services::{Enricher, Enrichment};

/// A matched risky pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub category: &'static str,
    pub pattern: &'static str,
}

/// (category, display name, byte regex)
const PATTERNS: &[(&str, &str, &str)] = &[
    ("potential buffer overflow", "strcpy", r"\bstrcpy\b"),
    ("potential buffer overflow", "strcat", r"\bstrcat\b"),
    ("potential buffer overflow", "sprintf", r"\bsprintf\b"),
    ("potential buffer overflow", "gets", r"\bgets\b"),
    ("dynamic code evaluation", "eval(", r"\beval\s*\("),
    ("dynamic code evaluation", "new Function(", r"\bnew\s+Function\s*\("),
    ("command execution", "system(", r"\bsystem\s*\("),
    ("command execution", "popen(", r"\bpopen\s*\("),
];

fn pattern_table() -> &'static [(Finding, Regex)] {
    static TABLE: OnceLock<Vec<(Finding, Regex)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        PATTERNS
            .iter()
            .map(|(category, pattern, re)| {
                let regex = Regex::new(&format!("(?-u){}", re)).expect("pattern table is valid");
                (Finding { category, pattern }, regex)
            })
            .collect()
    })
}

/// All table entries that occur in `bytes`, in table order
pub fn scan_patterns(bytes: &[u8]) -> Vec<Finding> {
    pattern_table()
        .iter()
        .filter(|(_, regex)| regex.is_match(bytes))
        .map(|(finding, _)| finding.clone())
        .collect()
}

/// One line per category: `potential buffer overflow: strcpy, gets`
fn render(findings: &[Finding]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for finding in findings {
        grouped.entry(finding.category).or_default().push(finding.pattern);
    }
    grouped
        .into_iter()
        .map(|(category, patterns)| format!("{}: {}", category, patterns.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct InspectStage {
    enricher: Arc<dyn Enricher>,
}

impl InspectStage {
    pub fn new(enricher: Arc<dyn Enricher>) -> Self {
        Self { enricher }
    }
}

#[async_trait]
impl StageExecutor for InspectStage {
    async fn execute(&self, input: StageInput) -> Result<Option<String>> {
        let path = input.artifact_path.context("Inspect requires an artifact")?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let findings = scan_patterns(&bytes);
        tracing::debug!(count = findings.len(), "Static scan finished");
        if findings.is_empty() {
            return Ok(None);
        }

        let report = render(&findings);
        let prompt = format!(
            "A static scan of a {} artifact matched these patterns:\n{}\nAssess how likely they are to be exploitable.",
            input
                .classification
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unclassified".to_string()),
            report
        );
        let text = match self.enricher.enrich(&prompt).await {
            Enrichment::Available(commentary) => format!("{}\n\n{}", report, commentary),
            Enrichment::Unavailable => report,
        };
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NoEnrichment;
    use crate::testing::CannedEnricher;

    #[test]
    fn test_scan_binary_strings() {
        let bytes = b"\x7fELF\0\0libc.so.6\0strcpy\0printf\0system\0gets\0";
        let patterns: Vec<_> = scan_patterns(bytes).iter().map(|f| f.pattern).collect();
        // bare `system` without a call is not a command-execution hit
        assert_eq!(patterns, vec!["strcpy", "gets"]);
    }

    #[test]
    fn test_word_boundaries() {
        assert!(scan_patterns(b"fgets(buf, n, stdin); strncpy(a, b, 4);").is_empty());
        let found = scan_patterns(b"const f = new Function ('return 1'); eval (x)");
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|f| f.category == "dynamic code evaluation"));
    }

    #[test]
    fn test_render_groups_by_category() {
        let text = render(&scan_patterns(b"strcat(a,b); popen(cmd, \"r\"); gets(s);"));
        assert_eq!(
            text,
            "command execution: popen(\npotential buffer overflow: strcat, gets"
        );
    }

    #[tokio::test]
    async fn test_clean_artifact_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean.js");
        std::fs::write(&path, "console.log('hello')").unwrap();

        let stage = InspectStage::new(Arc::new(NoEnrichment));
        let out = stage
            .execute(StageInput {
                artifact_path: Some(path),
                ..StageInput::default()
            })
            .await
            .unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_enrichment_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.js");
        std::fs::write(&path, "eval(userInput)").unwrap();

        let stage = InspectStage::new(Arc::new(CannedEnricher("likely reachable".to_string())));
        let out = stage
            .execute(StageInput {
                artifact_path: Some(path),
                ..StageInput::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert!(out.starts_with("dynamic code evaluation: eval("));
        assert!(out.ends_with("likely reachable"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let stage = InspectStage::new(Arc::new(NoEnrichment));
        let result = stage
            .execute(StageInput {
                artifact_path: Some("/nonexistent/stagehand/a.bin".into()),
                ..StageInput::default()
            })
            .await;
        assert!(result.is_err());
    }
}
