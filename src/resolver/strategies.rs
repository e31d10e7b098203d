//! The default extraction cascade steps.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::decode::{DecodeOutcome, ScriptDecoder, decode_base64_literal};
use super::patterns::Candidate;
use super::{ExtractionStrategy, PageContext, StrategyOutcome};

static ATOB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"atob\(\s*["']([^"']+)["']\s*\)"#)
        .unwrap_or_else(|e| panic!("invalid static regex for atob literal: {e}"))
});

/// Builds the default cascade around `decoder`.
#[must_use]
pub fn default_strategies(decoder: Arc<dyn ScriptDecoder>) -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(RawBodyStrategy),
        Box::new(ScriptTagStrategy),
        Box::new(PackedEvalStrategy::new(decoder)),
        Box::new(EncodedLiteralStrategy),
        Box::new(EvalLiteralStrategy),
    ]
}

/// Scans the raw page body.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBodyStrategy;

#[async_trait]
impl ExtractionStrategy for RawBodyStrategy {
    fn name(&self) -> &'static str {
        "raw-body"
    }

    async fn extract(&self, page: &PageContext<'_>) -> StrategyOutcome {
        StrategyOutcome::from_scan(page.patterns.scan(page.body), "no URL in page body")
    }
}

/// Scans the text of each `<script>` element.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptTagStrategy;

impl ScriptTagStrategy {
    fn script_texts(body: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse("script") else {
            return Vec::new();
        };
        let document = Html::parse_document(body);
        document
            .select(&selector)
            .map(|script| script.text().collect::<String>())
            .filter(|text| !text.trim().is_empty())
            .collect()
    }
}

#[async_trait]
impl ExtractionStrategy for ScriptTagStrategy {
    fn name(&self) -> &'static str {
        "script-tags"
    }

    async fn extract(&self, page: &PageContext<'_>) -> StrategyOutcome {
        let scripts = Self::script_texts(page.body);
        if scripts.is_empty() {
            return StrategyOutcome::Nothing {
                reason: "no script elements".to_string(),
            };
        }
        let candidates: Vec<Candidate> = scripts
            .iter()
            .flat_map(|text| page.patterns.scan(text))
            .collect();
        StrategyOutcome::from_scan(candidates, "no URL in script elements")
    }
}

/// Evaluates a `eval(function(p,a,c,k,e,d){...})` payload with the script
/// runtime and scans what it prints.
pub struct PackedEvalStrategy {
    decoder: Arc<dyn ScriptDecoder>,
}

impl PackedEvalStrategy {
    #[must_use]
    pub fn new(decoder: Arc<dyn ScriptDecoder>) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl ExtractionStrategy for PackedEvalStrategy {
    fn name(&self) -> &'static str {
        "packed-eval"
    }

    async fn extract(&self, page: &PageContext<'_>) -> StrategyOutcome {
        let Some(payload) = page
            .eval_payload
            .filter(|p| p.trim_start().starts_with("function"))
        else {
            return StrategyOutcome::Nothing {
                reason: "no packed eval payload".to_string(),
            };
        };

        match self.decoder.decode(payload).await {
            DecodeOutcome::Decoded(clear) => {
                let found = page.patterns.scan(&clear);
                if !found.is_empty() {
                    return StrategyOutcome::Candidates(found);
                }
                debug!(decoder = self.decoder.name(), "decoded script has no URL");
            }
            DecodeOutcome::Failed {
                stdout,
                stderr,
                reason,
            } => {
                debug!(decoder = self.decoder.name(), reason, "scanning runtime output");
                for text in [&stdout, &stderr] {
                    let found = page.patterns.scan(text);
                    if !found.is_empty() {
                        return StrategyOutcome::Candidates(found);
                    }
                }
            }
        }

        StrategyOutcome::from_scan(page.patterns.scan(payload), "packed payload yielded no URL")
    }
}

/// Decodes `atob("...")` literals.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodedLiteralStrategy;

#[async_trait]
impl ExtractionStrategy for EncodedLiteralStrategy {
    fn name(&self) -> &'static str {
        "encoded-literal"
    }

    async fn extract(&self, page: &PageContext<'_>) -> StrategyOutcome {
        let Some(payload) = page.eval_payload else {
            return StrategyOutcome::Nothing {
                reason: "no eval payload".to_string(),
            };
        };
        let Some(encoded) = ATOB_RE
            .captures(payload)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
        else {
            return StrategyOutcome::Nothing {
                reason: "no atob literal".to_string(),
            };
        };

        if let Some(clear) = decode_base64_literal(encoded) {
            let found = page.patterns.scan(&clear);
            if !found.is_empty() {
                return StrategyOutcome::Candidates(found);
            }
        } else {
            debug!("atob literal is not valid base64 text");
        }
        StrategyOutcome::from_scan(page.patterns.scan(payload), "atob literal yielded no URL")
    }
}

/// Last resort: scans the eval payload as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalLiteralStrategy;

#[async_trait]
impl ExtractionStrategy for EvalLiteralStrategy {
    fn name(&self) -> &'static str {
        "eval-literal"
    }

    async fn extract(&self, page: &PageContext<'_>) -> StrategyOutcome {
        match page.eval_payload {
            Some(payload) => {
                StrategyOutcome::from_scan(page.patterns.scan(payload), "no URL in eval payload")
            }
            None => StrategyOutcome::Nothing {
                reason: "no eval payload".to_string(),
            },
        }
    }
}
