//! Stream resolution: turning an obfuscated page into ranked stream variants.
//!
//! # Architecture
//!
//! - [`Resolver`] - Fetches the page and runs the extraction cascade
//! - [`ExtractionStrategy`] - Async trait each cascade step implements
//! - [`StrategyOutcome`] - Tagged result of one step; failures never escape a step
//! - [`PatternSet`] / [`QualityTable`] - URL-shape matching and height assignment
//! - [`ScriptDecoder`] - Capability evaluating packed scripts (Node.js by default)
//!
//! The default cascade is, in order: `raw-body`, `script-tags`,
//! `packed-eval`, `encoded-literal`, `eval-literal`. The first step producing
//! candidates wins.

mod decode;
mod patterns;
mod strategies;

pub use decode::{DecodeOutcome, NodeScriptDecoder, ScriptDecoder, decode_base64_literal};
pub use patterns::{Candidate, PatternSet, QualityTable, VIDEO_EXTENSIONS};
pub use strategies::{
    EncodedLiteralStrategy, EvalLiteralStrategy, PackedEvalStrategy, RawBodyStrategy,
    ScriptTagStrategy, default_strategies,
};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::StreamError;
use crate::http::HttpClient;

/// One playable rendition of the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamVariant {
    /// Absolute manifest (or media) URL.
    pub url: String,
    /// Height tier from the quality table.
    pub resolution_height: u32,
    /// `resolution_height * 1000`; used only for tie-free display.
    pub approx_bandwidth: u64,
}

/// Outcome of a single cascade step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The step found URLs.
    Candidates(Vec<Candidate>),
    /// The step found nothing; `reason` is logged.
    Nothing { reason: String },
}

impl StrategyOutcome {
    /// Wraps a scan result, turning an empty list into [`Self::Nothing`].
    #[must_use]
    pub fn from_scan(candidates: Vec<Candidate>, empty_reason: &str) -> Self {
        if candidates.is_empty() {
            Self::Nothing {
                reason: empty_reason.to_string(),
            }
        } else {
            Self::Candidates(candidates)
        }
    }
}

/// Everything a strategy may look at.
#[derive(Debug)]
pub struct PageContext<'a> {
    /// The raw page body.
    pub body: &'a str,
    /// Argument of the first `eval(...)` line, if any.
    pub eval_payload: Option<&'a str>,
    /// Pattern set to scan with.
    pub patterns: &'a PatternSet,
}

impl<'a> PageContext<'a> {
    /// Builds the context, locating the eval payload once.
    #[must_use]
    pub fn new(body: &'a str, patterns: &'a PatternSet) -> Self {
        Self {
            body,
            eval_payload: find_eval_payload(body),
            patterns,
        }
    }
}

/// One named step of the extraction cascade.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the step. Must not panic or error; absence is an outcome.
    async fn extract(&self, page: &PageContext<'_>) -> StrategyOutcome;
}

/// Fetches a page and ranks the stream variants hidden in it.
pub struct Resolver {
    client: HttpClient,
    patterns: PatternSet,
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("strategies", &self.strategy_names())
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Creates a resolver with the default cascade.
    #[must_use]
    pub fn new(client: HttpClient, table: QualityTable, decoder: Arc<dyn ScriptDecoder>) -> Self {
        Self::with_strategies(client, table, default_strategies(decoder))
    }

    /// Creates a resolver with an explicit cascade, tried in order.
    #[must_use]
    pub fn with_strategies(
        client: HttpClient,
        table: QualityTable,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        Self {
            client,
            patterns: PatternSet::new(table),
            strategies,
        }
    }

    /// Cascade step names in order.
    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Fetches `page_url` and returns its variants, highest resolution first.
    ///
    /// # Errors
    ///
    /// - [`StreamError::InvalidUrl`] if `page_url` does not parse
    /// - [`StreamError::PageFetchFailed`] on transport failure or non-success status
    /// - [`StreamError::NoVariantsFound`] if every strategy came back empty
    #[instrument(skip(self), fields(strategies = self.strategies.len()))]
    pub async fn resolve(&self, page_url: &str) -> Result<Vec<StreamVariant>, StreamError> {
        let page = Url::parse(page_url)
            .map_err(|e| StreamError::invalid_url(page_url, e.to_string()))?;

        let headers = self.client.headers().with_origin_of(&page);
        let body = self
            .client
            .get_text(page.as_str(), headers)
            .await
            .map_err(|e| StreamError::page_fetch_failed(page_url, e.to_string()))?;

        debug!(bytes = body.len(), "page fetched");
        self.resolve_body(page_url, &body).await
    }

    /// Runs the cascade over an already fetched page body.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NoVariantsFound`] if no strategy finds anything.
    pub async fn resolve_body(
        &self,
        page_url: &str,
        body: &str,
    ) -> Result<Vec<StreamVariant>, StreamError> {
        let context = PageContext::new(body, &self.patterns);

        for strategy in &self.strategies {
            debug!(strategy = strategy.name(), "trying extraction strategy");
            match strategy.extract(&context).await {
                StrategyOutcome::Candidates(candidates) => {
                    let variants = rank_variants(candidates, self.patterns.table());
                    info!(
                        strategy = strategy.name(),
                        variants = variants.len(),
                        "stream variants found"
                    );
                    return Ok(variants);
                }
                StrategyOutcome::Nothing { reason } => {
                    debug!(strategy = strategy.name(), reason, "strategy found nothing");
                }
            }
        }

        Err(StreamError::no_variants(page_url, self.strategies.len()))
    }
}

/// Deduplicates by URL (first occurrence wins), assigns heights, and sorts
/// by height descending. The sort is stable.
#[must_use]
pub fn rank_variants(candidates: Vec<Candidate>, table: &QualityTable) -> Vec<StreamVariant> {
    let mut seen = HashSet::new();
    let mut variants: Vec<StreamVariant> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.url.clone()))
        .map(|c| {
            let height = table.height_for(&c);
            StreamVariant {
                url: c.url,
                resolution_height: height,
                approx_bandwidth: u64::from(height) * 1000,
            }
        })
        .collect();
    variants.sort_by(|a, b| b.resolution_height.cmp(&a.resolution_height));
    variants
}

/// Returns the argument of the first line that contains `eval(`.
fn find_eval_payload(body: &str) -> Option<&str> {
    let line = body.lines().find(|line| line.contains("eval("))?;
    let start = line.find("eval(")? + "eval(".len();
    let end = line.rfind(')')?;
    (end > start).then(|| &line[start..end])
}
