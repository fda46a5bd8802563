//! Pricing collaborator and cost arithmetic.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use genflow_jobs::JobKind;

const TOKENS_PER_UNIT: f64 = 1_000_000.0;

/// Prices for one provider/model pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub input_per_million: f64,
    pub output_per_million: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_price: Option<f64>,
}

impl PriceQuote {
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            image_price: None,
        }
    }

    pub fn with_image_price(mut self, price: f64) -> Self {
        self.image_price = Some(price);
        self
    }

    pub fn free() -> Self {
        Self::per_million(0.0, 0.0)
    }

    /// `tokens_in × input/1e6 + tokens_out × output/1e6`.
    pub fn token_cost(&self, tokens_in: u64, tokens_out: u64) -> f64 {
        tokens_in as f64 * self.input_per_million / TOKENS_PER_UNIT
            + tokens_out as f64 * self.output_per_million / TOKENS_PER_UNIT
    }

    /// Token cost plus the flat image price for image jobs.
    pub fn cost_for(&self, kind: JobKind, tokens_in: u64, tokens_out: u64) -> f64 {
        let tokens = self.token_cost(tokens_in, tokens_out);
        match (kind, self.image_price) {
            (JobKind::Image, Some(image)) => tokens + image,
            _ => tokens,
        }
    }
}

/// Price lookup by provider and model, falling back to the provider default.
pub trait Pricing: Send + Sync {
    fn price_for(&self, provider: &str, model: &str) -> Option<PriceQuote>;
}

impl<P> Pricing for Arc<P>
where
    P: Pricing + ?Sized,
{
    fn price_for(&self, provider: &str, model: &str) -> Option<PriceQuote> {
        (**self).price_for(provider, model)
    }
}

/// Static, in-memory price table.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    models: HashMap<(String, String), PriceQuote>,
    provider_defaults: HashMap<String, PriceQuote>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_price(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        quote: PriceQuote,
    ) -> Self {
        self.models.insert((provider.into(), model.into()), quote);
        self
    }

    pub fn with_provider_default(mut self, provider: impl Into<String>, quote: PriceQuote) -> Self {
        self.provider_defaults.insert(provider.into(), quote);
        self
    }
}

impl Pricing for PriceTable {
    fn price_for(&self, provider: &str, model: &str) -> Option<PriceQuote> {
        self.models
            .get(&(provider.to_string(), model.to_string()))
            .or_else(|| self.provider_defaults.get(provider))
            .copied()
    }
}
