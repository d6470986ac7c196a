//! Pricing table: resource identifier to per-unit cost
//!
//! Rates are USD per 1,000 units. A resource missing from the table
//! prices at zero: absent pricing means free or unknown, never an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share of an estimated total assumed to be input units
pub const INPUT_SHARE_PERCENT: u64 = 70;
/// Share of an estimated total assumed to be output units
pub const OUTPUT_SHARE_PERCENT: u64 = 30;

/// Per-1K-unit rates for one resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per 1,000 input units
    #[serde(alias = "input")]
    pub prompt: f64,
    /// USD per 1,000 output units
    #[serde(alias = "output")]
    pub completion: f64,
}

impl ModelPricing {
    pub const fn new(prompt: f64, completion: f64) -> Self {
        Self { prompt, completion }
    }

    /// Cost of a usage in USD
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.input_units as f64 / 1000.0) * self.prompt
            + (usage.output_units as f64 / 1000.0) * self.completion
    }

    pub fn is_free(&self) -> bool {
        self.prompt == 0.0 && self.completion == 0.0
    }
}

/// Unit counts for one call, estimated or actual
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(rename = "promptTokens", alias = "input_units", default)]
    pub input_units: u64,
    #[serde(rename = "completionTokens", alias = "output_units", default)]
    pub output_units: u64,
    #[serde(rename = "totalTokens", alias = "total_units", default)]
    pub total_units: u64,
}

impl Usage {
    pub fn new(input_units: u64, output_units: u64) -> Self {
        Self {
            input_units,
            output_units,
            total_units: input_units.saturating_add(output_units),
        }
    }

    /// Split an estimated total 70/30 into input and output, rounding each down
    pub fn from_estimate(total_units: u64) -> Self {
        let share = |percent: u64| (total_units as u128 * percent as u128 / 100) as u64;
        Self {
            input_units: share(INPUT_SHARE_PERCENT),
            output_units: share(OUTPUT_SHARE_PERCENT),
            total_units,
        }
    }

    /// Fill in a missing total from its parts
    pub fn normalized(self) -> Self {
        if self.total_units == 0 {
            Self::new(self.input_units, self.output_units)
        } else {
            self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input_units == 0 && self.output_units == 0 && self.total_units == 0
    }
}

/// Static mapping from resource identifier to rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricingTable {
    rates: BTreeMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::from_rates([
            ("openai/gpt-4o", ModelPricing::new(0.0025, 0.01)),
            ("anthropic/claude-sonnet-4-5", ModelPricing::new(0.003, 0.015)),
            ("anthropic/claude-opus-4-5", ModelPricing::new(0.015, 0.075)),
            ("anthropic/claude-haiku-4", ModelPricing::new(0.00025, 0.00125)),
            ("google/gemini-2.0-flash-exp", ModelPricing::new(0.0, 0.0)),
        ])
    }
}

impl PricingTable {
    /// An empty table; every lookup prices at zero
    pub fn empty() -> Self {
        Self {
            rates: BTreeMap::new(),
        }
    }

    pub fn from_rates<I, K>(rates: I) -> Self
    where
        I: IntoIterator<Item = (K, ModelPricing)>,
        K: Into<String>,
    {
        Self {
            rates: rates.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Layer overrides on top of this table
    pub fn with_overrides(mut self, overrides: &BTreeMap<String, ModelPricing>) -> Self {
        self.rates
            .extend(overrides.iter().map(|(k, v)| (k.clone(), *v)));
        self
    }

    pub fn get(&self, resource: &str) -> Option<&ModelPricing> {
        self.rates.get(resource)
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.rates.contains_key(resource)
    }

    /// Rates for a resource, zero when unknown
    pub fn lookup(&self, resource: &str) -> ModelPricing {
        self.get(resource).copied().unwrap_or_default()
    }

    /// Cost of a usage on a resource in USD
    pub fn cost(&self, resource: &str, usage: &Usage) -> f64 {
        self.lookup(resource).cost(usage)
    }

    /// Cost of explicit input and output counts in USD
    pub fn estimate_cost(&self, resource: &str, input_units: u64, output_units: u64) -> f64 {
        self.cost(resource, &Usage::new(input_units, output_units))
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.rates.keys().map(String::as_str)
    }
}

/// Split a `provider/model` identifier. Requires exactly one `/`.
pub fn parse_resource_id(resource: &str) -> Option<(&str, &str)> {
    let mut parts = resource.split('/');
    let provider = parts.next()?.trim();
    let model = parts.next()?.trim();
    if parts.next().is_some() || provider.is_empty() || model.is_empty() {
        return None;
    }
    Some((provider, model))
}
