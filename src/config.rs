use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::TextBackend;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_CZK_PER_USD: f64 = 23.5;

/// Prompt-requested record keys, also used as the header of an empty export.
pub const DEFAULT_COLUMNS: [&str; 6] = [
    "consignment_note",
    "gross_weight_kg",
    "hs_codes",
    "mrn_pages",
    "packages",
    "volume_m3",
];

pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"You are extracting shipment data from a logistics PDF that bundles consignment notes with customs export declarations (MRN documents).

For every consignment note in the document return one JSON object with these keys:
- "consignment_note": the consignment note number as a string
- "gross_weight_kg": total gross weight in kilograms as a number (use a dot as decimal separator)
- "packages": total number of packages (colli) as an integer
- "volume_m3": total volume in cubic metres as a number
- "hs_codes": array of 8-digit HS commodity codes found on the MRN pages that belong to this consignment, in document order, duplicates kept
- "mrn_pages": array of 1-based page numbers of the MRN (customs declaration) pages that belong to this consignment

Use null for values that are not present. Do not invent values."#;

pub const JSON_ARRAY_SUFFIX: &str =
    "Return ONLY a JSON array, starting with '[' and ending with ']'.";

pub const USER_INSTRUCTION: &str = "Extract all data from this PDF document according to the instructions above. Return only a valid JSON array.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    /// Prices applied once the prompt exceeds `extended_threshold_tokens`.
    pub extended: Option<ExtendedPricing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedPricing {
    pub threshold_tokens: u64,
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cost {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    pub input_cost: f64,
    pub output_cost: f64,
}

impl Cost {
    pub fn total(&self) -> f64 {
        self.input_cost + self.output_cost
    }
}

/// USD prices per million tokens, keyed by model name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    pub models: BTreeMap<String, ModelPricing>,
    pub default_model: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "gemini-2.5-flash".to_string(),
            ModelPricing {
                input_per_million: 0.075,
                output_per_million: 0.30,
                extended: None,
            },
        );
        models.insert(
            "gemini-2.5-flash-lite".to_string(),
            ModelPricing {
                input_per_million: 0.10,
                output_per_million: 0.40,
                extended: None,
            },
        );
        models.insert(
            "gemini-1.5-pro".to_string(),
            ModelPricing {
                input_per_million: 1.25,
                output_per_million: 10.00,
                extended: Some(ExtendedPricing {
                    threshold_tokens: 200_000,
                    input_per_million: 2.50,
                    output_per_million: 15.00,
                }),
            },
        );
        models.insert(
            "gemini-1.5-flash".to_string(),
            ModelPricing {
                input_per_million: 0.075,
                output_per_million: 0.30,
                extended: None,
            },
        );

        Self {
            models,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl PricingTable {
    /// Exact name first, then the longest key that is a substring of the model
    /// name or contains it, then the default entry.
    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        let model_key = model.trim().to_ascii_lowercase();
        if let Some(pricing) = self.models.get(&model_key) {
            return Some(pricing);
        }

        self.models
            .iter()
            .filter(|(key, _)| {
                let key = key.to_ascii_lowercase();
                model_key.contains(&key) || key.contains(&model_key)
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(_, pricing)| pricing)
            .or_else(|| self.models.get(&self.default_model))
    }

    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> Cost {
        let Some(pricing) = self.lookup(model) else {
            return Cost {
                input_price_per_million: 0.0,
                output_price_per_million: 0.0,
                input_cost: 0.0,
                output_cost: 0.0,
            };
        };

        let (input_price, output_price) = match &pricing.extended {
            Some(extended) if prompt_tokens > extended.threshold_tokens => {
                (extended.input_per_million, extended.output_per_million)
            }
            _ => (pricing.input_per_million, pricing.output_per_million),
        };

        Cost {
            input_price_per_million: input_price,
            output_price_per_million: output_price,
            input_cost: prompt_tokens as f64 / 1_000_000.0 * input_price,
            output_cost: completion_tokens as f64 / 1_000_000.0 * output_price,
        }
    }
}

/// Everything the pipeline needs, passed in explicitly by the caller.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub model_name: String,
    pub prompt: String,
    pub pricing_table: PricingTable,
    pub request_timeout_seconds: u64,
    pub text_backend: TextBackend,
    pub heuristic_fallback: bool,
    pub czk_per_usd: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_EXTRACTION_PROMPT.to_string(),
            pricing_table: PricingTable::default(),
            request_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            text_backend: TextBackend::Auto,
            heuristic_fallback: true,
            czk_per_usd: DEFAULT_CZK_PER_USD,
        }
    }
}

impl PipelineConfig {
    /// Prompt as sent to the model, with the strict-array instruction appended.
    pub fn system_prompt(&self) -> String {
        format!("{}\n\n{}", self.prompt.trim_end(), JSON_ARRAY_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_matches_model_variants_by_substring() {
        let table = PricingTable::default();
        let pricing = table
            .lookup("models/gemini-2.5-flash-lite-preview")
            .expect("variant should resolve");
        assert_eq!(pricing.input_per_million, 0.10);

        let pricing = table.lookup("GEMINI-1.5-PRO").expect("case-insensitive");
        assert_eq!(pricing.output_per_million, 10.00);
    }

    #[test]
    fn unknown_model_uses_default_pricing() {
        let table = PricingTable::default();
        let pricing = table.lookup("some-other-model").expect("default entry");
        assert_eq!(pricing.input_per_million, 0.075);
    }

    #[test]
    fn extended_pricing_applies_above_threshold() {
        let table = PricingTable::default();
        let below = table.cost("gemini-1.5-pro", 100_000, 1_000);
        assert_eq!(below.input_price_per_million, 1.25);

        let above = table.cost("gemini-1.5-pro", 250_000, 1_000);
        assert_eq!(above.input_price_per_million, 2.50);
        assert_eq!(above.output_price_per_million, 15.00);
        assert!((above.input_cost - 0.625).abs() < 1e-9);
        assert!((above.output_cost - 0.015).abs() < 1e-9);
    }

    #[test]
    fn system_prompt_appends_json_array_instruction() {
        let config = PipelineConfig {
            prompt: "Extract things.\n".to_string(),
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.system_prompt(),
            format!("Extract things.\n\n{JSON_ARRAY_SUFFIX}")
        );
    }
}
