use regex::Regex;
use serde_json::Value;

use crate::classify::PageClassification;
use crate::model::{CONSIGNMENT_NOTE_FIELD, ExtractedRecord, MRN_PAGES_FIELD, Page};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ShipmentTotal {
    packages: String,
    gross_weight_kg: String,
    volume_m3: String,
}

/// Deterministic record extraction from page text, used when the model
/// answered but returned no records.
///
/// One record per consignment note page; MRN pages are the classifier MRN
/// pages strictly between that page and the next consignment note.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    cn_number_regex: Regex,
    eight_digit_regex: Regex,
    shipment_total_regex: Regex,
    hs_code_regex: Regex,
}

impl Default for HeuristicExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self {
            cn_number_regex: Regex::new(r"(?i)consignment\s+note[^0-9]{0,50}(\d{6,12})")
                .expect("valid consignment number regex"),
            eight_digit_regex: Regex::new(r"\b(\d{8})\b").expect("valid eight digit regex"),
            shipment_total_regex: Regex::new(
                r"(?i)shipment\s+total:\s*(\d+)\s*colli\s+([0-9][0-9.,]*)\s+([0-9][0-9.,]*)",
            )
            .expect("valid shipment total regex"),
            hs_code_regex: Regex::new(r"(?i)\b[0-9A-Z]*BP\d+\s+CZ\s+(\d{8})\b")
                .expect("valid hs code regex"),
        }
    }

    pub fn extract(
        &self,
        pages: &[Page],
        classification: &PageClassification,
    ) -> Vec<ExtractedRecord> {
        let cn_pages = &classification.consignment_note_pages;
        let mut records = Vec::new();

        for (index, cn_page) in cn_pages.iter().enumerate() {
            let next_cn = cn_pages.get(index + 1).copied().unwrap_or(u32::MAX);
            let mrn_pages = classification
                .mrn_pages
                .iter()
                .copied()
                .filter(|page| *page > *cn_page && *page < next_cn)
                .collect::<Vec<u32>>();

            let cn_text = page_text(pages, *cn_page);
            let cn_number = self.cn_number(cn_text);
            let total = self.shipment_total(cn_text);
            if cn_number.is_none() && total.is_none() {
                continue;
            }

            let hs_codes = mrn_pages
                .iter()
                .flat_map(|page| self.hs_codes(page_text(pages, *page)))
                .map(Value::String)
                .collect::<Vec<Value>>();

            let mut record = ExtractedRecord::new();
            record.insert(
                CONSIGNMENT_NOTE_FIELD.to_string(),
                cn_number.map_or(Value::Null, Value::String),
            );
            let (packages, gross, volume) = match total {
                Some(total) => (
                    Value::String(total.packages),
                    Value::String(total.gross_weight_kg),
                    Value::String(total.volume_m3),
                ),
                None => (Value::Null, Value::Null, Value::Null),
            };
            record.insert("gross_weight_kg".to_string(), gross);
            record.insert("packages".to_string(), packages);
            record.insert("volume_m3".to_string(), volume);
            record.insert("hs_codes".to_string(), Value::Array(hs_codes));
            record.insert(
                MRN_PAGES_FIELD.to_string(),
                Value::Array(mrn_pages.into_iter().map(Value::from).collect()),
            );
            records.push(record);
        }

        records
    }

    fn cn_number(&self, text: &str) -> Option<String> {
        self.cn_number_regex
            .captures(text)
            .or_else(|| self.eight_digit_regex.captures(text))
            .and_then(|captures| captures.get(1))
            .map(|matched| matched.as_str().to_string())
    }

    fn shipment_total(&self, text: &str) -> Option<ShipmentTotal> {
        let captures = self.shipment_total_regex.captures(text)?;
        Some(ShipmentTotal {
            packages: captures.get(1)?.as_str().to_string(),
            gross_weight_kg: decimal_with_dot(captures.get(2)?.as_str()),
            volume_m3: decimal_with_dot(captures.get(3)?.as_str()),
        })
    }

    fn hs_codes(&self, text: &str) -> Vec<String> {
        self.hs_code_regex
            .captures_iter(text)
            .filter_map(|captures| captures.get(1))
            .map(|matched| matched.as_str().to_string())
            .collect()
    }
}

fn page_text(pages: &[Page], number: u32) -> &str {
    pages
        .iter()
        .find(|page| page.number == number)
        .map_or("", |page| page.text.as_str())
}

/// `1478,0` becomes `1478.0`.
fn decimal_with_dot(raw: &str) -> String {
    raw.trim().replace(' ', "").replace(',', ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_pages;

    fn pages(texts: &[&str]) -> Vec<Page> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| Page {
                number: index as u32 + 1,
                text: text.to_string(),
            })
            .collect()
    }

    #[test]
    fn builds_one_record_per_consignment_note() {
        let pages = pages(&[
            "CONSIGNMENT NOTE No. 40846302\nShipment total: 6colli 1478,0 6,432",
            "MRN 25CZ3O000OO1DAGMB8\nQBP3123 CZ 85472000\nQBP3124 CZ 85389099",
            "MRN 25CZ3O000OO1DAGMC9\nQBP3125 CZ 85472000",
            "Consignment note 40846303\nShipment total: 2 colli 80,5 0,9",
            "MRN 25CZ3O000OO1DAGMD1\nQBP3123 CZ 1478,002",
        ]);
        let classification = classify_pages(&pages);

        let records = HeuristicExtractor::new().extract(&pages, &classification);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first["consignment_note"], "40846302");
        assert_eq!(first["packages"], "6");
        assert_eq!(first["gross_weight_kg"], "1478.0");
        assert_eq!(first["volume_m3"], "6.432");
        assert_eq!(
            first["hs_codes"],
            serde_json::json!(["85472000", "85389099", "85472000"])
        );
        assert_eq!(first["mrn_pages"], serde_json::json!([2, 3]));

        let second = &records[1];
        assert_eq!(second["consignment_note"], "40846303");
        assert_eq!(second["mrn_pages"], serde_json::json!([5]));
        assert_eq!(second["hs_codes"], serde_json::json!([]));
    }

    #[test]
    fn falls_back_to_first_eight_digit_number() {
        let pages = pages(&["Consignment note\nref 1234 / 40846302 issued"]);
        let classification = classify_pages(&pages);

        let records = HeuristicExtractor::new().extract(&pages, &classification);
        assert_eq!(records[0]["consignment_note"], "40846302");
        assert_eq!(records[0]["packages"], Value::Null);
    }

    #[test]
    fn consignment_page_without_number_or_totals_is_dropped() {
        let pages = pages(&["Consignment note (copy)"]);
        let classification = classify_pages(&pages);

        assert!(HeuristicExtractor::new()
            .extract(&pages, &classification)
            .is_empty());
    }

    #[test]
    fn decimal_comma_becomes_dot() {
        assert_eq!(decimal_with_dot(" 1 478,0 "), "1478.0");
    }
}
