//! Attribution of MRN pages to extracted records.
//!
//! Each record goes through an ordered chain of tiers: the model's own
//! `mrn_pages` hint, then document structure (MRN pages between the record's
//! consignment note page and the next one), then an even split of the
//! classifier's MRN pages. Every tier is a pure function returning `None` when
//! it has nothing to offer.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::PageClassification;
use crate::error::PipelineError;
use crate::model::{
    AssignmentSource, CONSIGNMENT_NOTE_FIELD, ExtractedRecord, MRN_PAGES_FIELD, Page, PageType,
    PageTypeMap, RecordAssignment,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub page_types: PageTypeMap,
    pub records: Vec<ExtractedRecord>,
    pub assignments: Vec<RecordAssignment>,
    pub warnings: Vec<String>,
}

pub fn reconcile(
    pages: &[Page],
    classification: &PageClassification,
    mut records: Vec<ExtractedRecord>,
) -> Result<Reconciliation, PipelineError> {
    let page_count = pages.len();
    let mut assigned: Vec<Option<(AssignmentSource, Vec<u32>)>> = vec![None; records.len()];
    let mut warnings = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let Some(hint) = ai_hint_tier(record, page_count) else {
            continue;
        };
        if !hint.dropped.is_empty() {
            warn!(
                record = index,
                dropped = ?hint.dropped,
                page_count,
                "ignoring out-of-range mrn_pages hint entries"
            );
            warnings.push(format!(
                "record {index}: ignored mrn_pages {:?} outside 1..={page_count}",
                hint.dropped
            ));
        }
        if !hint.pages.is_empty() {
            assigned[index] = Some((AssignmentSource::AiHint, hint.pages));
        }
    }

    let unhinted = (0..records.len())
        .filter(|index| assigned[*index].is_none())
        .collect::<Vec<usize>>();

    if !unhinted.is_empty() {
        if let Some(groups) = structural_tier(pages, classification, &records, &unhinted) {
            debug!(records = groups.len(), "structural MRN grouping applied");
            for (index, mrn_pages) in groups {
                assigned[index] = Some((AssignmentSource::Structural, mrn_pages));
            }
        } else if let Some(split) = even_split_tier(&unhinted, &classification.mrn_pages) {
            warn!(
                records = unhinted.len(),
                mrn_pages = classification.mrn_pages.len(),
                "MRN pages distributed evenly across records"
            );
            warnings.push(format!(
                "{} MRN page(s) distributed evenly across {} record(s) without structural grouping",
                classification.mrn_pages.len(),
                unhinted.len()
            ));
            for (index, mrn_pages) in split {
                assigned[index] = Some((AssignmentSource::EvenSplit, mrn_pages));
            }
        }
    }

    let mut assignments = Vec::with_capacity(records.len());
    let mut mrn_union = classification.mrn_pages.iter().copied().collect::<BTreeSet<u32>>();

    for (index, record) in records.iter_mut().enumerate() {
        let (source, mrn_pages) = match assigned[index].take() {
            Some((_, pages)) if pages.is_empty() => (AssignmentSource::Unassigned, pages),
            Some(assignment) => assignment,
            None => (AssignmentSource::Unassigned, Vec::new()),
        };

        mrn_union.extend(mrn_pages.iter().copied());
        record.insert(
            MRN_PAGES_FIELD.to_string(),
            Value::Array(mrn_pages.iter().copied().map(Value::from).collect()),
        );
        assignments.push(RecordAssignment {
            record_index: index,
            source,
            mrn_pages,
        });
    }

    let page_types = page_type_map(page_count, classification, mrn_union)?;

    Ok(Reconciliation {
        page_types,
        records,
        assignments,
        warnings,
    })
}

/// A record's own `mrn_pages` split into usable page numbers and the entries
/// that fall outside the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiHint {
    pub pages: Vec<u32>,
    pub dropped: Vec<i64>,
}

/// The record's own `mrn_pages`, filtered to valid indices, sorted and
/// deduplicated.
///
/// Accepts an integer, a numeric string (optionally comma separated) or an
/// array of those. Any other shape is treated as no hint.
pub fn ai_hint_tier(record: &ExtractedRecord, page_count: usize) -> Option<AiHint> {
    let value = record.get(MRN_PAGES_FIELD)?;

    let mut raw = Vec::new();
    collect_page_numbers(value, &mut raw);
    if raw.is_empty() {
        return None;
    }

    let mut pages = BTreeSet::new();
    let mut dropped = BTreeSet::new();
    for number in raw {
        match u32::try_from(number)
            .ok()
            .filter(|page| *page >= 1 && (*page as usize) <= page_count)
        {
            Some(page) => {
                pages.insert(page);
            }
            None => {
                dropped.insert(number);
            }
        }
    }

    Some(AiHint {
        pages: pages.into_iter().collect(),
        dropped: dropped.into_iter().collect(),
    })
}

fn collect_page_numbers(value: &Value, output: &mut Vec<i64>) {
    match value {
        Value::Number(number) => {
            let integral = number.as_i64().or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.fract() == 0.0)
                    .map(|float| float as i64)
            });
            output.extend(integral);
        }
        Value::String(text) => {
            let parsed = text
                .split([',', ';'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::parse::<i64>)
                .collect::<Result<Vec<i64>, _>>();
            if let Ok(numbers) = parsed {
                output.extend(numbers);
            }
        }
        Value::Array(items) => {
            for item in items {
                if !item.is_array() {
                    collect_page_numbers(item, output);
                }
            }
        }
        _ => {}
    }
}

/// Groups classifier MRN pages under the consignment note page each record
/// belongs to.
///
/// A record is tied to a consignment note page by its consignment number
/// appearing as a token in that page's text, or by position when there are
/// exactly as many consignment note pages as records.
pub fn structural_tier(
    pages: &[Page],
    classification: &PageClassification,
    records: &[ExtractedRecord],
    unhinted: &[usize],
) -> Option<Vec<(usize, Vec<u32>)>> {
    let cn_pages = &classification.consignment_note_pages;
    if cn_pages.is_empty() {
        return None;
    }
    let positional = cn_pages.len() == records.len();

    let groups = unhinted
        .iter()
        .filter_map(|index| {
            let cn_page = consignment_number_pattern(&records[*index])
                .and_then(|pattern| {
                    cn_pages.iter().copied().find(|page| {
                        pages
                            .iter()
                            .any(|candidate| candidate.number == *page && pattern.is_match(&candidate.text))
                    })
                })
                .or_else(|| positional.then(|| cn_pages[*index]))?;
            Some((*index, mrn_pages_after(cn_page, cn_pages, &classification.mrn_pages)))
        })
        .collect::<Vec<(usize, Vec<u32>)>>();

    if groups.iter().all(|(_, mrn_pages)| mrn_pages.is_empty()) {
        return None;
    }

    Some(groups)
}

fn consignment_number(record: &ExtractedRecord) -> Option<String> {
    let number = match record.get(CONSIGNMENT_NOTE_FIELD)? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!number.is_empty()).then_some(number)
}

/// Matches the record's consignment number as a whole token, so `123` does
/// not match a page reading `1234`.
fn consignment_number_pattern(record: &ExtractedRecord) -> Option<Regex> {
    let number = consignment_number(record)?;
    Regex::new(&format!(
        r"(?:^|[^0-9A-Za-z]){}(?:$|[^0-9A-Za-z])",
        regex::escape(&number)
    ))
    .ok()
}

fn mrn_pages_after(cn_page: u32, cn_pages: &[u32], mrn_pages: &[u32]) -> Vec<u32> {
    let next_cn = cn_pages
        .iter()
        .copied()
        .find(|page| *page > cn_page)
        .unwrap_or(u32::MAX);

    mrn_pages
        .iter()
        .copied()
        .filter(|page| *page > cn_page && *page < next_cn)
        .collect()
}

/// Contiguous blocks in document order: `n / k` pages each, the first `n % k`
/// records taking one extra.
pub fn even_split_tier(records: &[usize], mrn_pages: &[u32]) -> Option<Vec<(usize, Vec<u32>)>> {
    if records.is_empty() || mrn_pages.is_empty() {
        return None;
    }

    let base = mrn_pages.len() / records.len();
    let extra = mrn_pages.len() % records.len();
    let mut cursor = 0usize;

    let split = records
        .iter()
        .enumerate()
        .map(|(position, index)| {
            let take = base + usize::from(position < extra);
            let block = mrn_pages[cursor..cursor + take].to_vec();
            cursor += take;
            (*index, block)
        })
        .collect();

    Some(split)
}

fn page_type_map(
    page_count: usize,
    classification: &PageClassification,
    mrn_union: BTreeSet<u32>,
) -> Result<PageTypeMap, PipelineError> {
    if let Some(page) = mrn_union
        .iter()
        .copied()
        .find(|page| *page == 0 || *page as usize > page_count)
    {
        return Err(PipelineError::PageIndexOutOfRange {
            page,
            page_count,
            context: "MRN page map".to_string(),
        });
    }

    let cn_pages = classification
        .consignment_note_pages
        .iter()
        .copied()
        .collect::<BTreeSet<u32>>();
    let unclassified = (1..=page_count as u32)
        .filter(|page| !mrn_union.contains(page) && !cn_pages.contains(page))
        .collect::<Vec<u32>>();

    let mut map = PageTypeMap::new();
    map.insert(PageType::ConsignmentNote, cn_pages.into_iter().collect());
    map.insert(PageType::Mrn, mrn_union.into_iter().collect());
    map.insert(PageType::Unclassified, unclassified);
    Ok(map)
}
