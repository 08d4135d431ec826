use std::collections::BTreeSet;

use crate::model::{Page, PageType, PageTypeMap};

/// Minimum length of the alphanumeric run standing in for an MRN code,
/// e.g. `25CZ3O000OO1DAGMB8`.
pub const MRN_CODE_MIN_LEN: usize = 15;

/// Heuristic tags for every page of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageClassification {
    pub tags: Vec<(u32, BTreeSet<PageType>)>,
    pub consignment_note_pages: Vec<u32>,
    pub mrn_pages: Vec<u32>,
    pub unclassified_pages: Vec<u32>,
}

impl PageClassification {
    pub fn tags_for(&self, page: u32) -> Option<&BTreeSet<PageType>> {
        self.tags
            .iter()
            .find(|(number, _)| *number == page)
            .map(|(_, tags)| tags)
    }

    pub fn to_page_type_map(&self) -> PageTypeMap {
        let mut map = PageTypeMap::new();
        map.insert(PageType::ConsignmentNote, self.consignment_note_pages.clone());
        map.insert(PageType::Mrn, self.mrn_pages.clone());
        map.insert(PageType::Unclassified, self.unclassified_pages.clone());
        map
    }
}

/// Tags one page of text. Empty text is `Unclassified`; never fails.
pub fn classify_text(text: &str) -> BTreeSet<PageType> {
    let lowered = text.to_lowercase();
    let mut tags = BTreeSet::new();

    if lowered.contains("consignment note") {
        tags.insert(PageType::ConsignmentNote);
    }
    if lowered.contains("mrn") && has_mrn_code(text) {
        tags.insert(PageType::Mrn);
    }
    if tags.is_empty() {
        tags.insert(PageType::Unclassified);
    }

    tags
}

pub fn has_mrn_code(text: &str) -> bool {
    let mut run = 0usize;
    for character in text.chars() {
        if character.is_ascii_alphanumeric() {
            run += 1;
            if run >= MRN_CODE_MIN_LEN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

pub fn classify_pages(pages: &[Page]) -> PageClassification {
    let mut classification = PageClassification::default();

    for page in pages {
        let tags = classify_text(&page.text);
        if tags.contains(&PageType::ConsignmentNote) {
            classification.consignment_note_pages.push(page.number);
        }
        if tags.contains(&PageType::Mrn) {
            classification.mrn_pages.push(page.number);
        }
        if tags.contains(&PageType::Unclassified) {
            classification.unclassified_pages.push(page.number);
        }
        classification.tags.push((page.number, tags));
    }

    for list in [
        &mut classification.consignment_note_pages,
        &mut classification.mrn_pages,
        &mut classification.unclassified_pages,
    ] {
        list.sort_unstable();
        list.dedup();
    }

    classification
}
