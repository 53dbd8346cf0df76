//! Entity recognition over acquired text and table cells.
//!
//! The default [`PatternEntityExtractor`] is purely lexical: it finds dates,
//! monetary amounts, percentages and e-mail addresses with regular
//! expressions and counts how often each distinct value appears. It does not
//! validate or interpret what it finds.
//!
//! Tables are normally cut from the same text, so a cell whose content
//! already appears verbatim in the text adds nothing; only cells carrying
//! text the body lacks are scanned.

use crate::error::StageError;
use crate::output::{Entity, EntityKind, Table};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Recognises entities in a document.
pub trait EntityExtractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Entities found in `text` and in the cells of `tables` that `text`
    /// does not already contain.
    fn extract(&self, text: &str, tables: &[Table]) -> Result<Vec<Entity>, StageError>;
}

static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        \b\d{4}-\d{2}-\d{2}\b
        | \b\d{1,2}/\d{1,2}/\d{2,4}\b
        | \b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}\b
        | \b\d{1,2}\s+(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{4}\b",
    )
    .unwrap()
});

static RE_MONEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        [$€£¥]\s?\d{1,3}(?:,\d{3})*(?:\.\d+)?
        | \b\d{1,3}(?:,\d{3})*(?:\.\d+)?\s?(?:USD|EUR|GBP|CHF|JPY)\b",
    )
    .unwrap()
});

static RE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\b\d+(?:\.\d+)?\s?%").unwrap());

static RE_EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

/// Regex-based extractor for dates, amounts, percentages and e-mails.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternEntityExtractor;

impl PatternEntityExtractor {
    fn patterns() -> [(EntityKind, &'static Lazy<Regex>); 4] {
        [
            (EntityKind::Date, &RE_DATE),
            (EntityKind::MonetaryAmount, &RE_MONEY),
            (EntityKind::Percentage, &RE_PERCENT),
            (EntityKind::Email, &RE_EMAIL),
        ]
    }
}

impl EntityExtractor for PatternEntityExtractor {
    fn name(&self) -> &str {
        "patterns"
    }

    fn extract(&self, text: &str, tables: &[Table]) -> Result<Vec<Entity>, StageError> {
        let mut found = EntityTally::default();

        let cells = tables
            .iter()
            .flat_map(|t| t.headers.iter().chain(t.rows.iter().flatten()))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty() && !text.contains(cell));

        for haystack in std::iter::once(text).chain(cells) {
            for (kind, re) in Self::patterns() {
                for m in re.find_iter(haystack) {
                    found.add(kind, m.as_str().trim());
                }
            }
        }

        Ok(found.into_entities())
    }
}

/// Counts distinct `(kind, value)` pairs, keeping first-seen order.
#[derive(Default)]
struct EntityTally {
    index: HashMap<(EntityKind, String), usize>,
    entities: Vec<Entity>,
}

impl EntityTally {
    fn add(&mut self, kind: EntityKind, value: &str) {
        if value.is_empty() {
            return;
        }
        let key = (kind, value.to_string());
        match self.index.get(&key) {
            Some(&pos) => self.entities[pos].occurrences += 1,
            None => {
                self.index.insert(key, self.entities.len());
                self.entities.push(Entity {
                    kind,
                    value: value.to_string(),
                    occurrences: 1,
                });
            }
        }
    }

    fn into_entities(self) -> Vec<Entity> {
        self.entities
    }
}
