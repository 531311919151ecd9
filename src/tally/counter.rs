//! Two-level occurrence counting over a record stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::error::{MalformedInput, TallyError};
use super::record::RecordReader;
use crate::transport::LineStream;

/// Default name of the entity column.
pub const DEFAULT_ENTITY_FIELD: &str = "patient_id";

/// Default name of the category column.
pub const DEFAULT_CATEGORY_FIELD: &str = "event_type";

/// Occurrence counts keyed by entity, then category.
///
/// Every stored count is at least 1: a pair is inserted on its first
/// occurrence and an entity never exists without a category. Keys are kept
/// sorted so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountTable {
    entities: BTreeMap<String, BTreeMap<String, u64>>,
}

impl CountTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one occurrence of `(entity, category)`.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::CountOverflow`] if the count is already `u64::MAX`.
    pub fn increment(&mut self, entity: &str, category: &str) -> Result<(), TallyError> {
        self.add(entity, category, 1)
    }

    /// Adds `count` occurrences of `(entity, category)`. Adding 0 is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::CountOverflow`] if the sum exceeds `u64::MAX`.
    pub fn add(&mut self, entity: &str, category: &str, count: u64) -> Result<(), TallyError> {
        if count == 0 {
            return Ok(());
        }

        // Lookup by borrowed key first so repeat pairs allocate nothing.
        if let Some(categories) = self.entities.get_mut(entity) {
            if let Some(current) = categories.get_mut(category) {
                *current = current
                    .checked_add(count)
                    .ok_or_else(|| TallyError::count_overflow(entity, category))?;
            } else {
                categories.insert(category.to_string(), count);
            }
            return Ok(());
        }

        self.entities.insert(
            entity.to_string(),
            BTreeMap::from([(category.to_string(), count)]),
        );
        Ok(())
    }

    /// Adds every count of `other` into this table.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::CountOverflow`] if any sum exceeds `u64::MAX`;
    /// pairs merged before the failing one stay merged.
    pub fn merge_from(&mut self, other: &CountTable) -> Result<(), TallyError> {
        for (entity, categories) in &other.entities {
            for (category, count) in categories {
                self.add(entity, category, *count)?;
            }
        }
        Ok(())
    }

    /// Count of `(entity, category)`, `None` when never seen.
    #[must_use]
    pub fn get(&self, entity: &str, category: &str) -> Option<u64> {
        self.entities.get(entity)?.get(category).copied()
    }

    /// Category counts of one entity.
    #[must_use]
    pub fn categories(&self, entity: &str) -> Option<&BTreeMap<String, u64>> {
        self.entities.get(entity)
    }

    /// Entities with their category counts, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, u64>)> {
        self.entities
            .iter()
            .map(|(entity, categories)| (entity.as_str(), categories))
    }

    /// Every `(entity, category, count)` triple, in key order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.entities.iter().flat_map(|(entity, categories)| {
            categories
                .iter()
                .map(move |(category, count)| (entity.as_str(), category.as_str(), *count))
        })
    }

    /// Number of distinct entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when nothing has been counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Number of distinct `(entity, category)` pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.entities.values().map(BTreeMap::len).sum()
    }

    /// Sum of every count.
    #[must_use]
    pub fn occurrences(&self) -> u128 {
        self.pairs().map(|(_, _, count)| u128::from(count)).sum()
    }

    /// Checks the "every count is at least 1, no empty entity" invariant.
    ///
    /// Holds for every table built through this API; tables obtained by
    /// deserialization may break it.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::IllFormedTable`] naming the first entity with an
    /// empty category map or a zero count.
    pub fn check_well_formed(&self) -> Result<(), TallyError> {
        match self.entities.iter().find(|(_, categories)| {
            categories.is_empty() || categories.values().any(|&count| count == 0)
        }) {
            Some((entity, _)) => Err(TallyError::IllFormedTable {
                entity: entity.clone(),
            }),
            None => Ok(()),
        }
    }

    /// True when [`check_well_formed`](Self::check_well_formed) passes.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.check_well_formed().is_ok()
    }
}

/// Names of the columns a [`StreamCounter`] reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    /// Column holding the entity identifier.
    pub entity: String,
    /// Column holding the category label.
    pub category: String,
}

impl FieldNames {
    /// Custom column names.
    pub fn new(entity: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            category: category.into(),
        }
    }
}

impl Default for FieldNames {
    fn default() -> Self {
        Self::new(DEFAULT_ENTITY_FIELD, DEFAULT_CATEGORY_FIELD)
    }
}

/// Folds a record stream into a [`CountTable`].
///
/// Stateless between calls: every call builds a fresh table, so one counter
/// can serve any number of downloads, concurrently or not.
#[derive(Debug, Clone, Default)]
pub struct StreamCounter {
    fields: FieldNames,
}

impl StreamCounter {
    /// Creates a counter reading the given columns.
    #[must_use]
    pub fn new(fields: FieldNames) -> Self {
        Self { fields }
    }

    /// Columns this counter reads.
    #[must_use]
    pub fn fields(&self) -> &FieldNames {
        &self.fields
    }

    /// Parses `lines` as CSV and counts it. See [`count_records`](Self::count_records).
    ///
    /// # Errors
    ///
    /// Returns the errors of [`RecordReader::open`] and
    /// [`count_records`](Self::count_records).
    pub async fn count_lines(&self, lines: Box<dyn LineStream>) -> Result<CountTable, TallyError> {
        let reader = RecordReader::open(lines).await?;
        self.count_records(reader).await
    }

    /// Drains `reader`, counting one occurrence per record.
    ///
    /// Only the entity and category fields of each record are read, and
    /// records are dropped as soon as they are counted. Memory grows with the
    /// number of distinct pairs, never with the number of rows. The reader
    /// (and its stream) is consumed; on error the partial table is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput::MissingField`] if the header lacks either
    /// column, [`MalformedInput::EmptyField`] for an empty entity or category
    /// value, [`TallyError::CountOverflow`] on overflow, and any error of
    /// [`RecordReader::next_record`].
    #[instrument(
        level = "debug",
        skip(self, reader),
        fields(entity = %self.fields.entity, category = %self.fields.category)
    )]
    pub async fn count_records(&self, mut reader: RecordReader) -> Result<CountTable, TallyError> {
        let entity_index = require_column(&reader, &self.fields.entity)?;
        let category_index = require_column(&reader, &self.fields.category)?;

        let mut table = CountTable::new();
        let mut rows: u64 = 0;

        while let Some(record) = reader.next_record().await? {
            let line = record.line();
            let entity = required_value(record.field(entity_index), &self.fields.entity, line)?;
            let category =
                required_value(record.field(category_index), &self.fields.category, line)?;
            table.increment(entity, category)?;
            rows += 1;
        }

        debug!(
            rows,
            entities = table.len(),
            pairs = table.pair_count(),
            "stream counted"
        );
        Ok(table)
    }
}

fn require_column(reader: &RecordReader, name: &str) -> Result<usize, MalformedInput> {
    reader
        .column_index(name)
        .ok_or_else(|| MalformedInput::MissingField {
            line: reader.line(),
            field: name.to_string(),
        })
}

fn required_value<'a>(
    value: Option<&'a str>,
    field: &str,
    line: usize,
) -> Result<&'a str, MalformedInput> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(MalformedInput::EmptyField {
            line,
            field: field.to_string(),
        }),
        None => Err(MalformedInput::MissingField {
            line,
            field: field.to_string(),
        }),
    }
}
