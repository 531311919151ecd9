//! Category totals and the final report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::counter::CountTable;
use super::error::TallyError;

/// Total count per category, summed over all entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Totals {
    categories: BTreeMap<String, u64>,
}

impl Totals {
    /// Derives totals from a count table.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::TotalOverflow`] if a total exceeds `u64::MAX`.
    pub fn from_counts(counts: &CountTable) -> Result<Self, TallyError> {
        let mut categories: BTreeMap<String, u64> = BTreeMap::new();
        for (_, category, count) in counts.pairs() {
            if let Some(total) = categories.get_mut(category) {
                *total = total
                    .checked_add(count)
                    .ok_or_else(|| TallyError::TotalOverflow {
                        category: category.to_string(),
                    })?;
            } else {
                categories.insert(category.to_string(), count);
            }
        }
        Ok(Self { categories })
    }

    /// Total for `category`; 0 when no entity has it.
    #[must_use]
    pub fn get(&self, category: &str) -> u64 {
        self.categories.get(category).copied().unwrap_or(0)
    }

    /// `(category, total)` pairs, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.categories
            .iter()
            .map(|(category, total)| (category.as_str(), *total))
    }

    /// Number of categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// True when there are no categories.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Final output: per-entity counts plus category totals.
///
/// Serializes as `{"patients": {...}, "totals": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    patients: CountTable,
    totals: Totals,
}

impl Report {
    /// Computes totals for `patients` and pairs the two.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::IllFormedTable`] if an entity has no categories
    /// or a zero count, and [`TallyError::TotalOverflow`] if a total exceeds
    /// `u64::MAX`.
    pub fn assemble(patients: CountTable) -> Result<Self, TallyError> {
        patients.check_well_formed()?;
        let totals = Totals::from_counts(&patients)?;
        Ok(Self { patients, totals })
    }

    /// Per-entity counts.
    #[must_use]
    pub fn patients(&self) -> &CountTable {
        &self.patients
    }

    /// Category totals.
    #[must_use]
    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    /// Splits the report into its parts.
    #[must_use]
    pub fn into_parts(self) -> (CountTable, Totals) {
        (self.patients, self.totals)
    }

    /// Re-derives the totals from the per-entity table and compares.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::IllFormedTable`] if the per-entity table breaks
    /// its invariant, and [`TallyError::TotalsMismatch`] naming the first
    /// category that disagrees (including categories present on only one
    /// side).
    pub fn verify(&self) -> Result<(), TallyError> {
        self.patients.check_well_formed()?;
        let derived = Totals::from_counts(&self.patients)?;
        if derived == self.totals {
            return Ok(());
        }

        let category = self
            .totals
            .iter()
            .map(|(category, _)| category)
            .chain(derived.iter().map(|(category, _)| category))
            .find(|category| self.totals.get(category) != derived.get(category))
            .unwrap_or_default()
            .to_string();
        Err(TallyError::TotalsMismatch {
            reported: self.totals.get(&category),
            derived: derived.get(&category),
            category,
        })
    }
}
