//! Merging per-download count tables.

use super::counter::CountTable;
use super::error::TallyError;

/// Sums any number of count tables into a new one.
///
/// The inputs are only read. Integer addition makes the result independent of
/// input order, and no input yields an empty table.
///
/// # Errors
///
/// Returns [`TallyError::CountOverflow`] if a summed count exceeds `u64::MAX`.
pub fn aggregate<'a, I>(tables: I) -> Result<CountTable, TallyError>
where
    I: IntoIterator<Item = &'a CountTable>,
{
    tables
        .into_iter()
        .try_fold(CountTable::new(), |mut merged, table| {
            merged.merge_from(table)?;
            Ok(merged)
        })
}
