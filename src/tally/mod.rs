//! Streaming CSV tally: parse, count, merge, total.
//!
//! Data flows leaf to root:
//!
//! 1. [`RecordReader`] turns a line stream into records, header first.
//! 2. [`StreamCounter`] folds records into a per-download [`CountTable`].
//! 3. [`aggregate`] sums per-download tables into one.
//! 4. [`Report::assemble`] derives [`Totals`] and pairs them with the table.
//!
//! # Example
//!
//! ```
//! use export_tally_core::tally::{Report, StreamCounter, aggregate};
//! use export_tally_core::transport::{DownloadId, MemoryLineStream};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lines = vec![
//!     "patient_id,event_type".to_string(),
//!     "P001,heart_rate".to_string(),
//!     "P001,heart_rate".to_string(),
//! ];
//! let stream = MemoryLineStream::new(DownloadId::new("d1"), lines);
//! let table = StreamCounter::default().count_lines(Box::new(stream)).await?;
//! let report = Report::assemble(aggregate([&table])?)?;
//! assert_eq!(report.totals().get("heart_rate"), 2);
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod counter;
mod error;
mod record;
mod report;

pub use aggregate::aggregate;
pub use counter::{
    CountTable, DEFAULT_CATEGORY_FIELD, DEFAULT_ENTITY_FIELD, FieldNames, StreamCounter,
};
pub use error::{MalformedInput, TallyError};
pub use record::{DELIMITER, Record, RecordReader};
pub use report::{Report, Totals};
