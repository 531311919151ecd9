//! Incremental CSV record parsing over a line stream.

use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord};
use tracing::trace;

use super::error::{MalformedInput, TallyError};
use crate::transport::LineStream;

/// Field delimiter for every line.
pub const DELIMITER: u8 = b',';

/// One data row: column names paired with raw field values, in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<String>,
    line: usize,
}

impl Record {
    /// Value of the column named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = self.columns.iter().position(|column| column == name)?;
        self.field(index)
    }

    /// Value at column position `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    /// Physical line number the row starts on.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }
}

/// Pull-based record cursor over a [`LineStream`].
///
/// The first non-blank line is the header. Each later non-blank line starts
/// one [`Record`]; blank lines between records are skipped. A quoted field
/// may contain line breaks, in which case the record continues on the
/// following lines until the quote closes. Nothing is kept from earlier
/// records except the header.
pub struct RecordReader {
    lines: Box<dyn LineStream>,
    columns: Arc<[String]>,
    line: usize,
}

impl std::fmt::Debug for RecordReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordReader")
            .field("columns", &self.columns)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

impl RecordReader {
    /// Reads and validates the header.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput::MissingHeader`] for a stream without a
    /// non-blank line, [`MalformedInput::EmptyColumnName`] or
    /// [`MalformedInput::DuplicateColumn`] for an invalid header,
    /// [`MalformedInput::InvalidCsv`] for a header whose quote never closes,
    /// and [`TallyError::Transport`] if the stream fails.
    pub async fn open(mut lines: Box<dyn LineStream>) -> Result<Self, TallyError> {
        let mut line = 0;
        let Some((header_line, header)) = read_raw_record(lines.as_mut(), &mut line).await?
        else {
            return Err(MalformedInput::MissingHeader.into());
        };

        let columns = split_fields(&header, header_line)?;
        validate_header(&columns, header_line)?;
        trace!(line, columns = columns.len(), "parsed header");

        Ok(Self {
            lines,
            columns: columns.into(),
            line,
        })
    }

    /// Position of the column named `name`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Number of the last line read.
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }

    /// Pulls the next record; `Ok(None)` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedInput::FieldCountMismatch`] when a row's field
    /// count differs from the header's, [`MalformedInput::InvalidCsv`] when
    /// a quoted field is still open at the end of the stream, and
    /// [`TallyError::Transport`] if the stream fails.
    pub async fn next_record(&mut self) -> Result<Option<Record>, TallyError> {
        let Some((line, text)) = read_raw_record(self.lines.as_mut(), &mut self.line).await?
        else {
            return Ok(None);
        };

        let values = split_fields(&text, line)?;
        if values.len() != self.columns.len() {
            return Err(MalformedInput::FieldCountMismatch {
                line,
                expected: self.columns.len(),
                found: values.len(),
            }
            .into());
        }

        Ok(Some(Record {
            columns: Arc::clone(&self.columns),
            values,
            line,
        }))
    }
}

/// Reads the text of the next record, skipping blank lines.
///
/// Returns the line the record starts on together with its text. Lines are
/// joined with `\n` while a quoted field is open. `line` tracks the last
/// physical line read.
async fn read_raw_record(
    lines: &mut dyn LineStream,
    line: &mut usize,
) -> Result<Option<(usize, String)>, TallyError> {
    let mut text = loop {
        let Some(text) = lines.next_line().await? else {
            return Ok(None);
        };
        *line += 1;
        if !text.is_empty() {
            break text;
        }
    };
    let start = *line;

    let mut state = scan_quotes(QuoteState::FieldStart, &text);
    while state == QuoteState::Quoted {
        let Some(continuation) = lines.next_line().await? else {
            return Err(MalformedInput::InvalidCsv {
                line: start,
                reason: "quoted field is never closed".to_string(),
            }
            .into());
        };
        *line += 1;
        // The line break belongs to the open field.
        state = scan_quotes(state, &continuation);
        text.push('\n');
        text.push_str(&continuation);
    }

    Ok(Some((start, text)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted,
    QuoteInQuoted,
}

/// Quote state after reading `text`, starting from `state`.
///
/// A quote opens a field only at the field start; inside a quoted field a
/// doubled quote is an escaped quote. Text without quotes cannot leave a
/// quoted field open.
fn scan_quotes(state: QuoteState, text: &str) -> QuoteState {
    if state != QuoteState::Quoted && !text.contains('"') {
        return QuoteState::Unquoted;
    }

    let delimiter = char::from(DELIMITER);
    text.chars().fold(state, |state, c| match state {
        QuoteState::FieldStart if c == '"' => QuoteState::Quoted,
        QuoteState::FieldStart | QuoteState::Unquoted | QuoteState::QuoteInQuoted
            if c == delimiter || c == '\n' =>
        {
            QuoteState::FieldStart
        }
        QuoteState::Quoted if c == '"' => QuoteState::QuoteInQuoted,
        QuoteState::Quoted => QuoteState::Quoted,
        QuoteState::QuoteInQuoted if c == '"' => QuoteState::Quoted,
        QuoteState::FieldStart | QuoteState::Unquoted | QuoteState::QuoteInQuoted => {
            QuoteState::Unquoted
        }
    })
}

fn validate_header(columns: &[String], line: usize) -> Result<(), MalformedInput> {
    for (index, name) in columns.iter().enumerate() {
        if name.is_empty() {
            return Err(MalformedInput::EmptyColumnName {
                line,
                column: index + 1,
            });
        }
        if columns[..index].contains(name) {
            return Err(MalformedInput::DuplicateColumn {
                line,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

/// Splits one record's text into fields using standard CSV quoting.
///
/// Text without a quote character takes a plain split.
fn split_fields(line: &str, line_number: usize) -> Result<Vec<String>, MalformedInput> {
    if !line.contains('"') {
        return Ok(line
            .split(char::from(DELIMITER))
            .map(str::to_string)
            .collect());
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(DELIMITER)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = StringRecord::new();
    let found = reader
        .read_record(&mut record)
        .map_err(|e| MalformedInput::InvalidCsv {
            line: line_number,
            reason: e.to_string(),
        })?;
    if !found {
        return Ok(vec![String::new()]);
    }
    Ok(record.iter().map(str::to_string).collect())
}
