//! Streaming CSV reader for replay operations
//!
//! Yields one [`ParsedRow`] per data row. A malformed row is not fatal: it is
//! yielded with its error so the replay can report it and carry on.
//!
//! ```no_run
//! use ledger_engine::io::OperationReader;
//! use std::path::Path;
//!
//! let reader = OperationReader::new(Path::new("operations.csv")).unwrap();
//! for row in reader {
//!     match row.operation {
//!         Ok(op) => println!("line {}: {:?}", row.line, op),
//!         Err(e) => eprintln!("line {}: {}", row.line, e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, unreadable header) are returned from `new()`
//! - Row-level parse errors are carried in `ParsedRow::operation`
//! - Line numbers are physical lines of the file, blank lines included

use csv::{Position, ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::csv_format::{convert_operation_record, Operation, OperationRecord};

/// One data row of the input file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub line: u64,
    /// Lower-cased op column as written, for reporting
    pub op: String,
    pub operation: Result<Operation, String>,
}

/// Maps record positions to 1-based physical line numbers
///
/// A record's position is where the parser started looking for it, which is
/// before any blank lines it skipped. The index walks a second handle on the
/// file to that offset, then past any line terminators, counting newlines.
/// Positions must be queried in ascending order, the order records arrive in.
#[derive(Debug)]
struct LineIndex {
    reader: BufReader<File>,
    offset: u64,
    line: u64,
}

impl LineIndex {
    fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
            offset: 0,
            line: 1,
        }
    }

    fn record_line(&mut self, byte: u64) -> io::Result<u64> {
        while self.offset < byte {
            let buf = self.reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(self.line);
            }
            let take = usize::try_from(byte - self.offset).map_or(buf.len(), |n| n.min(buf.len()));
            self.advance(take);
        }
        loop {
            let buf = self.reader.fill_buf()?;
            let blank = buf.iter().take_while(|&&b| b == b'\r' || b == b'\n').count();
            let exhausted = blank < buf.len() || buf.is_empty();
            self.advance(blank);
            if exhausted {
                return Ok(self.line);
            }
        }
    }

    /// Consume `n` buffered bytes, counting the newlines among them
    fn advance(&mut self, n: usize) {
        let newlines = self.reader.buffer()[..n].iter().filter(|&&b| b == b'\n').count();
        self.line += newlines as u64;
        self.offset += n as u64;
        self.reader.consume(n);
    }
}

#[derive(Debug)]
pub struct OperationReader {
    reader: csv::Reader<File>,
    lines: LineIndex,
    headers: StringRecord,
    record: StringRecord,
}

impl OperationReader {
    /// Open `path` and read its header row
    ///
    /// The reader trims whitespace and allows rows with fewer columns than the
    /// header, since trailing columns are optional for some operations.
    pub fn new(path: &Path) -> Result<Self, String> {
        let open = || {
            File::open(path)
                .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))
        };
        let file = open()?;
        let lines = LineIndex::new(open()?);

        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| format!("Failed to read CSV header: {}", e))?
            .clone();

        Ok(Self {
            reader,
            lines,
            headers,
            record: StringRecord::new(),
        })
    }

    fn line_of(&mut self, position: Option<Position>) -> u64 {
        match position {
            Some(p) => self.lines.record_line(p.byte()).unwrap_or_else(|_| p.line()),
            None => 0,
        }
    }
}

impl Iterator for OperationReader {
    type Item = ParsedRow;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => {
                let position = self.record.position().cloned();
                let line = self.line_of(position);
                let op = self.record.get(0).unwrap_or_default().to_lowercase();
                let operation = self
                    .record
                    .deserialize::<OperationRecord>(Some(&self.headers))
                    .map_err(|e| format!("CSV parse error: {}", e))
                    .and_then(|record| convert_operation_record(&record));
                Some(ParsedRow {
                    line,
                    op,
                    operation,
                })
            }
            Err(e) => {
                let line = self.line_of(e.position().cloned());
                Some(ParsedRow {
                    line,
                    op: String::new(),
                    operation: Err(format!("CSV parse error: {}", e)),
                })
            }
        }
    }
}
