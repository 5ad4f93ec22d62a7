//! Query splitting: cut a FASTA stream into batches of bounded length.
//!
//! Batches are cut on record boundaries only; a single record longer than
//! the batch length forms its own batch. Letter counts cover sequence
//! characters, never headers or whitespace, so the reported total is the
//! residue/base count of the input.

use crate::constants::ELB_QUERY_BATCH_FILE_PREFIX;
use crate::error::Error;
use crate::filehelper::FileHelper;
use std::io::BufRead;

/// Result of a split: total letter count and the batch URIs in stream
/// order.
#[derive(Debug)]
pub struct SplitOutcome {
    pub total_count: u64,
    pub batches: Vec<String>,
}

/// Streaming FASTA splitter writing batches through [`FileHelper`]
/// staging.
pub struct FastaReader<'a> {
    filehelper: &'a mut FileHelper,
    batch_len: u64,
    out_path: String,

    batch_buf: String,
    batch_letters: u64,
    record_buf: String,
    record_letters: u64,
    in_record: bool,
    total_count: u64,
    batches: Vec<String>,
}

impl<'a> FastaReader<'a> {
    pub fn new(filehelper: &'a mut FileHelper, batch_len: u64, out_path: &str) -> Self {
        Self {
            filehelper,
            batch_len,
            out_path: out_path.trim_end_matches('/').to_string(),
            batch_buf: String::new(),
            batch_letters: 0,
            record_buf: String::new(),
            record_letters: 0,
            in_record: false,
            total_count: 0,
            batches: Vec::new(),
        }
    }

    /// Consume the inputs as one logically concatenated stream and write
    /// batch files. An empty input yields zero batches and a zero total.
    pub fn read_and_cut<R: BufRead>(mut self, inputs: Vec<R>) -> Result<SplitOutcome, Error> {
        let mut line = String::new();
        for mut input in inputs {
            loop {
                line.clear();
                let n = input.read_line(&mut line)?;
                if n == 0 {
                    break;
                }
                self.push_line(line.trim_end_matches(['\n', '\r']))?;
            }
        }
        self.close_record()?;
        self.flush_batch()?;
        Ok(SplitOutcome {
            total_count: self.total_count,
            batches: self.batches,
        })
    }

    fn push_line(&mut self, line: &str) -> Result<(), Error> {
        if line.starts_with('>') {
            self.close_record()?;
            self.in_record = true;
            self.record_buf.push_str(line);
            self.record_buf.push('\n');
            return Ok(());
        }
        if !self.in_record {
            if line.trim().is_empty() {
                return Ok(());
            }
            return Err(Error::malformed_input(
                "sequence data found before any FASTA header",
            ));
        }
        self.record_buf.push_str(line);
        self.record_buf.push('\n');
        self.record_letters += line.chars().filter(|c| !c.is_whitespace()).count() as u64;
        Ok(())
    }

    /// Move the completed record into the current batch, flushing first
    /// when the record would push a non-empty batch over the limit.
    fn close_record(&mut self) -> Result<(), Error> {
        if !self.in_record {
            return Ok(());
        }
        if self.batch_letters > 0 && self.batch_letters + self.record_letters > self.batch_len {
            self.flush_batch()?;
        }
        self.batch_buf.push_str(&self.record_buf);
        self.batch_letters += self.record_letters;
        self.total_count += self.record_letters;
        self.record_buf.clear();
        self.record_letters = 0;
        self.in_record = false;
        Ok(())
    }

    fn flush_batch(&mut self) -> Result<(), Error> {
        if self.batch_buf.is_empty() {
            return Ok(());
        }
        let name = format!(
            "{}{:03}.fa",
            ELB_QUERY_BATCH_FILE_PREFIX,
            self.batches.len()
        );
        let uri = format!("{}/{}", self.out_path, name);
        let staged = self.filehelper.open_for_write(&uri)?;
        std::fs::write(&staged, self.batch_buf.as_bytes())?;
        self.batches.push(uri);
        self.batch_buf.clear();
        self.batch_letters = 0;
        Ok(())
    }
}
