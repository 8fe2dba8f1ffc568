//! Newline-delimited JSON input, cut into bulks.
use logship_core::Record;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

pub(crate) struct BulkReader<R> {
    lines: Lines<R>,
    bulk_size: usize,
    line_number: usize,
    skipped: usize,
}

impl<R> BulkReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub(crate) fn new(reader: R, bulk_size: usize) -> Self {
        Self {
            lines: reader.lines(),
            bulk_size: bulk_size.max(1),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Up to `bulk_size` records, `None` at end of input. Blank lines are ignored and lines
    /// that are not JSON objects are logged and skipped.
    pub(crate) async fn next_bulk(&mut self) -> std::io::Result<Option<Vec<Record>>> {
        let mut bulk = Vec::with_capacity(self.bulk_size);
        while bulk.len() < self.bulk_size {
            let Some(line) = self.lines.next_line().await? else {
                break;
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(&line)
                .map_err(|e| e.to_string())
                .and_then(|value| Record::try_from(value).map_err(|e| e.to_string()))
            {
                Ok(record) => bulk.push(record),
                Err(error) => {
                    self.skipped += 1;
                    warn!(line = self.line_number, error = %error, "Skipping unreadable record");
                }
            }
        }

        Ok((!bulk.is_empty()).then_some(bulk))
    }

    /// Lines skipped so far.
    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }
}
