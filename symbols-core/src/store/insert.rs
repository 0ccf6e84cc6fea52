//! Bulk symbol insertion: a producer thread drains the symbol stream into a
//! bounded channel while the calling thread writes multi-row INSERTs.

use super::StoreTx;
use crate::context::Context;
use crate::error::SymbolsError;
use crate::parse::SymbolStream;
use crate::symbol::SymbolRecord;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use rusqlite::ToSql;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const COLUMNS_PER_ROW: usize = 12;
/// SQLite's default bound-parameter ceiling
const MAX_PARAMS: usize = 999;
const ROWS_PER_INSERT: usize = MAX_PARAMS / COLUMNS_PER_ROW;
const CHANNEL_CAPACITY: usize = ROWS_PER_INSERT * 16;
/// How long a blocked send waits before rechecking cancellation
const SEND_POLL: Duration = Duration::from_millis(50);

/// A record plus its derived lowercase columns.
struct SymbolRow {
    record: SymbolRecord,
    name_lower: String,
    path_lower: String,
}

impl From<SymbolRecord> for SymbolRow {
    fn from(record: SymbolRecord) -> Self {
        Self {
            name_lower: record.name.to_lowercase(),
            path_lower: record.path.to_lowercase(),
            record,
        }
    }
}

fn insert_sql(rows: usize) -> String {
    let row = format!("({})", vec!["?"; COLUMNS_PER_ROW].join(", "));
    format!(
        "INSERT INTO symbols (name, name_lower, path, path_lower, line, character, kind, \
         language, parent, parent_kind, signature, file_limited) VALUES {}",
        vec![row.as_str(); rows].join(", ")
    )
}

impl StoreTx<'_> {
    /// Drain `symbols` into the symbols table. Returns the number of rows written.
    ///
    /// The first stream error, a failed insert, or `ctx` ending stops both
    /// sides and is returned; the enclosing transaction then rolls back.
    pub fn write_symbols(&self, ctx: &Context, symbols: SymbolStream) -> crate::Result<usize> {
        let (tx_ch, rx_ch) = crossbeam_channel::bounded::<SymbolRow>(CHANNEL_CAPACITY);

        // Set by the writer on failure so the producer stops early
        let cancelled = AtomicBool::new(false);
        let cancelled_ref = &cancelled;

        std::thread::scope(|s| {
            let producer = s.spawn(move || produce(ctx, symbols, tx_ch, cancelled_ref));

            let written = self.consume(ctx, &rx_ch);
            if written.is_err() {
                cancelled.store(true, Ordering::Relaxed);
            }
            // Unblocks a producer stuck on a full channel
            drop(rx_ch);

            let produced = producer
                .join()
                .map_err(|_| SymbolsError::BuildTask("symbol producer panicked".to_string()))?;
            produced?;
            written
        })
    }

    /// Writer side: batch rows and insert until the channel closes.
    fn consume(&self, ctx: &Context, rx: &Receiver<SymbolRow>) -> crate::Result<usize> {
        let mut batch: Vec<SymbolRow> = Vec::with_capacity(ROWS_PER_INSERT);
        let mut written = 0usize;

        for row in rx.iter() {
            batch.push(row);
            if batch.len() >= ROWS_PER_INSERT {
                ctx.check()?;
                written += self.insert_rows(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            ctx.check()?;
            written += self.insert_rows(&batch)?;
        }
        Ok(written)
    }

    fn insert_rows(&self, rows: &[SymbolRow]) -> crate::Result<usize> {
        let mut stmt = self.tx.prepare_cached(&insert_sql(rows.len()))?;
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(rows.len() * COLUMNS_PER_ROW);
        for row in rows {
            let r = &row.record;
            let values: [&dyn ToSql; COLUMNS_PER_ROW] = [
                &r.name,
                &row.name_lower,
                &r.path,
                &row.path_lower,
                &r.line,
                &r.character,
                &r.kind,
                &r.language,
                &r.parent,
                &r.parent_kind,
                &r.signature,
                &r.file_limited,
            ];
            params.extend_from_slice(&values);
        }
        Ok(stmt.execute(params.as_slice())?)
    }
}

/// Producer side. Returns `Ok` early when the writer goes away; the writer
/// reports its own error.
fn produce(
    ctx: &Context,
    symbols: SymbolStream,
    tx: Sender<SymbolRow>,
    cancelled: &AtomicBool,
) -> crate::Result<()> {
    for item in symbols {
        if cancelled.load(Ordering::Relaxed) {
            return Ok(());
        }
        ctx.check()?;

        let mut row = SymbolRow::from(item?);
        loop {
            match tx.send_timeout(row, SEND_POLL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(unsent)) => {
                    if cancelled.load(Ordering::Relaxed) {
                        return Ok(());
                    }
                    ctx.check()?;
                    row = unsent;
                }
                Err(SendTimeoutError::Disconnected(_)) => return Ok(()),
            }
        }
    }
    ctx.check()
}
