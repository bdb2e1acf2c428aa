//! Restore engine.
//!
//! Replays a dump stream against a destination, one statement at a time and
//! strictly in stream order. Row inserts are merged on the way (see
//! [`crate::merge`]); structure statements are executed where they appear.
//!
//! # Example
//!
//! ```rust,ignore
//! let db = MysqlDatabase::connect("mysql://root@localhost/shop").await?;
//! let executor = db.executor().await?;
//! let file = std::io::BufReader::new(std::fs::File::open("shop.sql")?);
//! let report = restore(executor, file, &RestoreOptions::default()).await?;
//! ```

use std::future::Future;
use std::io::{BufRead, Write};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::dump::OutputMode;
use crate::error::{DumpError, DumpResult};
use crate::merge::{InsertMerger, MergeStats};
use crate::package::decode_stream;
use crate::parser::StatementSplitter;
use crate::statement::{Statement, StatementKind};

/// Destination that runs one statement at a time.
pub trait StatementExecutor {
    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str) -> impl Future<Output = DumpResult<u64>> + Send;
}

/// Settings for one restore run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreOptions {
    /// Format of the incoming stream.
    pub mode: OutputMode,
    pub merge_inserts: bool,
    /// Most single-row inserts folded into one statement; unlimited if unset.
    /// Unlimited groups can exceed the server's `max_allowed_packet` on big
    /// tables.
    pub max_batch_rows: Option<usize>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            mode: OutputMode::Text,
            merge_inserts: true,
            max_batch_rows: None,
        }
    }
}

/// Where the restore is within the current table section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestorePhase {
    Idle,
    Structure,
    Rows,
}

/// Summary of a completed restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub statements_executed: usize,
    pub structure_statements: usize,
    pub insert_statements: usize,
    /// Runs of inserts into one table.
    pub table_sections: usize,
    pub rows_affected: u64,
    pub merge: MergeStats,
    pub elapsed_ms: u128,
}

/// Applies statement streams to an executor.
pub struct Restorer<E> {
    executor: E,
    options: RestoreOptions,
    phase: RestorePhase,
    current_table: Option<String>,
}

impl<E: StatementExecutor> Restorer<E> {
    pub fn new(executor: E, options: RestoreOptions) -> Self {
        Self {
            executor,
            options,
            phase: RestorePhase::Idle,
            current_table: None,
        }
    }

    pub fn phase(&self) -> RestorePhase {
        self.phase
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Execute every statement of `statements`, merging inserts if enabled.
    ///
    /// Halts at the first error: a decode error from the stream is returned
    /// as is, a rejected statement as `ExecutionFailure` carrying its 1-based
    /// position in the executed sequence and its text.
    pub async fn apply<I>(&mut self, statements: I) -> DumpResult<RestoreReport>
    where
        I: IntoIterator<Item = DumpResult<Statement>>,
    {
        let clock = Instant::now();
        let max_group = if self.options.merge_inserts {
            self.options.max_batch_rows
        } else {
            Some(1)
        };
        let mut merger = InsertMerger::new(statements.into_iter()).with_max_group(max_group);
        let mut report = RestoreReport::default();

        info!(merge = self.options.merge_inserts, "restore started");

        for item in merger.by_ref() {
            let statement = item?;
            self.advance(&statement, &mut report);

            let index = report.statements_executed + 1;
            match self.executor.execute(statement.text()).await {
                Ok(affected) => {
                    report.statements_executed = index;
                    report.rows_affected += affected;
                }
                Err(e) => {
                    error!(index, error = %e, "statement rejected");
                    return Err(DumpError::ExecutionFailure {
                        index,
                        statement: statement.into_text(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.finish_section();
        self.phase = RestorePhase::Idle;
        report.merge = merger.stats();
        report.elapsed_ms = clock.elapsed().as_millis();
        info!(
            statements = report.statements_executed,
            rows = report.rows_affected,
            elapsed_ms = report.elapsed_ms as u64,
            "restore finished"
        );
        Ok(report)
    }

    fn advance(&mut self, statement: &Statement, report: &mut RestoreReport) {
        match statement.kind() {
            StatementKind::Structure => {
                report.structure_statements += 1;
                if self.phase == RestorePhase::Rows {
                    self.finish_section();
                }
                self.phase = RestorePhase::Structure;
            }
            StatementKind::RowInsert => {
                report.insert_statements += 1;
                let target = statement.target();
                let new_section = self.phase != RestorePhase::Rows
                    || (target.is_some() && target != self.current_table);
                if new_section {
                    self.finish_section();
                    report.table_sections += 1;
                    debug!(table = target.as_deref().unwrap_or("?"), "applying rows");
                }
                if target.is_some() {
                    self.current_table = target;
                }
                self.phase = RestorePhase::Rows;
            }
        }
    }

    fn finish_section(&mut self) {
        if let Some(table) = self.current_table.take() {
            debug!(table = %table, "rows applied");
        }
        self.phase = RestorePhase::Idle;
    }
}

/// Statements of a text dump.
pub fn text_statements<R: BufRead>(reader: R) -> impl Iterator<Item = DumpResult<Statement>> {
    StatementSplitter::new(reader).map(|sql| sql.map(Statement::parse))
}

/// Statements of a binary dump.
pub fn binary_statements<R: BufRead>(reader: R) -> impl Iterator<Item = DumpResult<Statement>> {
    decode_stream(reader).map(|package| package.and_then(|p| Statement::from_package(&p)))
}

/// Statements of a dump in the given format.
pub fn read_statements<'a, R>(
    reader: R,
    mode: OutputMode,
) -> Box<dyn Iterator<Item = DumpResult<Statement>> + 'a>
where
    R: BufRead + 'a,
{
    match mode {
        OutputMode::Text => Box::new(text_statements(reader)),
        OutputMode::Binary => Box::new(binary_statements(reader)),
    }
}

/// Read a dump from `reader` and replay it on `executor`.
pub async fn restore<E, R>(executor: E, reader: R, options: &RestoreOptions) -> DumpResult<RestoreReport>
where
    E: StatementExecutor,
    R: BufRead,
{
    let mut restorer = Restorer::new(executor, options.clone());
    restorer.apply(read_statements(reader, options.mode)).await
}

/// Executor that writes statements to a sink instead of running them.
pub struct WriterExecutor<W> {
    out: W,
}

impl<W: Write> WriterExecutor<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> StatementExecutor for WriterExecutor<W> {
    async fn execute(&mut self, sql: &str) -> DumpResult<u64> {
        writeln!(self.out, "{}", sql)?;
        Ok(0)
    }
}
