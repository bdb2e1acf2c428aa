//! Insert merging for restore throughput.
//!
//! Consecutive single-row inserts with the same target and column list are
//! combined into one multi-row insert:
//!
//! ```
//! use rsdump::merge::merge_insert;
//!
//! let merged = merge_insert(&[
//!     "INSERT INTO `test` VALUES (1, 'a');",
//!     "INSERT INTO `test` VALUES (2, 'b');",
//! ])
//! .unwrap();
//! assert_eq!(merged, "INSERT INTO `test` VALUES (1, 'a'), (2, 'b');");
//! ```
//!
//! Merging is single pass: the merger holds the current group and looks at
//! one statement at a time. Anything that cannot join the group closes it.

use std::collections::VecDeque;
use std::iter::Fuse;

use serde::Serialize;
use tracing::debug;

use crate::error::{DumpError, DumpResult};
use crate::statement::Statement;

/// Counters collected while merging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Well-formed inserts read.
    pub inserts_in: usize,
    /// Insert statements produced from them.
    pub inserts_out: usize,
}

/// Iterator adaptor that merges runs of compatible inserts.
///
/// Errors from the source are passed through in position, after the group
/// that preceded them has been emitted.
pub struct InsertMerger<I> {
    source: Fuse<I>,
    max_group: Option<usize>,
    group: Vec<Statement>,
    held: Option<DumpResult<Statement>>,
    ready: VecDeque<Statement>,
    stats: MergeStats,
}

impl<I> InsertMerger<I>
where
    I: Iterator<Item = DumpResult<Statement>>,
{
    pub fn new(source: I) -> Self {
        Self {
            source: source.fuse(),
            max_group: None,
            group: Vec::new(),
            held: None,
            ready: VecDeque::new(),
            stats: MergeStats::default(),
        }
    }

    /// Cap the number of statements combined into one insert.
    pub fn with_max_group(mut self, max: Option<usize>) -> Self {
        self.max_group = max.filter(|&m| m > 0);
        self
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    fn group_full(&self) -> bool {
        self.max_group.is_some_and(|max| self.group.len() >= max)
    }

    fn flush(&mut self) {
        if self.group.is_empty() {
            return;
        }
        let group = std::mem::take(&mut self.group);
        if group.len() > 1 {
            if let Some(merged) = Statement::merge_group(&group) {
                debug!(
                    table = %merged.target().unwrap_or_default(),
                    statements = group.len(),
                    "merged inserts"
                );
                self.stats.inserts_out += 1;
                self.ready.push_back(merged);
                return;
            }
        }
        self.stats.inserts_out += group.len();
        self.ready.extend(group);
    }
}

impl<I> Iterator for InsertMerger<I>
where
    I: Iterator<Item = DumpResult<Statement>>,
{
    type Item = DumpResult<Statement>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(statement) = self.ready.pop_front() {
                return Some(Ok(statement));
            }

            let item = match self.held.take() {
                Some(item) => item,
                None => match self.source.next() {
                    Some(item) => item,
                    None if self.group.is_empty() => return None,
                    None => {
                        self.flush();
                        continue;
                    }
                },
            };

            match item {
                Ok(statement) if statement.shape().is_some() => {
                    let joins = match self.group.first() {
                        None => true,
                        Some(lead) => lead.can_merge_with(&statement) && !self.group_full(),
                    };
                    if joins {
                        self.stats.inserts_in += 1;
                        self.group.push(statement);
                    } else {
                        self.held = Some(Ok(statement));
                        self.flush();
                    }
                }
                other if self.group.is_empty() => return Some(other),
                other => {
                    self.held = Some(other);
                    self.flush();
                }
            }
        }
    }
}

/// Merge an in-memory statement sequence.
pub fn merge_statements<I>(statements: I) -> Vec<Statement>
where
    I: IntoIterator<Item = Statement>,
{
    InsertMerger::new(statements.into_iter().map(Ok))
        .filter_map(Result::ok)
        .collect()
}

/// Merge a list of INSERT statements that must all share one shape.
pub fn merge_insert<S: AsRef<str>>(inserts: &[S]) -> DumpResult<String> {
    let statements: Vec<Statement> = inserts
        .iter()
        .map(|sql| Statement::parse(sql.as_ref().trim()))
        .collect();

    let first = statements
        .first()
        .ok_or_else(|| DumpError::MalformedStatement("no statements to merge".to_string()))?;
    for statement in &statements {
        if !first.can_merge_with(statement) {
            return Err(DumpError::MalformedStatement(format!(
                "cannot merge '{}' into an insert on {}",
                statement.text(),
                first.target().unwrap_or_else(|| "?".to_string())
            )));
        }
    }

    Statement::merge_group(&statements)
        .map(Statement::into_text)
        .ok_or_else(|| DumpError::MalformedStatement("insert without values".to_string()))
}
