//! Statements as they travel from a dump stream to the destination.

use std::ops::Range;

use tracing::debug;

use crate::dump::table_reference;
use crate::package::{Package, PackageKind};
use crate::parser;

/// Whether a statement changes structure or inserts rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Structure,
    RowInsert,
}

/// The parts of an INSERT that decide whether two inserts may be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertShape {
    pub ignore: bool,
    /// Unquoted schema qualifier, if the target has one.
    pub schema: Option<String>,
    /// Unquoted table name.
    pub table: String,
    /// Explicit column list, `None` when the INSERT has none.
    pub columns: Option<Vec<String>>,
    /// Byte offset just past the `VALUES` keyword.
    pub header_end: usize,
    /// Byte range of the value tuples, without the trailing `;`.
    pub rows: Range<usize>,
    pub row_count: usize,
}

impl InsertShape {
    /// Two inserts can share one statement when they agree on modifier,
    /// target table and column projection.
    pub fn same_target(&self, other: &InsertShape) -> bool {
        self.ignore == other.ignore
            && self.schema == other.schema
            && self.table == other.table
            && self.columns == other.columns
    }

    /// Target as a quoted reference, e.g. `` `shop`.`orders` ``.
    pub fn target(&self) -> String {
        table_reference(&self.table, self.schema.as_deref())
    }
}

/// One SQL statement, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    kind: StatementKind,
    text: String,
    shape: Option<InsertShape>,
}

impl Statement {
    /// Classify raw SQL text.
    ///
    /// Anything that is not an INSERT is structure. An INSERT that does not
    /// have the mergeable shape stays a row insert without a shape.
    pub fn parse(text: impl Into<String>) -> Self {
        let text = text.into();
        if !parser::is_insert(&text) {
            return Self::structure(text);
        }
        let shape = match parser::parse_insert(&text) {
            Ok(shape) => Some(shape),
            Err(e) => {
                debug!(error = %e, "insert will be replayed unmerged");
                None
            }
        };
        Self {
            kind: StatementKind::RowInsert,
            text,
            shape,
        }
    }

    /// A structure (DDL) statement, taken verbatim.
    pub fn structure(text: impl Into<String>) -> Self {
        Self {
            kind: StatementKind::Structure,
            text: text.into(),
            shape: None,
        }
    }

    /// Rebuild a statement from a decoded binary package.
    ///
    /// Schema packages are structure by definition; row packages are parsed
    /// for their insert shape.
    pub fn from_package(package: &Package) -> crate::error::DumpResult<Self> {
        let sql = package.sql()?.trim();
        Ok(match package.kind {
            PackageKind::Schema => Self::structure(sql),
            PackageKind::RowData => Self::parse(sql),
        })
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn shape(&self) -> Option<&InsertShape> {
        self.shape.as_ref()
    }

    pub fn is_insert(&self) -> bool {
        self.kind == StatementKind::RowInsert
    }

    /// Target table of a well-formed insert, without its schema.
    pub fn table(&self) -> Option<&str> {
        self.shape.as_ref().map(|s| s.table.as_str())
    }

    /// Quoted, schema-qualified target of a well-formed insert.
    pub fn target(&self) -> Option<String> {
        self.shape.as_ref().map(InsertShape::target)
    }

    /// Whether `other` may join a merge group led by `self`.
    pub fn can_merge_with(&self, other: &Statement) -> bool {
        match (&self.shape, &other.shape) {
            (Some(a), Some(b)) => a.same_target(b),
            _ => false,
        }
    }

    /// Text of the value tuples, e.g. `(1,'a'), (2,'b')`.
    pub fn values_text(&self) -> Option<&str> {
        self.shape.as_ref().map(|s| self.text[s.rows.clone()].trim())
    }

    /// Header up to and including the `VALUES` keyword.
    fn header_text(&self) -> Option<&str> {
        self.shape.as_ref().map(|s| &self.text[..s.header_end])
    }

    /// Combine a group of mergeable inserts into one multi-row insert.
    ///
    /// Returns `None` for an empty group or when a member has no insert
    /// shape. Callers guarantee every member shares the first member's shape.
    pub(crate) fn merge_group(group: &[Statement]) -> Option<Statement> {
        let first = group.first()?;
        if group.len() == 1 {
            return Some(first.clone());
        }

        let header = first.header_text()?.trim_start();
        let mut text = String::with_capacity(group.iter().map(|s| s.text.len()).sum());
        text.push_str(header);
        text.push(' ');

        let mut row_count = 0;
        for (i, member) in group.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            text.push_str(member.values_text()?);
            row_count += member.shape.as_ref().map_or(0, |s| s.row_count);
        }
        let rows_end = text.len();
        text.push(';');

        let mut shape = first.shape.clone()?;
        shape.header_end = header.len();
        shape.rows = header.len() + 1..rows_end;
        shape.row_count = row_count;

        Some(Statement {
            kind: StatementKind::RowInsert,
            text,
            shape: Some(shape),
        })
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
