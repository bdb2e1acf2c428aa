//! Dump writer.
//!
//! Turns each table's structure statement and rows into either a readable
//! SQL script or a stream of binary packages. Rows are written one INSERT per
//! row; merging only happens on restore.

use std::future::Future;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{DumpError, DumpResult};
use crate::package::{PackageKind, encode_frame};
use crate::value::{SqlValue, TypeCategory, encode_value};

const BANNER_RULE: &str = "-- ----------------------------";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Output format of a dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Text,
    Binary,
}

/// Settings for one dump run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpOptions {
    pub mode: OutputMode,
    /// Emit an explicit column list in every INSERT.
    pub include_column_names: bool,
    /// Qualify generated statements with this schema instead of the source's.
    pub target_schema: Option<String>,
    /// Write `--` banners (text mode only).
    pub annotate: bool,
    pub drop_table: bool,
    pub with_data: bool,
    /// Tables to dump; empty means every table.
    pub tables: Vec<String>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            mode: OutputMode::Text,
            include_column_names: false,
            target_schema: None,
            annotate: true,
            drop_table: false,
            with_data: true,
            tables: Vec::new(),
        }
    }
}

/// Name and declared type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    pub fn category(&self) -> DumpResult<TypeCategory> {
        TypeCategory::from_type_name(&self.type_name)
    }
}

/// All rows of one table, with columns in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<SqlValue>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Source of tables, structure and rows for a dump.
pub trait TableSource {
    /// Every table in the source schema.
    fn list_tables(&mut self) -> impl Future<Output = DumpResult<Vec<String>>> + Send;

    /// The `CREATE TABLE` statement of one table.
    fn create_table_sql(&mut self, table: &str) -> impl Future<Output = DumpResult<String>> + Send;

    /// Every row of one table.
    fn fetch_rows(&mut self, table: &str) -> impl Future<Output = DumpResult<RowSet>> + Send;
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Table reference, qualified with the target schema when one is set.
pub fn table_reference(table: &str, target_schema: Option<&str>) -> String {
    match target_schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// Rewrite a `CREATE TABLE` statement so replaying it is harmless when the
/// table exists, optionally moving it into `target_schema`.
pub fn idempotent_create(create_sql: &str, target_schema: Option<&str>) -> String {
    const CREATE: &str = "CREATE TABLE ";
    const IF_NOT_EXISTS: &str = "IF NOT EXISTS ";

    let sql = create_sql.trim().trim_end_matches(';').trim_end();
    let Some(pos) = sql.find(CREATE) else {
        warn!("structure statement is not a CREATE TABLE; kept as is");
        return sql.to_string();
    };

    let (head, rest) = sql.split_at(pos + CREATE.len());
    let rest = rest.strip_prefix(IF_NOT_EXISTS).unwrap_or(rest);
    let qualifier = target_schema
        .map(|schema| format!("{}.", quote_identifier(schema)))
        .unwrap_or_default();
    format!("{}{}{}{}", head, IF_NOT_EXISTS, qualifier, rest)
}

/// Render one row as a single INSERT statement, terminated by `;`.
///
/// Any value that cannot be encoded fails the whole row; nothing partial is
/// returned.
pub fn render_insert(
    table: &str,
    columns: &[ColumnMeta],
    row: &[SqlValue],
    options: &DumpOptions,
) -> DumpResult<String> {
    if row.len() != columns.len() {
        return Err(DumpError::Database(format!(
            "row of `{}` has {} values for {} columns",
            table,
            row.len(),
            columns.len()
        )));
    }

    let mut sql = String::from("INSERT INTO ");
    sql.push_str(&table_reference(table, options.target_schema.as_deref()));

    if options.include_column_names {
        let names: Vec<String> = columns.iter().map(|c| quote_identifier(&c.name)).collect();
        sql.push('(');
        sql.push_str(&names.join(","));
        sql.push(')');
    }

    sql.push_str(" VALUES (");
    for (i, (value, column)) in row.iter().zip(columns).enumerate() {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(&encode_value(value, &column.type_name)?);
    }
    sql.push_str(");");

    Ok(sql)
}

/// Writes dump output to a sink.
pub struct DumpWriter<W: Write> {
    out: BufWriter<W>,
    options: DumpOptions,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(sink: W, options: DumpOptions) -> Self {
        Self {
            out: BufWriter::new(sink),
            options,
        }
    }

    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    fn annotated(&self) -> bool {
        self.options.annotate && self.options.mode == OutputMode::Text
    }

    fn banner(&mut self, lines: &[&str]) -> DumpResult<()> {
        if !self.annotated() {
            return Ok(());
        }
        writeln!(self.out, "{}", BANNER_RULE)?;
        for line in lines {
            writeln!(self.out, "-- {}", line)?;
        }
        writeln!(self.out, "{}", BANNER_RULE)?;
        Ok(())
    }

    /// Text: the statement on its own line. Binary: one framed package.
    fn emit(&mut self, kind: PackageKind, sql: &str) -> DumpResult<()> {
        match self.options.mode {
            OutputMode::Text => writeln!(self.out, "{}", sql)?,
            OutputMode::Binary => self.out.write_all(&encode_frame(kind, sql.as_bytes())?)?,
        }
        Ok(())
    }

    fn spacer(&mut self, newlines: usize) -> DumpResult<()> {
        if self.options.mode == OutputMode::Text {
            self.out.write_all(&b"\n\n\n\n"[..newlines.min(4)])?;
        }
        Ok(())
    }

    pub fn write_header(&mut self, started: NaiveDateTime) -> DumpResult<()> {
        let start = format!("Start Time: {}", started.format(TIME_FORMAT));
        self.banner(&["MySQL Database Dump", &start])?;
        if self.annotated() {
            self.out.write_all(b"\n\n")?;
        }
        Ok(())
    }

    pub fn write_drop(&mut self, table: &str) -> DumpResult<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {};",
            table_reference(table, self.options.target_schema.as_deref())
        );
        self.emit(PackageKind::Schema, &sql)
    }

    pub fn write_structure(&mut self, table: &str, create_sql: &str) -> DumpResult<()> {
        self.banner(&[&format!("Table structure for {}", table)])?;
        let sql = idempotent_create(create_sql, self.options.target_schema.as_deref());
        self.emit(PackageKind::Schema, &format!("{};", sql))?;
        self.spacer(3)
    }

    /// Write one INSERT per row; returns the number of rows written.
    pub fn write_rows(&mut self, table: &str, rows: &RowSet) -> DumpResult<usize> {
        self.banner(&[&format!("Records of {}", table)])?;
        for row in &rows.rows {
            let sql = render_insert(table, &rows.columns, row, &self.options)?;
            self.emit(PackageKind::RowData, &sql)?;
        }
        self.spacer(2)?;
        Ok(rows.len())
    }

    pub fn write_footer(&mut self, elapsed: Duration) -> DumpResult<()> {
        let cost = format!("Cost Time: {:?}", elapsed);
        self.banner(&["Dumped by rsdump", &cost])
    }

    /// Flush buffered output and hand back the sink.
    pub fn finish(self) -> DumpResult<W> {
        self.out
            .into_inner()
            .map_err(|e| DumpError::Io(e.into_error()))
    }
}

/// Summary of a completed dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpReport {
    pub tables: usize,
    pub rows: u64,
    pub elapsed_ms: u128,
}

/// Dump the selected tables of `source` into `sink`.
///
/// Stops at the first failing table. Output already written stays in the
/// sink.
pub async fn dump<S, W>(source: &mut S, options: &DumpOptions, sink: W) -> DumpResult<DumpReport>
where
    S: TableSource,
    W: Write,
{
    let started = Local::now();
    let clock = Instant::now();
    info!(start = %started.format(TIME_FORMAT), mode = ?options.mode, "dump started");

    let mut writer = DumpWriter::new(sink, options.clone());
    writer.write_header(started.naive_local())?;

    let tables = if options.tables.is_empty() {
        source.list_tables().await?
    } else {
        options.tables.clone()
    };

    let mut report = DumpReport::default();
    for table in &tables {
        match dump_table(source, &mut writer, table).await {
            Ok(rows) => {
                info!(table = %table, rows, "table dumped");
                report.tables += 1;
                report.rows += rows as u64;
            }
            Err(e) => {
                error!(table = %table, error = %e, "table dump failed");
                return Err(e);
            }
        }
    }

    let elapsed = clock.elapsed();
    writer.write_footer(elapsed)?;
    writer.finish()?;

    report.elapsed_ms = elapsed.as_millis();
    info!(tables = report.tables, rows = report.rows, cost = ?elapsed, "dump finished");
    Ok(report)
}

async fn dump_table<S, W>(source: &mut S, writer: &mut DumpWriter<W>, table: &str) -> DumpResult<usize>
where
    S: TableSource,
    W: Write,
{
    // Nothing is written for the table until its structure is known.
    let create_sql = source.create_table_sql(table).await?;
    if writer.options().drop_table {
        writer.write_drop(table)?;
    }
    writer.write_structure(table, &create_sql)?;

    if !writer.options().with_data {
        return Ok(0);
    }
    let rows = source.fetch_rows(table).await?;
    writer.write_rows(table, &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Package, decode_all};
    use pretty_assertions::assert_eq;

    fn users() -> RowSet {
        let mut rows = RowSet::new(vec![
            ColumnMeta::new("id", "BIGINT UNSIGNED"),
            ColumnMeta::new("name", "VARCHAR"),
            ColumnMeta::new("avatar", "BLOB"),
        ]);
        rows.push_row(vec![SqlValue::UInt(1), "O'Brien".into(), SqlValue::Null]);
        rows.push_row(vec![SqlValue::UInt(2), "Ann".into(), vec![0xCAu8, 0xFE].into()]);
        rows
    }

    fn text_options() -> DumpOptions {
        DumpOptions {
            annotate: false,
            ..DumpOptions::default()
        }
    }

    #[test]
    fn test_idempotent_create() {
        let sql = "CREATE TABLE `t` (\n  `id` int\n) ENGINE=InnoDB";
        assert_eq!(
            idempotent_create(sql, None),
            "CREATE TABLE IF NOT EXISTS `t` (\n  `id` int\n) ENGINE=InnoDB"
        );
        assert_eq!(
            idempotent_create(sql, Some("backup")),
            "CREATE TABLE IF NOT EXISTS `backup`.`t` (\n  `id` int\n) ENGINE=InnoDB"
        );
        assert_eq!(
            idempotent_create("CREATE TABLE IF NOT EXISTS `t` (a int);", None),
            "CREATE TABLE IF NOT EXISTS `t` (a int)"
        );
    }

    #[test]
    fn test_render_insert() {
        let rows = users();
        let sql = render_insert("users", &rows.columns, &rows.rows[0], &text_options()).unwrap();
        assert_eq!(sql, "INSERT INTO `users` VALUES (1,'O''Brien',NULL);");

        let options = DumpOptions {
            include_column_names: true,
            target_schema: Some("copy".to_string()),
            ..text_options()
        };
        let sql = render_insert("users", &rows.columns, &rows.rows[1], &options).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `copy`.`users`(`id`,`name`,`avatar`) VALUES (2,'Ann',0xCAFE);"
        );
    }

    #[test]
    fn test_render_insert_unsupported_type() {
        let columns = vec![ColumnMeta::new("id", "INT"), ColumnMeta::new("shape", "GEOMETRY")];
        let err = render_insert(
            "shapes",
            &columns,
            &[1i64.into(), SqlValue::Bytes(vec![1, 2])],
            &text_options(),
        )
        .unwrap_err();
        assert!(matches!(err, DumpError::UnsupportedType(_)));

        // NULL never consults the type.
        let sql = render_insert("shapes", &columns, &[1i64.into(), SqlValue::Null], &text_options())
            .unwrap();
        assert_eq!(sql, "INSERT INTO `shapes` VALUES (1,NULL);");
    }

    #[test]
    fn test_text_output_without_banners() {
        let mut out = Vec::new();
        let mut writer = DumpWriter::new(&mut out, text_options());
        writer.write_structure("users", "CREATE TABLE `users` (id int)").unwrap();
        writer.write_rows("users", &users()).unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "CREATE TABLE IF NOT EXISTS `users` (id int);\n\n\n\n\
             INSERT INTO `users` VALUES (1,'O''Brien',NULL);\n\
             INSERT INTO `users` VALUES (2,'Ann',0xCAFE);\n\n\n"
        );
    }

    #[test]
    fn test_text_banners() {
        let mut out = Vec::new();
        let mut writer = DumpWriter::new(&mut out, DumpOptions::default());
        let started = chrono::NaiveDate::from_ymd_opt(2024, 8, 21)
            .unwrap()
            .and_hms_opt(8, 52, 37)
            .unwrap();
        writer.write_header(started).unwrap();
        writer.write_rows("users", &RowSet::default()).unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(
            "-- ----------------------------\n\
             -- MySQL Database Dump\n\
             -- Start Time: 2024-08-21 08:52:37\n\
             -- ----------------------------\n\n\n"
        ));
        assert!(text.contains("-- Records of users\n"));
    }

    #[test]
    fn test_binary_output_is_framed_only() {
        let options = DumpOptions {
            mode: OutputMode::Binary,
            drop_table: true,
            ..DumpOptions::default()
        };
        let mut out = Vec::new();
        let mut writer = DumpWriter::new(&mut out, options);
        writer.write_header(Local::now().naive_local()).unwrap();
        writer.write_drop("users").unwrap();
        writer.write_structure("users", "CREATE TABLE `users` (id int)").unwrap();
        writer.write_rows("users", &users()).unwrap();
        writer.write_footer(Duration::from_millis(5)).unwrap();
        writer.finish().unwrap();

        let packages = decode_all(&out).unwrap();
        assert_eq!(
            packages,
            vec![
                Package::schema("DROP TABLE IF EXISTS `users`;"),
                Package::schema("CREATE TABLE IF NOT EXISTS `users` (id int);"),
                Package::row_data("INSERT INTO `users` VALUES (1,'O''Brien',NULL);"),
                Package::row_data("INSERT INTO `users` VALUES (2,'Ann',0xCAFE);"),
            ]
        );
    }

    #[test]
    fn test_failed_row_writes_nothing_partial() {
        let mut rows = RowSet::new(vec![ColumnMeta::new("d", "DATE")]);
        rows.push_row(vec!["not a date".into()]);

        let mut out = Vec::new();
        let mut writer = DumpWriter::new(&mut out, text_options());
        let err = writer.write_rows("events", &rows).unwrap_err();
        assert!(matches!(err, DumpError::TypeConversionMismatch { .. }));
        writer.finish().unwrap();
        assert!(out.is_empty());
    }
}
