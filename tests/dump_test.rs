use std::collections::BTreeMap;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rsdump::dump::{ColumnMeta, DumpOptions, OutputMode, RowSet, TableSource, dump};
use rsdump::error::{DumpError, DumpResult};
use rsdump::package::{Package, PackageKind, decode_all};
use rsdump::value::SqlValue;

/// In-memory stand-in for a database.
#[derive(Default)]
struct MemorySource {
    tables: BTreeMap<String, (String, RowSet)>,
    fetched: Vec<String>,
}

impl MemorySource {
    fn shop() -> Self {
        let mut source = MemorySource::default();

        let mut users = RowSet::new(vec![
            ColumnMeta::new("id", "INT UNSIGNED"),
            ColumnMeta::new("name", "VARCHAR"),
            ColumnMeta::new("born", "DATE"),
        ]);
        users.push_row(vec![
            SqlValue::UInt(1),
            "O'Brien".into(),
            NaiveDate::from_ymd_opt(1990, 5, 17).unwrap().into(),
        ]);
        users.push_row(vec![SqlValue::UInt(2), "Ann".into(), SqlValue::Null]);
        source.add("users", "CREATE TABLE `users` (\n  `id` int unsigned NOT NULL\n)", users);

        let mut orders = RowSet::new(vec![
            ColumnMeta::new("id", "BIGINT"),
            ColumnMeta::new("total", "DECIMAL"),
            ColumnMeta::new("meta", "JSON"),
        ]);
        orders.push_row(vec![
            SqlValue::Int(10),
            SqlValue::Decimal("19.90".to_string()),
            r#"{"note":"it's"}"#.into(),
        ]);
        source.add("orders", "CREATE TABLE `orders` (\n  `id` bigint\n)", orders);

        source
    }

    fn add(&mut self, name: &str, create: &str, rows: RowSet) {
        self.tables
            .insert(name.to_string(), (create.to_string(), rows));
    }

    fn table(&self, name: &str) -> DumpResult<&(String, RowSet)> {
        self.tables
            .get(name)
            .ok_or_else(|| DumpError::Database(format!("Table '{}' doesn't exist", name)))
    }
}

impl TableSource for MemorySource {
    async fn list_tables(&mut self) -> DumpResult<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn create_table_sql(&mut self, table: &str) -> DumpResult<String> {
        Ok(self.table(table)?.0.clone())
    }

    async fn fetch_rows(&mut self, table: &str) -> DumpResult<RowSet> {
        self.fetched.push(table.to_string());
        Ok(self.table(table)?.1.clone())
    }
}

fn quiet() -> DumpOptions {
    DumpOptions {
        annotate: false,
        ..DumpOptions::default()
    }
}

#[tokio::test]
async fn test_text_dump_of_every_table() {
    let mut source = MemorySource::shop();
    let mut out = Vec::new();
    let report = dump(&mut source, &quiet(), &mut out).await.unwrap();

    assert_eq!(report.tables, 2);
    assert_eq!(report.rows, 3);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "CREATE TABLE IF NOT EXISTS `orders` (\n  `id` bigint\n);\n\n\n\n\
         INSERT INTO `orders` VALUES (10,19.90,'{\"note\":\"it''s\"}');\n\n\n\
         CREATE TABLE IF NOT EXISTS `users` (\n  `id` int unsigned NOT NULL\n);\n\n\n\n\
         INSERT INTO `users` VALUES (1,'O''Brien','1990-05-17');\n\
         INSERT INTO `users` VALUES (2,'Ann',NULL);\n\n\n"
    );
}

#[tokio::test]
async fn test_banners_bracket_the_dump() {
    let mut source = MemorySource::shop();
    let options = DumpOptions {
        tables: vec!["users".to_string()],
        ..DumpOptions::default()
    };
    let mut out = Vec::new();
    dump(&mut source, &options, &mut out).await.unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("-- ----------------------------\n-- MySQL Database Dump\n"));
    assert!(text.contains("-- Table structure for users\n"));
    assert!(text.contains("-- Records of users\n"));
    assert!(text.contains("-- Dumped by rsdump\n-- Cost Time: "));
    assert!(!text.contains("orders"));
}

#[tokio::test]
async fn test_structure_only_dump_skips_rows() {
    let mut source = MemorySource::shop();
    let options = DumpOptions {
        with_data: false,
        drop_table: true,
        target_schema: Some("copy".to_string()),
        tables: vec!["users".to_string()],
        ..quiet()
    };
    let mut out = Vec::new();
    let report = dump(&mut source, &options, &mut out).await.unwrap();

    assert_eq!(report.rows, 0);
    assert!(source.fetched.is_empty());
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "DROP TABLE IF EXISTS `copy`.`users`;\n\
         CREATE TABLE IF NOT EXISTS `copy`.`users` (\n  `id` int unsigned NOT NULL\n);\n\n\n\n"
    );
}

#[tokio::test]
async fn test_binary_dump_frames_every_statement() {
    let mut source = MemorySource::shop();
    let options = DumpOptions {
        mode: OutputMode::Binary,
        include_column_names: true,
        tables: vec!["users".to_string()],
        ..DumpOptions::default()
    };
    let mut out = Vec::new();
    dump(&mut source, &options, &mut out).await.unwrap();

    let packages = decode_all(&out).unwrap();
    let kinds: Vec<PackageKind> = packages.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![PackageKind::Schema, PackageKind::RowData, PackageKind::RowData]
    );
    assert_eq!(
        packages[1],
        Package::row_data("INSERT INTO `users`(`id`,`name`,`born`) VALUES (1,'O''Brien','1990-05-17');")
    );
    // No banner text anywhere in a binary dump.
    assert!(!out.windows(2).any(|w| w == b"--"));
}

#[tokio::test]
async fn test_unsupported_column_type_aborts() {
    let mut source = MemorySource::default();
    let mut rows = RowSet::new(vec![ColumnMeta::new("area", "POLYGON")]);
    rows.push_row(vec![SqlValue::Bytes(vec![0, 1])]);
    source.add("zones", "CREATE TABLE `zones` (area polygon)", rows);

    let mut out = Vec::new();
    let err = dump(&mut source, &quiet(), &mut out).await.unwrap_err();
    assert!(matches!(err, DumpError::UnsupportedType(name) if name == "POLYGON"));
}

#[tokio::test]
async fn test_failed_structure_fetch_writes_no_drop() {
    let mut source = MemorySource::shop();
    let options = DumpOptions {
        drop_table: true,
        tables: vec!["ghosts".to_string()],
        ..quiet()
    };
    let mut out = Vec::new();
    let err = dump(&mut source, &options, &mut out).await.unwrap_err();

    assert!(matches!(err, DumpError::Database(_)));
    assert_eq!(String::from_utf8(out).unwrap(), "");
}
