//! SQL text parsing using nom.
//!
//! Two jobs, both quote-aware:
//!
//! - splitting a text dump into statements ([`StatementSplitter`]);
//! - recognising the single shape the insert merger works with:
//!
//! ```text
//! INSERT [IGNORE] INTO `db`.`table` (`a`, `b`) VALUES (1, 'x'), (2, 'y');
//! ─┬──── ──┬───── ──┬── ──────┬───── ────┬───── ─┬──── ─────────┬────────
//!  │       │        │         │          │       │              └── row tuples
//!  │       │        │         │          │       └── keyword (VALUES or VALUE)
//!  │       │        │         │          └── optional column list
//!  │       │        │         └── table, optionally schema-qualified
//!  │       │        └── INTO
//!  │       └── optional modifier
//!  └── verb
//! ```

use std::collections::VecDeque;
use std::io::BufRead;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{eof, map, opt},
    error::{Error, ErrorKind},
    multi::separated_list1,
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};

use crate::error::{DumpError, DumpResult};
use crate::statement::InsertShape;

/// Parse a single-statement INSERT into its merge shape.
pub fn parse_insert(sql: &str) -> DumpResult<InsertShape> {
    match insert_statement(sql) {
        Ok((_, shape)) => Ok(shape),
        Err(e) => Err(DumpError::MalformedStatement(format!(
            "not an INSERT ... VALUES statement: {:?}",
            e.map(|inner| inner.code)
        ))),
    }
}

/// Whether the statement starts with the INSERT verb.
pub fn is_insert(sql: &str) -> bool {
    let head = sql.trim_start();
    head.len() >= 6
        && head.is_char_boundary(6)
        && head[..6].eq_ignore_ascii_case("insert")
        && head[6..].chars().next().is_none_or(|c| !is_identifier_char(c))
}

fn insert_statement(sql: &str) -> IResult<&str, InsertShape> {
    let (input, _) = multispace0(sql)?;
    let (input, _) = tag_no_case("INSERT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, ignore) = opt(terminated(tag_no_case("IGNORE"), multispace1))(input)?;
    let (input, _) = tag_no_case("INTO")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, (schema, table)) = table_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, columns) = opt(column_list)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = alt((tag_no_case("VALUES"), tag_no_case("VALUE")))(input)?;
    let header_end = offset(sql, input);

    let (input, _) = multispace0(input)?;
    let rows_start = offset(sql, input);
    let (input, rows) = separated_list1(
        delimited(multispace0, char(','), multispace0),
        row_tuple,
    )(input)?;
    let rows_end = offset(sql, input);

    let (input, _) = multispace0(input)?;
    let (input, _) = opt(char(';'))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = eof(input)?;

    Ok((
        input,
        InsertShape {
            ignore: ignore.is_some(),
            schema,
            table,
            columns,
            header_end,
            rows: rows_start..rows_end,
            row_count: rows.len(),
        },
    ))
}

fn offset(full: &str, rest: &str) -> usize {
    full.len() - rest.len()
}

/// Parse `name` or `schema.name` into unquoted (schema, table) parts.
fn table_name(input: &str) -> IResult<&str, (Option<String>, String)> {
    let (input, first) = identifier(input)?;
    let (input, second) = opt(preceded(char('.'), identifier))(input)?;
    Ok(match second {
        Some(table) => (input, (Some(first), table)),
        None => (input, (None, first)),
    })
}

/// Parse a parenthesised column list.
fn column_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        tuple((char('('), multispace0)),
        separated_list1(delimited(multispace0, char(','), multispace0), identifier),
        tuple((multispace0, char(')'))),
    )(input)
}

/// Parse an identifier, backtick-quoted or bare.
fn identifier(input: &str) -> IResult<&str, String> {
    alt((
        quoted_identifier,
        map(take_while1(is_identifier_char), |s: &str| s.to_string()),
    ))(input)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Parse a backtick-quoted identifier; a doubled backtick is a literal one.
fn quoted_identifier(input: &str) -> IResult<&str, String> {
    let (rest, _) = char('`')(input)?;
    let mut name = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '`' {
            if let Some((_, '`')) = chars.peek() {
                chars.next();
                name.push('`');
                continue;
            }
            return Ok((&rest[i + 1..], name));
        }
        name.push(c);
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

/// Parse one balanced `( ... )` value tuple, returning it verbatim.
fn row_tuple(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('(') {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Char)));
    }

    let mut quotes = QuoteTracker::default();
    let mut depth = 0usize;
    for (i, c) in input.char_indices() {
        if !quotes.step(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[i + 1..], &input[..=i]));
                }
            }
            _ => {}
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::TakeUntil)))
}

/// Tracks whether a character stream is inside a quoted string or identifier.
///
/// A doubled quote closes and immediately reopens the region, so it needs no
/// special case. Backslash escapes the next character inside string quotes.
#[derive(Debug, Default, Clone, Copy)]
struct QuoteTracker {
    quote: Option<char>,
    escaped: bool,
}

impl QuoteTracker {
    fn in_quote(&self) -> bool {
        self.quote.is_some()
    }

    /// Advance over `c`; true if `c` is structural (outside every quote).
    fn step(&mut self, c: char) -> bool {
        if let Some(q) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' && q != '`' {
                self.escaped = true;
            } else if c == q {
                self.quote = None;
            }
            return false;
        }
        if matches!(c, '\'' | '"' | '`') {
            self.quote = Some(c);
            return false;
        }
        true
    }
}

/// Splits a SQL text stream into statements.
///
/// Statements end at `;` outside quotes. `-- `, `#` and `/* */` comments are
/// dropped. Each yielded statement is trimmed and keeps its trailing `;`; text
/// after the last `;` is yielded as a final statement if non-blank.
pub struct StatementSplitter<R> {
    reader: R,
    line: String,
    buf: String,
    quotes: QuoteTracker,
    in_block_comment: bool,
    ready: VecDeque<String>,
    finished: bool,
}

impl<R: BufRead> StatementSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            buf: String::new(),
            quotes: QuoteTracker::default(),
            in_block_comment: false,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn feed_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if self.in_block_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    self.in_block_comment = false;
                    self.buf.push(' ');
                }
                continue;
            }

            if !self.quotes.in_quote() {
                let line_comment = match c {
                    '#' => true,
                    '-' if chars.peek() == Some(&'-') => {
                        let mut ahead = chars.clone();
                        ahead.next();
                        ahead.peek().is_none_or(|n| n.is_whitespace())
                    }
                    _ => false,
                };
                if line_comment {
                    self.buf.push('\n');
                    break;
                }
                if c == '/' && chars.peek() == Some(&'*') {
                    chars.next();
                    self.in_block_comment = true;
                    continue;
                }
                if c == ';' {
                    self.buf.push(';');
                    self.emit();
                    continue;
                }
            }

            self.quotes.step(c);
            self.buf.push(c);
        }

        self.line = line;
        self.line.clear();
    }

    fn emit(&mut self) {
        let statement = self.buf.trim();
        if !statement.is_empty() && statement != ";" {
            self.ready.push_back(statement.to_string());
        }
        self.buf.clear();
    }
}

impl<R: BufRead> Iterator for StatementSplitter<R> {
    type Item = DumpResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(statement) = self.ready.pop_front() {
                return Some(Ok(statement));
            }
            if self.finished {
                return None;
            }
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    self.emit();
                }
                Ok(_) => self.feed_line(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Split an in-memory SQL script into statements.
pub fn split_statements(sql: &str) -> DumpResult<Vec<String>> {
    StatementSplitter::new(sql.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_insert() {
        let sql = "INSERT INTO `test` VALUES (1, 'a');";
        let shape = parse_insert(sql).unwrap();
        assert_eq!(shape.table, "test");
        assert_eq!(shape.columns, None);
        assert!(!shape.ignore);
        assert_eq!(&sql[..shape.header_end], "INSERT INTO `test` VALUES");
        assert_eq!(&sql[shape.rows.clone()], "(1, 'a')");
        assert_eq!(shape.row_count, 1);
    }

    #[test]
    fn test_insert_with_columns_and_schema() {
        let sql = "insert ignore into `shop`.`orders`(`id`,`note`) values (1,'x'),(2,'y')";
        let shape = parse_insert(sql).unwrap();
        assert!(shape.ignore);
        assert_eq!(shape.schema.as_deref(), Some("shop"));
        assert_eq!(shape.table, "orders");
        assert_eq!(
            shape.columns,
            Some(vec!["id".to_string(), "note".to_string()])
        );
        assert_eq!(&sql[shape.rows.clone()], "(1,'x'),(2,'y')");
        assert_eq!(shape.row_count, 2);
    }

    #[test]
    fn test_quoted_parens_and_semicolons() {
        let sql = "INSERT INTO t VALUES (1,'a) b; c','it''s',\"q\\\"x\");";
        let shape = parse_insert(sql).unwrap();
        assert_eq!(shape.table, "t");
        assert_eq!(shape.row_count, 1);
    }

    #[test]
    fn test_doubled_backtick_identifier() {
        let shape = parse_insert("INSERT INTO `we``ird` VALUES (1);").unwrap();
        assert_eq!(shape.table, "we`ird");

        let shape = parse_insert("INSERT INTO `a.b` VALUES (1);").unwrap();
        assert_eq!(shape.schema, None);
        assert_eq!(shape.table, "a.b");
    }

    #[test]
    fn test_malformed_inserts() {
        for sql in [
            "INSERT INTO t SELECT * FROM u;",
            "INSERT INTO t VALUES (1) ON DUPLICATE KEY UPDATE a = 1;",
            "INSERT INTO t VALUES (1, 'unterminated);",
            "INSERT INTO t SET a = 1;",
            "CREATE TABLE t (a INT);",
        ] {
            assert!(
                matches!(parse_insert(sql), Err(DumpError::MalformedStatement(_))),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("  insert into t values (1);"));
        assert!(is_insert("INSERT\nINTO t VALUES (1);"));
        assert!(!is_insert("INSERTED_ROWS"));
        assert!(!is_insert("CREATE TABLE t (a INT);"));
    }

    #[test]
    fn test_split_statements() {
        let script = "\
-- ----------------------------
-- Table structure for t
-- ----------------------------
CREATE TABLE IF NOT EXISTS `t` (
  `a` int
);

/* block
   comment */
INSERT INTO `t` VALUES (1,'x; -- not a comment');
INSERT INTO `t` VALUES (2,'multi
line');
# hash comment
INSERT INTO `t` VALUES (3,NULL)";

        let statements = split_statements(script).unwrap();
        assert_eq!(
            statements,
            vec![
                "CREATE TABLE IF NOT EXISTS `t` (\n  `a` int\n);".to_string(),
                "INSERT INTO `t` VALUES (1,'x; -- not a comment');".to_string(),
                "INSERT INTO `t` VALUES (2,'multi\nline');".to_string(),
                "INSERT INTO `t` VALUES (3,NULL)".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_skips_empty_statements() {
        assert_eq!(split_statements(";;\n  ;").unwrap(), Vec::<String>::new());
        assert_eq!(split_statements("").unwrap(), Vec::<String>::new());
    }
}
