//! # rsdump
//!
//! Dump MySQL tables to a replayable SQL script or a stream of framed binary
//! packages, and restore them with consecutive inserts merged.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use rsdump::prelude::*;
//!
//! let mut db = MysqlDatabase::connect("mysql://root@localhost/shop").await?;
//! let file = std::fs::File::create("shop.sql")?;
//! let report = dump(&mut db, &DumpOptions::default(), file).await?;
//!
//! let target = MysqlDatabase::connect("mysql://root@localhost/shop_copy").await?;
//! let input = std::io::BufReader::new(std::fs::File::open("shop.sql")?);
//! restore(target.executor().await?, input, &RestoreOptions::default()).await?;
//! ```
//!
//! ## Binary format
//!
//! | Bytes | Field   | Encoding                          |
//! |-------|---------|-----------------------------------|
//! | 4     | kind    | i32 little-endian, 0 = schema, 1 = rows |
//! | 4     | length  | u32 little-endian                 |
//! | n     | payload | UTF-8 SQL statement               |

pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod merge;
pub mod package;
pub mod parser;
pub mod restore;
pub mod statement;
pub mod value;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::dump::{DumpOptions, DumpReport, DumpWriter, OutputMode, RowSet, TableSource, dump};
    pub use crate::engine::{MysqlDatabase, MysqlExecutor};
    pub use crate::error::*;
    pub use crate::merge::{InsertMerger, merge_insert, merge_statements};
    pub use crate::package::{Package, PackageKind, decode_stream, encode_frame};
    pub use crate::restore::{
        RestoreOptions, RestoreReport, Restorer, StatementExecutor, WriterExecutor, restore,
    };
    pub use crate::statement::{Statement, StatementKind};
    pub use crate::value::{SqlValue, TypeCategory, encode_value};
}

pub use merge::merge_insert;
