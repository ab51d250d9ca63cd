//! MySQL DDL helpers for backup-sync.
//!
//! This crate works on the text returned by `SHOW CREATE TABLE`.
//!
//! # Structure
//!
//! - `normalize`: reduce a creation statement to the part that matters for
//!   drift detection
//! - `parse`: recover a structured table definition from a creation statement
//! - `structure`: the types `parse` produces
//!
//! # Example
//!
//! ```
//! use mysql_ddl::{normalize_create_statement, parse_create_table, IndexKind};
//!
//! let ddl = "CREATE TABLE `users` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";
//!
//! let table = parse_create_table(ddl).unwrap();
//! assert_eq!(table.name, "users");
//! assert_eq!(table.indexes[0].kind, IndexKind::Primary);
//!
//! assert!(normalize_create_statement(ddl).ends_with(')'));
//! ```

pub mod normalize;
pub mod parse;
pub mod structure;

pub use normalize::normalize_create_statement;
pub use parse::parse_create_table;
pub use structure::{
    ColumnDefinition, ForeignKey, IndexDefinition, IndexKind, ReferentialAction, TableStructure,
};
