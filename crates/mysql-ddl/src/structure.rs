//! Structured form of a MySQL table definition.

use serde::Serialize;
use std::collections::BTreeMap;

/// A table definition recovered from `SHOW CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TableStructure {
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnDefinition>,
    /// Indexes in declaration order
    pub indexes: Vec<IndexDefinition>,
    pub foreign_keys: Vec<ForeignKey>,
    /// Table options keyed by upper-case option name (`ENGINE`, `DEFAULT CHARSET`, ...)
    pub options: BTreeMap<String, String>,
}

impl TableStructure {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.kind == IndexKind::Primary)
    }

    /// Names of columns whose definition differs between `self` and `other`,
    /// including columns present on only one side.
    pub fn changed_columns(&self, other: &TableStructure) -> Vec<String> {
        let mut changed: Vec<String> = self
            .columns
            .iter()
            .filter(|c| other.column(&c.name) != Some(*c))
            .map(|c| c.name.clone())
            .collect();

        changed.extend(
            other
                .columns
                .iter()
                .filter(|c| self.column(&c.name).is_none())
                .map(|c| c.name.clone()),
        );
        changed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Type as written, e.g. `varchar(255)` or `int unsigned`
    pub column_type: String,
    pub nullable: bool,
    /// Default expression as written, quotes included
    pub default: Option<String>,
    /// `AUTO_INCREMENT`, `ON UPDATE ...`, generated-column clauses
    pub extra: Option<String>,
    /// Comment text without surrounding quotes
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Primary,
    Unique,
    Index,
    Fulltext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    /// `PRIMARY` for the primary key
    pub name: String,
    pub kind: IndexKind,
    /// Indexed columns in key order, prefix lengths removed
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    NoAction,
    Restrict,
    SetDefault,
}

impl ReferentialAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CASCADE" => Some(Self::Cascade),
            "SET NULL" => Some(Self::SetNull),
            "NO ACTION" => Some(Self::NoAction),
            "RESTRICT" => Some(Self::Restrict),
            "SET DEFAULT" => Some(Self::SetDefault),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}
