//! Column model shared by every adapter.
//!
//! Adapters map their native catalogs onto the closed [`LogicalType`] set on
//! describe, and back to native DDL on create. `ordinal` is 1-based, dense,
//! and fixes the projection order of every generated SELECT and CREATE TABLE.

use serde::{Deserialize, Serialize};

/// Dialect-neutral column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Integer,
    Float,
    Decimal,
    String,
    Bytes,
    Datetime,
    Date,
    Time,
    Bool,
    Uuid,
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogicalType::Integer => "integer",
            LogicalType::Float => "float",
            LogicalType::Decimal => "decimal",
            LogicalType::String => "string",
            LogicalType::Bytes => "bytes",
            LogicalType::Datetime => "datetime",
            LogicalType::Date => "date",
            LogicalType::Time => "time",
            LogicalType::Bool => "bool",
            LogicalType::Uuid => "uuid",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for LogicalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "integer" | "int" => Ok(LogicalType::Integer),
            "float" => Ok(LogicalType::Float),
            "decimal" | "numeric" => Ok(LogicalType::Decimal),
            "string" | "varchar" | "text" => Ok(LogicalType::String),
            "bytes" | "binary" => Ok(LogicalType::Bytes),
            "datetime" | "timestamp" => Ok(LogicalType::Datetime),
            "date" => Ok(LogicalType::Date),
            "time" => Ok(LogicalType::Time),
            "bool" | "boolean" => Ok(LogicalType::Bool),
            "uuid" => Ok(LogicalType::Uuid),
            other => Err(format!("unknown column type: {}", other)),
        }
    }
}

/// One column of a table or query projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// 1-based position in the projection.
    pub ordinal: u32,
    pub name: String,
    pub ty: LogicalType,
    /// For strings: declared maximum length, -1 or None for unbounded.
    pub char_max_len: Option<i64>,
    pub num_precision: Option<i64>,
    pub num_scale: Option<i64>,
}

impl Column {
    pub fn new(ordinal: u32, name: impl Into<String>, ty: LogicalType) -> Self {
        Self {
            ordinal,
            name: name.into(),
            ty,
            char_max_len: None,
            num_precision: None,
            num_scale: None,
        }
    }

    pub fn with_char_max_len(mut self, len: i64) -> Self {
        self.char_max_len = Some(len);
        self
    }

    pub fn with_numeric(mut self, precision: i64, scale: i64) -> Self {
        self.num_precision = Some(precision);
        self.num_scale = Some(scale);
        self
    }
}

/// `schema.table`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

/// Case-insensitive membership test, used to validate replication and
/// primary keys against the resolved projection.
pub fn contains_column(columns: &[Column], name: &str) -> bool {
    columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
}
