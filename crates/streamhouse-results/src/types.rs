//! Row model for streaming statement results
//!
//! A result row is one changelog event: an [`Operation`] plus an ordered list of
//! typed [`Field`]s. Column descriptors ([`DataType`], [`ColumnDetails`]) come
//! from the statement's result schema and drive conversion of raw values.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Changelog operation attached to every result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Insert,
    UpdateBefore,
    UpdateAfter,
    Delete,
}

impl Operation {
    /// Convert from the numeric `op` code of a result item.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Insert),
            1 => Some(Self::UpdateBefore),
            2 => Some(Self::UpdateAfter),
            3 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Numeric `op` code of this operation.
    pub fn code(&self) -> i64 {
        match self {
            Self::Insert => 0,
            Self::UpdateBefore => 1,
            Self::UpdateAfter => 2,
            Self::Delete => 3,
        }
    }

    /// Short changelog notation shown in the `Operation` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "+I",
            Self::UpdateBefore => "-U",
            Self::UpdateAfter => "+U",
            Self::Delete => "-D",
        }
    }

    /// Only plain inserts add a row to the materialized table. Every other
    /// operation retracts the current entry for the row's key.
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Insert)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

/// SQL type tag carried by every field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Char,
    Varchar,
    Boolean,
    Binary,
    Varbinary,
    Decimal,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Date,
    TimeWithoutTimeZone,
    TimestampWithoutTimeZone,
    TimestampWithTimeZone,
    TimestampWithLocalTimeZone,
    IntervalYearMonth,
    IntervalDayTime,
    Array,
    Multiset,
    Map,
    Row,
    Null,
    /// A type name the shell has no special handling for
    Other(String),
}

impl FieldType {
    /// Parse a descriptor type name (case-insensitive).
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "CHAR" => Self::Char,
            "VARCHAR" => Self::Varchar,
            "BOOLEAN" => Self::Boolean,
            "BINARY" => Self::Binary,
            "VARBINARY" => Self::Varbinary,
            "DECIMAL" => Self::Decimal,
            "TINYINT" => Self::TinyInt,
            "SMALLINT" => Self::SmallInt,
            "INTEGER" => Self::Integer,
            "BIGINT" => Self::BigInt,
            "FLOAT" => Self::Float,
            "DOUBLE" => Self::Double,
            "DATE" => Self::Date,
            "TIME_WITHOUT_TIME_ZONE" => Self::TimeWithoutTimeZone,
            "TIMESTAMP_WITHOUT_TIME_ZONE" => Self::TimestampWithoutTimeZone,
            "TIMESTAMP_WITH_TIME_ZONE" => Self::TimestampWithTimeZone,
            "TIMESTAMP_WITH_LOCAL_TIME_ZONE" => Self::TimestampWithLocalTimeZone,
            "INTERVAL_YEAR_MONTH" => Self::IntervalYearMonth,
            "INTERVAL_DAY_TIME" => Self::IntervalDayTime,
            "ARRAY" => Self::Array,
            "MULTISET" => Self::Multiset,
            "MAP" => Self::Map,
            "ROW" => Self::Row,
            "NULL" => Self::Null,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Char => "CHAR",
            Self::Varchar => "VARCHAR",
            Self::Boolean => "BOOLEAN",
            Self::Binary => "BINARY",
            Self::Varbinary => "VARBINARY",
            Self::Decimal => "DECIMAL",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
            Self::TimeWithoutTimeZone => "TIME_WITHOUT_TIME_ZONE",
            Self::TimestampWithoutTimeZone => "TIMESTAMP_WITHOUT_TIME_ZONE",
            Self::TimestampWithTimeZone => "TIMESTAMP_WITH_TIME_ZONE",
            Self::TimestampWithLocalTimeZone => "TIMESTAMP_WITH_LOCAL_TIME_ZONE",
            Self::IntervalYearMonth => "INTERVAL_YEAR_MONTH",
            Self::IntervalDayTime => "INTERVAL_DAY_TIME",
            Self::Array => "ARRAY",
            Self::Multiset => "MULTISET",
            Self::Map => "MAP",
            Self::Row => "ROW",
            Self::Null => "NULL",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// One key/value pair of a MAP or MULTISET field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MapEntry {
    pub key: Field,
    pub value: Field,
}

/// A single typed value in a result row. Nested variants recurse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Atomic {
        field_type: FieldType,
        value: String,
    },
    Array {
        element_type: FieldType,
        values: Vec<Field>,
    },
    /// MAP or MULTISET. Entries keep arrival order and are not deduplicated.
    Map {
        field_type: FieldType,
        key_type: FieldType,
        value_type: FieldType,
        entries: Vec<MapEntry>,
    },
    Row {
        element_types: Vec<FieldType>,
        values: Vec<Field>,
    },
    Null,
}

impl Field {
    pub fn atomic(field_type: FieldType, value: impl Into<String>) -> Self {
        Self::Atomic {
            field_type,
            value: value.into(),
        }
    }

    pub fn varchar(value: impl Into<String>) -> Self {
        Self::atomic(FieldType::Varchar, value)
    }

    /// Type tag of this field.
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Atomic { field_type, .. } => field_type.clone(),
            Self::Array { .. } => FieldType::Array,
            Self::Map { field_type, .. } => field_type.clone(),
            Self::Row { .. } => FieldType::Row,
            Self::Null => FieldType::Null,
        }
    }

    fn encode_key(&self, out: &mut String) {
        // Length-prefixed so that adjacent values can never run together.
        match self {
            Self::Atomic { field_type, value } => {
                let _ = write!(out, "a{}:{}:{}", field_type, value.len(), value);
            }
            Self::Array {
                element_type,
                values,
            } => {
                let _ = write!(out, "A{}:{}[", element_type, values.len());
                for value in values {
                    value.encode_key(out);
                }
                out.push(']');
            }
            Self::Map {
                field_type,
                entries,
                ..
            } => {
                let _ = write!(out, "M{}:{}{{", field_type, entries.len());
                for entry in entries {
                    entry.key.encode_key(out);
                    entry.value.encode_key(out);
                }
                out.push('}');
            }
            Self::Row { values, .. } => {
                let _ = write!(out, "R{}(", values.len());
                for value in values {
                    value.encode_key(out);
                }
                out.push(')');
            }
            Self::Null => out.push('n'),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atomic { value, .. } => f.write_str(value),
            Self::Null => f.write_str("NULL"),
            Self::Array { values, .. } => {
                f.write_char('[')?;
                write_joined(f, values)?;
                f.write_char(']')
            }
            Self::Map { entries, .. } => {
                f.write_char('{')?;
                for (idx, entry) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", entry.key, entry.value)?;
                }
                f.write_char('}')
            }
            Self::Row { values, .. } => {
                f.write_char('(')?;
                write_joined(f, values)?;
                f.write_char(')')
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, values: &[Field]) -> fmt::Result {
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", value)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Upsert identity of a row: an order-sensitive encoding of its field values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey(String);

/// One changelog event of a statement's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub operation: Operation,
    pub fields: Vec<Field>,
}

impl Row {
    pub fn new(operation: Operation, fields: Vec<Field>) -> Self {
        Self { operation, fields }
    }

    /// Identity used by the table view. The operation is not part of it, so an
    /// insert and its later retraction share a key.
    pub fn row_key(&self) -> RowKey {
        let mut key = String::new();
        for field in &self.fields {
            field.encode_key(&mut key);
        }
        RowKey(key)
    }

    /// Copy of this row with a leading VARCHAR field naming its operation.
    pub fn with_operation_column(&self) -> Row {
        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        fields.push(Field::varchar(self.operation.as_str()));
        fields.extend(self.fields.iter().cloned());
        Row {
            operation: self.operation,
            fields,
        }
    }
}

// ---------------------------------------------------------------------------
// Column descriptors
// ---------------------------------------------------------------------------

/// Declared SQL type of a column or nested element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Element type of ARRAY and MULTISET
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<Box<DataType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<Box<DataType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<Box<DataType>>,
    /// Nested fields of ROW
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<RowFieldType>,
}

fn default_nullable() -> bool {
    true
}

impl DataType {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            nullable: true,
            element_type: None,
            key_type: None,
            value_type: None,
            fields: Vec::new(),
        }
    }

    pub fn array(element_type: DataType) -> Self {
        Self {
            element_type: Some(Box::new(element_type)),
            ..Self::new("ARRAY")
        }
    }

    pub fn multiset(element_type: DataType) -> Self {
        Self {
            element_type: Some(Box::new(element_type)),
            ..Self::new("MULTISET")
        }
    }

    pub fn map(key_type: DataType, value_type: DataType) -> Self {
        Self {
            key_type: Some(Box::new(key_type)),
            value_type: Some(Box::new(value_type)),
            ..Self::new("MAP")
        }
    }

    pub fn row(fields: Vec<RowFieldType>) -> Self {
        Self {
            fields,
            ..Self::new("ROW")
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn field_type(&self) -> FieldType {
        FieldType::from_type_name(&self.type_name)
    }
}

/// Named field of a ROW descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFieldType {
    pub name: String,
    pub field_type: DataType,
}

impl RowFieldType {
    pub fn new(name: impl Into<String>, field_type: DataType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Column of a statement's result schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDetails {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl ColumnDetails {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}
