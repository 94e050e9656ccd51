//! Conversion of raw result payloads into typed rows
//!
//! A results page carries one item per changelog event:
//!
//! ```text
//! {"op": 0, "row": ["42", ["a", "b"], [["k", "1"]], ["x", null]]}
//!   │          │         │             │              └─ ROW<VARCHAR, INT>
//!   │          │         │             └─ MAP<VARCHAR, INT> as [key, value] pairs
//!   │          │         └─ ARRAY<VARCHAR>
//!   │          └─ every atomic value is a string
//!   └─ 0 = +I, 1 = -U, 2 = +U, 3 = -D (absent means +I)
//! ```
//!
//! Conversion is lenient per field: a value whose shape does not match its
//! declared type becomes [`Field::Null`] instead of failing the page.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ResultsError;
use crate::types::{
    ColumnDetails, DataType, Field, FieldType, MapEntry, Operation, Row, RowFieldType,
};
use crate::Result;

/// Converts one raw JSON value into a typed field.
pub type FieldConverter = Box<dyn Fn(&Value) -> Field + Send + Sync>;

/// Build the converter for a declared column or element type.
pub fn field_converter(data_type: &DataType) -> FieldConverter {
    match data_type.field_type() {
        FieldType::Array => array_converter(nested(&data_type.element_type)),
        FieldType::Multiset => map_converter(
            FieldType::Multiset,
            nested(&data_type.element_type),
            // Multiset values are occurrence counts
            DataType::new("INTEGER").not_null(),
        ),
        FieldType::Map => map_converter(
            FieldType::Map,
            nested(&data_type.key_type),
            nested(&data_type.value_type),
        ),
        FieldType::Row => row_converter(&data_type.fields),
        field_type => atomic_converter(field_type),
    }
}

fn nested(data_type: &Option<Box<DataType>>) -> DataType {
    data_type
        .as_deref()
        .cloned()
        .unwrap_or_else(|| DataType::new("NULL"))
}

fn atomic_converter(field_type: FieldType) -> FieldConverter {
    Box::new(move |value| match value {
        Value::String(text) => Field::atomic(field_type.clone(), text.clone()),
        _ => Field::Null,
    })
}

fn array_converter(element_type: DataType) -> FieldConverter {
    let element_field_type = element_type.field_type();
    let convert_element = field_converter(&element_type);
    Box::new(move |value| match value {
        Value::Array(items) => Field::Array {
            element_type: element_field_type.clone(),
            values: items.iter().map(|item| convert_element(item)).collect(),
        },
        _ => Field::Null,
    })
}

fn map_converter(
    field_type: FieldType,
    key_type: DataType,
    value_type: DataType,
) -> FieldConverter {
    let key_field_type = key_type.field_type();
    let value_field_type = value_type.field_type();
    let convert_key = field_converter(&key_type);
    let convert_value = field_converter(&value_type);

    Box::new(move |value| {
        let Value::Array(raw_entries) = value else {
            return Field::Null;
        };

        let mut entries = Vec::with_capacity(raw_entries.len());
        for raw_entry in raw_entries {
            match raw_entry {
                Value::Array(pair) if pair.len() == 2 => entries.push(MapEntry {
                    key: convert_key(&pair[0]),
                    value: convert_value(&pair[1]),
                }),
                _ => return Field::Null,
            }
        }

        Field::Map {
            field_type: field_type.clone(),
            key_type: key_field_type.clone(),
            value_type: value_field_type.clone(),
            entries,
        }
    })
}

fn row_converter(fields: &[RowFieldType]) -> FieldConverter {
    let converters: Vec<FieldConverter> = fields
        .iter()
        .map(|field| field_converter(&field.field_type))
        .collect();

    Box::new(move |value| match value {
        Value::Array(items) if items.len() == converters.len() => {
            let values: Vec<Field> = items
                .iter()
                .zip(&converters)
                .map(|(item, convert)| convert(item))
                .collect();
            Field::Row {
                element_types: values.iter().map(Field::field_type).collect(),
                values,
            }
        }
        _ => Field::Null,
    })
}

/// Values beyond the declared schema keep their text so the row still
/// reaches the store, which rejects it on arity.
fn convert_undeclared(value: &Value) -> Field {
    match value {
        Value::String(text) => Field::varchar(text.clone()),
        _ => Field::Null,
    }
}

/// Converts result items of one statement into [`Row`]s.
pub struct RowConverter {
    converters: Vec<FieldConverter>,
}

impl RowConverter {
    pub fn new(columns: &[ColumnDetails]) -> Self {
        Self {
            converters: columns
                .iter()
                .map(|column| field_converter(&column.data_type))
                .collect(),
        }
    }

    /// Convert a single `{"op": .., "row": [..]}` item. Items that are not
    /// objects, carry an unknown `op`, or have no `row` array yield `None`.
    pub fn convert_item(&self, item: &Value) -> Option<Row> {
        let operation = match item.get("op") {
            None | Some(Value::Null) => Operation::Insert,
            Some(op) => match op.as_i64().and_then(Operation::from_code) {
                Some(operation) => operation,
                None => {
                    debug!(op = %op, "Skipping result item with unknown operation");
                    return None;
                }
            },
        };

        let Some(Value::Array(raw_fields)) = item.get("row") else {
            debug!("Skipping result item without a row array");
            return None;
        };

        let fields = raw_fields
            .iter()
            .enumerate()
            .map(|(idx, raw)| match self.converters.get(idx) {
                Some(convert) => convert(raw),
                None => convert_undeclared(raw),
            })
            .collect();

        Some(Row::new(operation, fields))
    }

    /// Convert every decodable item, preserving order.
    pub fn convert_items(&self, items: &[Value]) -> Vec<Row> {
        items
            .iter()
            .filter_map(|item| self.convert_item(item))
            .collect()
    }
}

/// One page of a statement's results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsPage {
    #[serde(default)]
    pub data: Vec<Value>,
    /// Token for the next page; `None` once the results are exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Decode a results page body: either `{"data": [...], "next_page_token": ..}`
/// or a bare array of items (a final page).
pub fn decode_results_page(body: &[u8]) -> Result<ResultsPage> {
    let value: Value = serde_json::from_slice(body)?;
    match value {
        Value::Array(data) => Ok(ResultsPage {
            data,
            next_page_token: None,
        }),
        Value::Object(_) => Ok(serde_json::from_value(value)?),
        other => Err(ResultsError::InvalidPayload(format!(
            "expected an object or array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
