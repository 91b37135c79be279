/// Transform Module
///
/// Turns retailer JSON into row sets: nested objects are flattened into
/// dotted column names, values are narrowed to scalars and column names can
/// be shortened to fit database identifier limits.
use crate::error::{IngestError, Result};
use crate::models::{Row, RowSet, ScalarValue};
use serde_json::{Map, Value};

/// Ordered substitutions applied to Woolworths column names after `.` and `_`
/// are stripped. Order matters: longer words go before their prefixes.
const COLUMN_ABBREVIATIONS: &[(&str, &str)] = &[
    ("Attributes", "Attr"),
    ("Maximum", "Max"),
    ("Minimum", "Min"),
    ("ThirdPartyProductInfoThirdParty", "ThirdPartyProduct"),
    ("Additional", "Add"),
    ("Value", "Val"),
    ("Position", "Pos"),
    ("Option", "Opt"),
    ("Childrens", "Child"),
    ("Size", "Sz"),
    ("Clothing", "Cloth"),
    ("Display", "Disp"),
    ("Colour", "Col"),
];

/// Category name from a URL slug: `fruit-veg` becomes `FruitVeg`
pub fn category_name(slug: &str) -> String {
    let mut name = String::with_capacity(slug.len());
    let mut previous_is_letter = false;

    for c in slug.replace('-', " ").chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                name.extend(c.to_lowercase());
            } else {
                name.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            if c != ' ' {
                name.push(c);
            }
            previous_is_letter = false;
        }
    }

    name
}

/// Shorten a flattened Woolworths column name
pub fn abbreviate_column(column: &str) -> String {
    let mut name = column.replace(['.', '_'], "");
    for (long, short) in COLUMN_ABBREVIATIONS {
        name = name.replace(long, short);
    }
    name
}

/// Narrow a JSON leaf to a scalar. Arrays and objects are kept as JSON text.
pub fn scalar_from_json(value: &Value) -> ScalarValue {
    match value {
        Value::Null => ScalarValue::Null,
        Value::Bool(b) => ScalarValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ScalarValue::Integer(i)
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                        ScalarValue::Integer(f as i64)
                    }
                    Some(f) => ScalarValue::Float(f),
                    // u64 beyond i64 without a float form
                    None => ScalarValue::Text(n.to_string()),
                }
            }
        }
        Value::String(s) => ScalarValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => ScalarValue::Text(value.to_string()),
    }
}

/// Flatten one JSON object into a row with dotted column names
pub fn flatten_record(record: &Value) -> Result<Row> {
    let object = record
        .as_object()
        .ok_or_else(|| IngestError::Parse(format!("expected a JSON object, found {}", json_kind(record))))?;

    let mut row = Row::new();
    flatten_into(&mut row, None, object);
    Ok(row)
}

fn flatten_into(row: &mut Row, prefix: Option<&str>, object: &Map<String, Value>) {
    for (key, value) in object {
        let column = match prefix {
            Some(prefix) => format!("{}.{}", prefix, key),
            None => key.clone(),
        };

        match value {
            Value::Object(nested) if !nested.is_empty() => flatten_into(row, Some(&column), nested),
            Value::Object(_) => {
                row.insert(column, ScalarValue::Null);
            }
            leaf => {
                row.insert(column, scalar_from_json(leaf));
            }
        }
    }
}

/// Rename every column of a row. When two names collapse into one, the first value is kept.
pub fn rename_columns(row: Row, rename: impl Fn(&str) -> String) -> Row {
    let mut renamed = Row::with_capacity(row.len());
    for (column, value) in row {
        let name = rename(&column);
        if renamed.contains_key(&name) {
            tracing::warn!("Column {} renames to {}, which is already taken; dropping its value", column, name);
            continue;
        }
        renamed.insert(name, value);
    }
    renamed
}

/// Build a named row set from product records
pub fn build_row_set(name: &str, records: &[Value], abbreviate: bool) -> Result<RowSet> {
    let rows = records
        .iter()
        .map(|record| {
            let row = flatten_record(record)?;
            Ok(if abbreviate { rename_columns(row, abbreviate_column) } else { row })
        })
        .collect::<Result<Vec<Row>>>()?;

    Ok(RowSet::new(name, rows))
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
