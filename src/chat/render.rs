use serde_json::Value;

use crate::domain::chat::Rendered;

/// Render an agent answer: a JSON list becomes a table, anything else stays text
pub fn format_response(response: &str) -> Rendered {
    match serde_json::from_str::<Value>(response) {
        Ok(Value::Array(items)) => table(&items),
        _ => Rendered::Text {
            text: response.to_string(),
        },
    }
}

fn table(items: &[Value]) -> Rendered {
    let mut columns: Vec<String> = Vec::new();
    for item in items {
        match item {
            Value::Object(record) => {
                for key in record.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if !columns.iter().any(|c| c == "value") {
                    columns.push("value".to_string());
                }
            }
        }
    }

    let rows = items
        .iter()
        .map(|item| {
            columns
                .iter()
                .map(|column| match item {
                    Value::Object(record) => record.get(column).map(cell).unwrap_or_default(),
                    other if column == "value" => cell(other),
                    _ => String::new(),
                })
                .collect()
        })
        .collect();

    Rendered::Table { columns, rows }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_stays_text() {
        assert_eq!(
            format_response("Your password has been reset."),
            Rendered::Text {
                text: "Your password has been reset.".to_string()
            }
        );
    }

    #[test]
    fn test_json_object_stays_text() {
        let body = r#"{"status":"ok"}"#;
        assert_eq!(format_response(body), Rendered::Text { text: body.to_string() });
    }

    #[test]
    fn test_json_list_becomes_table() {
        let rendered = format_response(r#"[{"course":"Math","grade":"A"},{"course":"Art","grade":null,"credits":3}]"#);
        match rendered {
            Rendered::Table { columns, rows } => {
                assert_eq!(columns.len(), 3);
                assert!(columns.contains(&"course".to_string()));
                assert!(columns.contains(&"credits".to_string()));
                assert_eq!(rows.len(), 2);
                let course = columns.iter().position(|c| c == "course").unwrap();
                let credits = columns.iter().position(|c| c == "credits").unwrap();
                assert_eq!(rows[0][course], "Math");
                assert_eq!(rows[0][credits], "");
                assert_eq!(rows[1][credits], "3");
            }
            other => panic!("expected a table, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_list_uses_value_column() {
        let rendered = format_response(r#"["a", 2]"#);
        assert_eq!(
            rendered,
            Rendered::Table {
                columns: vec!["value".to_string()],
                rows: vec![vec!["a".to_string()], vec!["2".to_string()]],
            }
        );
    }
}
