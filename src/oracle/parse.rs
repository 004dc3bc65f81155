//! oracle 回复解析：容忍 Markdown 代码块、前后多余文字、逗号分隔的 id 列表

use serde_json::Value;

use crate::oracle::{Category, CategoryAssignment, OracleError};
use crate::reorder::TrackId;

/// 去掉 ```json ... ``` 围栏与首尾空白
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // 围栏后的语言标记（json / JSON / 空）
        s = rest
            .split_once('\n')
            .map(|(_, body)| body)
            .unwrap_or_else(|| rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()));
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// 截取第一个 open..close 配对片段（回复前后夹带说明文字时）
fn extract_span(s: &str, open: char, close: char) -> Option<&str> {
    let start = s.find(open)?;
    let end = s.rfind(close)?;
    (end > start).then(|| &s[start..=end])
}

fn id_from_value(v: &Value) -> Option<TrackId> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => obj
            .get("track_id")
            .or_else(|| obj.get("id"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}

fn clean_id(id: &str) -> Option<TrackId> {
    let cleaned = id.trim().trim_matches(|c| c == '"' || c == '\'' || c == '[' || c == ']').trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// 解析排序回复：JSON 数组（字符串或带 track_id 的对象），或对象中的 order 数组，退化为逗号/换行分隔
pub fn parse_id_list(raw: &str) -> Result<Vec<TrackId>, OracleError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(OracleError::Malformed("empty response".to_string()));
    }

    let json = serde_json::from_str::<Value>(body).ok().or_else(|| {
        extract_span(body, '[', ']').and_then(|span| serde_json::from_str::<Value>(span).ok())
    });

    let array = match json {
        Some(Value::Array(items)) => Some(items),
        Some(Value::Object(mut obj)) => ["order", "track_ids", "tracks"]
            .iter()
            .find_map(|k| match obj.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    };

    let ids: Vec<TrackId> = match array {
        Some(items) => items
            .iter()
            .filter_map(id_from_value)
            .filter_map(|id| clean_id(&id))
            .collect(),
        None if body.contains(',') || body.contains('\n') => body
            .split(|c| c == ',' || c == '\n')
            .filter_map(clean_id)
            .collect(),
        None => {
            return Err(OracleError::Malformed(format!(
                "no id list found in: {}",
                body.chars().take(80).collect::<String>()
            )))
        }
    };

    if ids.is_empty() {
        return Err(OracleError::Malformed("id list is empty".to_string()));
    }
    Ok(ids)
}

/// 解析分类回复：`{"Opening": ["id1", ...], ...}`；非数组的值跳过
pub fn parse_categories(raw: &str) -> Result<CategoryAssignment, OracleError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(OracleError::Malformed("empty response".to_string()));
    }

    let value = serde_json::from_str::<Value>(body)
        .ok()
        .or_else(|| extract_span(body, '{', '}').and_then(|s| serde_json::from_str(s).ok()))
        .ok_or_else(|| OracleError::Malformed("categorization is not valid JSON".to_string()))?;

    let Value::Object(obj) = value else {
        return Err(OracleError::Malformed("expected a JSON object".to_string()));
    };

    let mut categories = Vec::with_capacity(obj.len());
    for (label, ids) in obj {
        let Value::Array(items) = ids else {
            tracing::warn!(category = %label, "category value is not a list, skipped");
            continue;
        };
        let track_ids = items
            .iter()
            .filter_map(id_from_value)
            .filter_map(|id| clean_id(&id))
            .collect();
        categories.push(Category::new(label.trim(), track_ids));
    }

    if categories.is_empty() {
        return Err(OracleError::Malformed("no categories".to_string()));
    }
    Ok(CategoryAssignment::new(categories))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[\"a\"]\n```"), "[\"a\"]");
        assert_eq!(strip_code_fences("```[\"a\"]```"), "[\"a\"]");
        assert_eq!(strip_code_fences("  [\"a\"] "), "[\"a\"]");
    }

    #[test]
    fn test_parse_json_array() {
        assert_eq!(parse_id_list(r#"["a", " b ", "c"]"#).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_array_with_chatter() {
        let raw = "Here is the order:\n[\"x\", \"y\"]\nEnjoy!";
        assert_eq!(parse_id_list(raw).unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_parse_objects_and_wrapped_order() {
        assert_eq!(
            parse_id_list(r#"[{"track_id": "a"}, {"id": "b"}]"#).unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(parse_id_list(r#"{"order": ["b", "a"]}"#).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_parse_comma_separated() {
        assert_eq!(parse_id_list("'a', 'b',c").unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_id_list(""), Err(OracleError::Malformed(_))));
        assert!(matches!(parse_id_list("no idea"), Err(OracleError::Malformed(_))));
        assert!(matches!(parse_id_list("[]"), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn test_parse_categories_keeps_response_order() {
        let raw = "```json\n{\"Peak\": [\"c\"], \"Opening\": [\"a\", \"b\"], \"Bad\": 3}\n```";
        let parsed = parse_categories(raw).unwrap();
        let labels: Vec<&str> = parsed.categories.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Peak", "Opening"]);
        assert_eq!(parsed.categories[1].track_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_categories_rejects_array() {
        assert!(parse_categories("[\"a\"]").is_err());
    }
}
