//! Evaluation of wire-encoded filters against stored documents.

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// Attributes visible to a filter: the document id plus its attribute map.
pub struct DocView<'a> {
    pub id: &'a str,
    pub attributes: &'a Map<String, Value>,
}

impl DocView<'_> {
    fn get(&self, attribute: &str) -> Value {
        if attribute == "id" {
            return Value::String(self.id.to_string());
        }
        self.attributes.get(attribute).cloned().unwrap_or(Value::Null)
    }
}

/// Evaluate `filter` (`[attr, op, value]` or `["And"|"Or", [...]]`).
/// `null` matches everything.
pub fn matches(filter: &Value, doc: &DocView<'_>) -> Result<bool, String> {
    let items = match filter {
        Value::Null => return Ok(true),
        Value::Array(items) => items,
        other => return Err(format!("filter must be an array, got {other}")),
    };

    match items.as_slice() {
        [Value::String(tag), Value::Array(children)] if tag == "And" => {
            for child in children {
                if !matches(child, doc)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        [Value::String(tag), Value::Array(children)] if tag == "Or" => {
            for child in children {
                if matches(child, doc)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        [Value::String(attribute), Value::String(op), expected] => {
            compare(op, &doc.get(attribute), expected)
        }
        _ => Err(format!("malformed filter: {filter}")),
    }
}

fn compare(op: &str, actual: &Value, expected: &Value) -> Result<bool, String> {
    let result = match op {
        "Eq" => values_equal(actual, expected),
        "NotEq" => !values_equal(actual, expected),
        "In" => contains(expected, actual)?,
        "NotIn" => !contains(expected, actual)?,
        "Lt" => ordering(actual, expected) == Some(Ordering::Less),
        "Lte" => matches!(ordering(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        "Gt" => ordering(actual, expected) == Some(Ordering::Greater),
        "Gte" => matches!(ordering(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        "Glob" => glob_value(actual, expected, false)?,
        "NotGlob" => !glob_value(actual, expected, false)?,
        "IGlob" => glob_value(actual, expected, true)?,
        "NotIGlob" => !glob_value(actual, expected, true)?,
        other => return Err(format!("unknown operator {other:?}")),
    };
    Ok(result)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, String> {
    let items = haystack
        .as_array()
        .ok_or_else(|| format!("In expects an array, got {haystack}"))?;
    Ok(items.iter().any(|item| values_equal(item, needle)))
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn glob_value(actual: &Value, pattern: &Value, fold_case: bool) -> Result<bool, String> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| format!("glob pattern must be a string, got {pattern}"))?;
    let Some(text) = actual.as_str() else {
        return Ok(false);
    };
    if fold_case {
        Ok(glob(&pattern.to_lowercase(), &text.to_lowercase()))
    } else {
        Ok(glob(pattern, text))
    }
}

/// Shell-style match supporting `*` (any run, `**` included) and `?`.
pub fn glob(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            while pi < p.len() && p[pi] == '*' {
                pi += 1;
            }
            backtrack = Some((pi, ti));
        } else if let Some((star_p, star_t)) = backtrack {
            pi = star_p;
            ti = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
