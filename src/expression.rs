//! Interpolated string fields such as `${! meta("set_key") }`.
//!
//! A template is compiled once when a stage is built, so malformed templates fail construction.
//! Evaluation happens per part at processing time against that part's content and metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::message::Part;
use crate::shared::unix_timestamp;

const OPEN: &str = "${!";
const ESCAPED_OPEN: &str = "$${!";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Function {
    /// A single metadata value, or all metadata as a JSON object when no key is given.
    Meta(Option<String>),
    Content,
    Json(Vec<String>),
    BatchIndex,
    BatchSize,
    UuidV4,
    TimestampUnix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Function(Function),
}

/// A compiled interpolated string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExpression {
    segments: Vec<Segment>,
}

impl FieldExpression {
    /// Compiles `template`.
    ///
    /// # Examples
    ///
    /// ```
    /// use flowstage::expression::FieldExpression;
    /// use flowstage::message::Part;
    ///
    /// let key = FieldExpression::parse(r#"sets:${! meta("set_key") }"#).unwrap();
    /// let part = Part::new("hello").with_metadata("set_key", "s1");
    /// assert_eq!(key.evaluate(0, &part, 1), "sets:s1");
    /// ```
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = template;

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix(ESCAPED_OPEN) {
                literal.push_str(OPEN);
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix(OPEN) {
                let end = closing_brace(tail).ok_or_else(|| {
                    format!("unterminated interpolation in {template:?}")
                })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Function(parse_function(&tail[..end])?));
                rest = &tail[end + 1..];
            } else {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    literal.push(c);
                }
                rest = chars.as_str();
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Whether the expression yields the same string for every part.
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Evaluates the expression for the part at `index` of a batch of `batch_size` parts.
    pub fn evaluate(&self, index: usize, part: &Part, batch_size: usize) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Function(function) => {
                    out.push_str(&function.evaluate(index, part, batch_size))
                }
            }
        }
        out
    }
}

impl Function {
    fn evaluate(&self, index: usize, part: &Part, batch_size: usize) -> String {
        match self {
            Function::Meta(Some(key)) => part.metadata(key).unwrap_or_default().to_string(),
            Function::Meta(None) => {
                let sorted: BTreeMap<_, _> = part.metadata_map().iter().collect();
                serde_json::to_string(&sorted).unwrap_or_default()
            }
            Function::Content => String::from_utf8_lossy(part.payload()).into_owned(),
            Function::Json(path) => json_lookup(part.payload(), path),
            Function::BatchIndex => index.to_string(),
            Function::BatchSize => batch_size.to_string(),
            Function::UuidV4 => Uuid::new_v4().to_string(),
            Function::TimestampUnix => unix_timestamp().to_string(),
        }
    }
}

impl fmt::Display for FieldExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(&text.replace(OPEN, ESCAPED_OPEN))?,
                Segment::Function(function) => write!(f, "{OPEN} {function} }}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Meta(Some(key)) => write!(f, "meta({key:?})"),
            Function::Meta(None) => f.write_str("meta()"),
            Function::Content => f.write_str("content()"),
            Function::Json(path) => write!(f, "json({:?})", path.join(".")),
            Function::BatchIndex => f.write_str("batch_index()"),
            Function::BatchSize => f.write_str("batch_size()"),
            Function::UuidV4 => f.write_str("uuid_v4()"),
            Function::TimestampUnix => f.write_str("timestamp_unix()"),
        }
    }
}

/// Byte offset of the `}` closing an interpolation, skipping braces inside quoted arguments.
fn closing_brace(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (offset, c) in s.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '}' if !in_quotes => return Some(offset),
            _ => {}
        }
    }
    None
}

fn parse_function(body: &str) -> Result<Function, String> {
    let body = body.trim();
    let open = body
        .find('(')
        .ok_or_else(|| format!("expected function call, got {body:?}"))?;
    let name = body[..open].trim();
    let args = body[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| format!("expected closing parenthesis in {body:?}"))?
        .trim();
    let arg = if args.is_empty() {
        None
    } else {
        Some(parse_string_literal(args)?)
    };

    let has_arg = arg.is_some();
    let no_args = |function: Function| {
        if has_arg {
            Err(format!("function {name} expects no arguments"))
        } else {
            Ok(function)
        }
    };

    match name {
        "meta" => Ok(Function::Meta(arg)),
        "content" => no_args(Function::Content),
        "json" => {
            let path = arg.unwrap_or_default();
            let path = if path.is_empty() {
                Vec::new()
            } else {
                path.split('.').map(str::to_string).collect()
            };
            Ok(Function::Json(path))
        }
        "batch_index" => no_args(Function::BatchIndex),
        "batch_size" => no_args(Function::BatchSize),
        "uuid_v4" => no_args(Function::UuidV4),
        "timestamp_unix" => no_args(Function::TimestampUnix),
        other => Err(format!("unrecognised function: {other}")),
    }
}

fn parse_string_literal(s: &str) -> Result<String, String> {
    let inner = s
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .ok_or_else(|| format!("expected a quoted string argument, got {s}"))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => return Err(format!("invalid escape \\{other} in {s}")),
                None => return Err(format!("dangling escape in {s}")),
            },
            '"' => return Err(format!("unexpected quote in {s}")),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn json_lookup(payload: &[u8], path: &[String]) -> String {
    let Ok(doc) = serde_json::from_slice::<Value>(payload) else {
        return String::new();
    };
    let mut current = &doc;
    for step in path {
        let next = match current {
            Value::Object(map) => map.get(step),
            Value::Array(items) => step.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return String::new(),
        }
    }
    match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part() -> Part {
        Part::new(r#"{"user":{"name":"ash","ids":[7,8]},"n":3}"#)
            .with_metadata("set_key", "s1")
            .with_metadata("topic", "events")
    }

    #[test]
    fn test_literal_only() {
        let expr = FieldExpression::parse("plain-key").unwrap();
        assert!(expr.is_static());
        assert_eq!(expr.evaluate(0, &part(), 1), "plain-key");

        let empty = FieldExpression::parse("").unwrap();
        assert!(empty.is_static());
        assert_eq!(empty.evaluate(0, &part(), 1), "");
    }

    #[test]
    fn test_meta() {
        let expr = FieldExpression::parse(r#"${! meta("set_key") }"#).unwrap();
        assert!(!expr.is_static());
        assert_eq!(expr.evaluate(0, &part(), 1), "s1");

        let missing = FieldExpression::parse(r#"${!meta("nope")}"#).unwrap();
        assert_eq!(missing.evaluate(0, &part(), 1), "");

        let all = FieldExpression::parse("${! meta() }").unwrap();
        assert_eq!(
            all.evaluate(0, &part(), 1),
            r#"{"set_key":"s1","topic":"events"}"#
        );
    }

    #[test]
    fn test_content_and_batch_functions() {
        let expr = FieldExpression::parse("${! content() }").unwrap();
        assert_eq!(expr.evaluate(0, &Part::new("abc"), 1), "abc");

        let expr = FieldExpression::parse("${! batch_index() }/${! batch_size() }").unwrap();
        assert_eq!(expr.evaluate(2, &Part::new(""), 5), "2/5");
    }

    #[test]
    fn test_json() {
        let name = FieldExpression::parse(r#"${! json("user.name") }"#).unwrap();
        assert_eq!(name.evaluate(0, &part(), 1), "ash");

        let id = FieldExpression::parse(r#"${! json("user.ids.1") }"#).unwrap();
        assert_eq!(id.evaluate(0, &part(), 1), "8");

        let object = FieldExpression::parse(r#"${! json("user.ids") }"#).unwrap();
        assert_eq!(object.evaluate(0, &part(), 1), "[7,8]");

        let missing = FieldExpression::parse(r#"${! json("user.age") }"#).unwrap();
        assert_eq!(missing.evaluate(0, &part(), 1), "");

        let not_json = FieldExpression::parse(r#"${! json("a") }"#).unwrap();
        assert_eq!(not_json.evaluate(0, &Part::new("plain"), 1), "");
    }

    #[test]
    fn test_generated_values() {
        let expr = FieldExpression::parse("${! uuid_v4() }").unwrap();
        let a = expr.evaluate(0, &part(), 1);
        let b = expr.evaluate(0, &part(), 1);
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);

        let ts = FieldExpression::parse("${! timestamp_unix() }").unwrap();
        assert!(ts.evaluate(0, &part(), 1).parse::<i64>().is_ok());
    }

    #[test]
    fn test_mixed_and_escaped() {
        let expr =
            FieldExpression::parse(r#"prefix:${! meta("topic") }:$${! literal }:${!meta("a}b")}"#)
                .unwrap();
        let part = part().with_metadata("a}b", "braced");
        assert_eq!(
            expr.evaluate(0, &part, 1),
            "prefix:events:${! literal }:braced"
        );
    }

    #[test]
    fn test_display_round_trips() {
        let template = r#"k:${! meta("set_key") }:${! batch_index() }"#;
        let expr = FieldExpression::parse(template).unwrap();
        let reparsed = FieldExpression::parse(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn test_parse_errors() {
        assert!(FieldExpression::parse("${! meta(\"unterminated\" ").is_err());
        assert!(FieldExpression::parse("${! nope() }").is_err());
        assert!(FieldExpression::parse("${! content(\"x\") }").is_err());
        assert!(FieldExpression::parse("${! meta(set_key) }").is_err());
        assert!(FieldExpression::parse("${! meta }").is_err());
        assert!(FieldExpression::parse(r#"${! meta("a\q") }"#).is_err());
    }
}
