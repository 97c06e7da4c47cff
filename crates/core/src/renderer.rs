//! Condition rendering.
//!
//! A [`ConditionTemplate`] is split into literal statement text and ordered
//! parameter slots. Record values only ever travel in [`ConcreteQuery::params`];
//! adapters decide how a slot is expressed (a `?` bind, an encoded URL
//! component, a filter operand) and never see values inside the statement text.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::domain::record::CandidateRecord;
use crate::domain::rule::ConditionTemplate;
use crate::errors::RenderError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    fn from_json(field: &str, value: &Value) -> Result<Self, RenderError> {
        match value {
            Value::Null => Err(RenderError::MissingField { field: field.to_string() }),
            Value::String(text) => Ok(Self::Text(text.clone())),
            Value::Bool(flag) => Ok(Self::Bool(*flag)),
            Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    Ok(Self::Integer(integer))
                } else if let Some(float) = number.as_f64() {
                    Ok(Self::Float(float))
                } else {
                    Ok(Self::Text(number.to_string()))
                }
            }
            Value::Array(_) | Value::Object(_) => {
                Err(RenderError::UnsupportedValue { field: field.to_string() })
            }
        }
    }

    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryParam {
    pub field: String,
    pub value: ParamValue,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuerySegment {
    Literal(String),
    /// Index into [`ConcreteQuery::params`].
    Param(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConcreteQuery {
    pub segments: Vec<QuerySegment>,
    pub params: Vec<QueryParam>,
}

impl ConcreteQuery {
    /// Statement text with every slot replaced by `marker(index)`.
    pub fn statement_with<F>(&self, mut marker: F) -> String
    where
        F: FnMut(usize) -> String,
    {
        let mut statement = String::new();
        for segment in &self.segments {
            match segment {
                QuerySegment::Literal(text) => statement.push_str(text),
                QuerySegment::Param(index) => statement.push_str(&marker(*index)),
            }
        }
        statement
    }

    /// Statement with positional `?` markers, as bound by sqlx.
    pub fn positional_statement(&self) -> String {
        self.statement_with(|_| "?".to_string())
    }

    pub fn param(&self, index: usize) -> Option<&QueryParam> {
        self.params.get(index)
    }
}

pub fn render(
    template: &ConditionTemplate,
    record: &CandidateRecord,
) -> Result<ConcreteQuery, RenderError> {
    let declared: HashSet<&str> =
        template.placeholders.iter().map(|name| name.trim()).collect();
    let mut used: HashSet<String> = HashSet::new();
    let mut segments = Vec::new();
    let mut params = Vec::new();

    let mut rest = template.statement.as_str();
    while let Some(start) = rest.find(OPEN) {
        let (literal, tail) = rest.split_at(start);
        if !literal.is_empty() {
            segments.push(QuerySegment::Literal(literal.to_string()));
        }

        let tail = &tail[OPEN.len()..];
        let end = tail.find(CLOSE).ok_or_else(|| {
            RenderError::Malformed(format!("unterminated placeholder near `{OPEN}{tail}`"))
        })?;
        let field = tail[..end].trim();

        if field.is_empty() {
            return Err(RenderError::Malformed("empty placeholder token".to_string()));
        }
        if field.contains(OPEN) {
            return Err(RenderError::Malformed(format!("unterminated placeholder `{field}`")));
        }
        if !declared.contains(field) {
            return Err(RenderError::Malformed(format!("placeholder `{field}` is not declared")));
        }

        let value = record
            .get(field)
            .ok_or_else(|| RenderError::MissingField { field: field.to_string() })?;
        let value = ParamValue::from_json(field, value)?;

        segments.push(QuerySegment::Param(params.len()));
        params.push(QueryParam { field: field.to_string(), value });
        used.insert(field.to_string());

        rest = &tail[end + CLOSE.len()..];
    }

    if rest.contains(CLOSE) {
        return Err(RenderError::Malformed("stray `}}` without an opening token".to_string()));
    }
    if !rest.is_empty() {
        segments.push(QuerySegment::Literal(rest.to_string()));
    }

    if let Some(unused) = template
        .placeholders
        .iter()
        .map(|name| name.trim())
        .find(|name| !used.contains(*name))
    {
        return Err(RenderError::Malformed(format!(
            "declared placeholder `{unused}` does not appear in the statement"
        )));
    }

    Ok(ConcreteQuery { segments, params })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::domain::record::CandidateRecord;
    use crate::domain::rule::ConditionTemplate;
    use crate::errors::RenderError;

    use super::{render, ParamValue, QuerySegment};

    fn record() -> CandidateRecord {
        CandidateRecord::new()
            .with_field("sender_email", "ops@acme.test")
            .with_field("order_id", 4711)
            .with_field("tags", json!(["a", "b"]))
            .with_field("cc", json!(null))
    }

    #[test]
    fn values_are_carried_as_parameters_not_statement_text() {
        let template = ConditionTemplate::new(
            "SELECT 1 FROM customers WHERE email = {{sender_email}} AND order_id = {{ order_id }}",
            ["sender_email", "order_id"],
        );

        let query = render(&template, &record()).expect("render");

        assert_eq!(
            query.positional_statement(),
            "SELECT 1 FROM customers WHERE email = ? AND order_id = ?"
        );
        assert_eq!(query.params.len(), 2);
        assert_eq!(query.params[0].value, ParamValue::Text("ops@acme.test".to_string()));
        assert_eq!(query.params[1].value, ParamValue::Integer(4711));
        assert!(!query.positional_statement().contains("ops@acme.test"));
    }

    #[test]
    fn hostile_values_stay_inside_the_parameter() {
        let template = ConditionTemplate::new("email = {{sender_email}}", ["sender_email"]);
        let record = CandidateRecord::new().with_field("sender_email", "x' OR '1'='1");

        let query = render(&template, &record).expect("render");

        assert_eq!(query.segments[1], QuerySegment::Param(0));
        assert_eq!(query.positional_statement(), "email = ?");
    }

    #[test]
    fn missing_field_is_a_render_error() {
        let template = ConditionTemplate::new("email = {{sender_email}}", ["sender_email"]);

        let error = render(&template, &CandidateRecord::new()).expect_err("missing");
        assert_eq!(error, RenderError::MissingField { field: "sender_email".to_string() });
    }

    #[test]
    fn explicit_null_counts_as_missing() {
        let template = ConditionTemplate::new("cc = {{cc}}", ["cc"]);

        let error = render(&template, &record()).expect_err("null");
        assert_eq!(error, RenderError::MissingField { field: "cc".to_string() });
    }

    #[test]
    fn composite_values_are_unsupported() {
        let template = ConditionTemplate::new("tag = {{tags}}", ["tags"]);

        let error = render(&template, &record()).expect_err("array");
        assert_eq!(error, RenderError::UnsupportedValue { field: "tags".to_string() });
    }

    #[test]
    fn undeclared_and_unterminated_tokens_are_malformed() {
        let undeclared = ConditionTemplate::new("email = {{sender_email}}", Vec::<String>::new());
        assert!(matches!(render(&undeclared, &record()), Err(RenderError::Malformed(_))));

        let unterminated = ConditionTemplate::new("email = {{sender_email", ["sender_email"]);
        assert!(matches!(render(&unterminated, &record()), Err(RenderError::Malformed(_))));

        let empty = ConditionTemplate::new("email = {{ }}", ["sender_email"]);
        assert!(matches!(render(&empty, &record()), Err(RenderError::Malformed(_))));
    }

    #[test]
    fn declared_but_unused_placeholder_is_malformed() {
        let template = ConditionTemplate::new("email = {{sender_email}}", ["sender_email", "cc"]);
        assert!(matches!(render(&template, &record()), Err(RenderError::Malformed(_))));
    }

    #[test]
    fn repeated_placeholder_binds_twice() {
        let template = ConditionTemplate::new(
            "a = {{sender_email}} OR b = {{sender_email}}",
            ["sender_email"],
        );

        let query = render(&template, &record()).expect("render");
        assert_eq!(query.params.len(), 2);
        assert_eq!(query.statement_with(|index| format!("${}", index + 1)), "a = $1 OR b = $2");
    }
}
