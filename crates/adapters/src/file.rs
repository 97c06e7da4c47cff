//! Static record sets (CSV, JSON array, JSON lines) scanned with a conjunction
//! filter of the form `column = {{field}} [AND column = {{field}} ...]`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use eivs_core::domain::record::scalar_text;
use eivs_core::{
    AdapterError, ConcreteQuery, ConnectionDescriptor, DatasourceAdapter, DatasourceKind,
    QuerySegment, ResultSet, Row,
};
use serde_json::Value;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
    JsonLines,
}

impl FileFormat {
    fn detect(connection: &ConnectionDescriptor, path: &Path) -> Result<Self, AdapterError> {
        let declared = connection.extra_str("format").map(str::to_string).or_else(|| {
            path.extension().and_then(|extension| extension.to_str()).map(str::to_string)
        });

        match declared.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            Some("jsonl" | "ndjson" | "json_lines") => Ok(Self::JsonLines),
            other => Err(AdapterError::Unsupported(format!(
                "file format `{}` for `{}`",
                other.unwrap_or("unknown"),
                connection.config_name
            ))),
        }
    }
}

/// One `column = param` term of the conjunction.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Clause {
    column: String,
    param: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FileAdapter;

impl FileAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatasourceAdapter for FileAdapter {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::File
    }

    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &ConcreteQuery,
    ) -> Result<ResultSet, AdapterError> {
        let clauses = parse_filter(query)?;
        let path = source_path(&connection.base_address);
        let format = FileFormat::detect(connection, &path)?;

        let raw = tokio::fs::read_to_string(&path).await.map_err(|error| {
            AdapterError::ConnectionFailed(format!("could not read `{}`: {error}", path.display()))
        })?;
        let records = parse_records(format, &raw)?;

        let total = records.len();
        let rows: Vec<Row> =
            records.into_iter().filter(|row| matches_all(row, &clauses, query)).collect();

        debug!(
            event_name = "adapter.file.scanned",
            tenant_id = %connection.tenant_id,
            config_name = %connection.config_name,
            scanned = total,
            matched = rows.len(),
            "file lookup scanned"
        );
        Ok(ResultSet::from_rows(rows))
    }

    async fn probe(&self, connection: &ConnectionDescriptor) -> Result<(), AdapterError> {
        let path = source_path(&connection.base_address);
        FileFormat::detect(connection, &path)?;
        let metadata = tokio::fs::metadata(&path).await.map_err(|error| {
            AdapterError::ConnectionFailed(format!("could not stat `{}`: {error}", path.display()))
        })?;
        if metadata.is_file() {
            Ok(())
        } else {
            Err(AdapterError::ConnectionFailed(format!("`{}` is not a file", path.display())))
        }
    }
}

fn source_path(base_address: &str) -> PathBuf {
    PathBuf::from(base_address.trim().strip_prefix("file://").unwrap_or(base_address.trim()))
}

/// Parses the rendered segments into clauses. An empty statement or `*`
/// selects every record.
fn parse_filter(query: &ConcreteQuery) -> Result<Vec<Clause>, AdapterError> {
    let mut clauses = Vec::new();
    let mut pending = String::new();

    for segment in &query.segments {
        match segment {
            QuerySegment::Literal(text) => pending.push_str(text),
            QuerySegment::Param(index) => {
                let column = clause_column(&pending, clauses.is_empty())?;
                clauses.push(Clause { column, param: *index });
                pending.clear();
            }
        }
    }

    let trailing = pending.trim();
    if clauses.is_empty() && (trailing.is_empty() || trailing == "*") {
        return Ok(clauses);
    }
    if !trailing.is_empty() {
        return Err(AdapterError::Malformed(format!(
            "unexpected filter text `{trailing}`; values must be placeholders"
        )));
    }
    Ok(clauses)
}

fn clause_column(text: &str, first: bool) -> Result<String, AdapterError> {
    let mut text = text.trim();
    if !first {
        let (keyword, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
        if !keyword.eq_ignore_ascii_case("AND") {
            return Err(AdapterError::Malformed(format!(
                "filter terms must be joined with AND, found `{text}`"
            )));
        }
        text = rest.trim();
    }

    let column = text
        .strip_suffix('=')
        .map(str::trim)
        .ok_or_else(|| {
            AdapterError::Malformed(format!("expected `column =` before value, found `{text}`"))
        })?;
    let valid = !column.is_empty()
        && column.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-'));
    if !valid {
        return Err(AdapterError::Malformed(format!("invalid filter column `{column}`")));
    }
    Ok(column.to_string())
}

fn matches_all(row: &Row, clauses: &[Clause], query: &ConcreteQuery) -> bool {
    clauses.iter().all(|clause| {
        let expected = query.param(clause.param).map(|param| param.value.as_text());
        let actual = row.get(&clause.column).and_then(scalar_text);
        matches!((actual, expected), (Some(actual), Some(expected)) if actual == expected)
    })
}

fn parse_records(format: FileFormat, raw: &str) -> Result<Vec<Row>, AdapterError> {
    match format {
        FileFormat::Csv => {
            let mut reader =
                csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(raw.as_bytes());
            let headers = reader
                .headers()
                .map_err(|error| AdapterError::Malformed(format!("csv header: {error}")))?
                .clone();
            reader
                .records()
                .map(|record| -> Result<Row, AdapterError> {
                    let record = record
                        .map_err(|error| AdapterError::Malformed(format!("csv record: {error}")))?;
                    Ok(headers
                        .iter()
                        .zip(record.iter())
                        .map(|(name, value)| (name.to_string(), Value::from(value)))
                        .collect())
                })
                .collect()
        }
        FileFormat::Json => {
            let payload: Value = serde_json::from_str(raw)
                .map_err(|error| AdapterError::Malformed(format!("json: {error}")))?;
            match payload {
                Value::Array(items) => items.into_iter().map(object_row).collect(),
                other => Err(AdapterError::Malformed(format!(
                    "json record set must be an array, got {}",
                    json_kind(&other)
                ))),
            }
        }
        FileFormat::JsonLines => raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str::<Value>(line)
                    .map_err(|error| {
                        AdapterError::Malformed(format!("json line {}: {error}", number + 1))
                    })
                    .and_then(object_row)
            })
            .collect(),
    }
}

fn object_row(item: Value) -> Result<Row, AdapterError> {
    match item {
        Value::Object(object) => Ok(object.into_iter().collect()),
        other => Err(AdapterError::Malformed(format!(
            "record must be an object, got {}",
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

#[cfg(test)]
mod tests {
    use eivs_core::{render, CandidateRecord, ConditionTemplate};

    use super::{parse_filter, parse_records, Clause, FileFormat};

    fn filter(
        statement: &str,
        placeholders: &[&str],
    ) -> Result<Vec<Clause>, eivs_core::AdapterError> {
        let record = CandidateRecord::new()
            .with_field("sender_email", "ops@acme.test")
            .with_field("region", "emea");
        let template = ConditionTemplate::new(statement, placeholders.iter().copied());
        parse_filter(&render(&template, &record).expect("render"))
    }

    #[test]
    fn conjunction_parses_into_clauses() {
        let clauses =
            filter("email = {{sender_email}} AND region = {{region}}", &["sender_email", "region"])
                .expect("filter");

        assert_eq!(
            clauses,
            vec![
                Clause { column: "email".to_string(), param: 0 },
                Clause { column: "region".to_string(), param: 1 },
            ]
        );
    }

    #[test]
    fn wildcard_selects_everything() {
        assert!(filter("*", &[]).expect("wildcard").is_empty());
    }

    #[test]
    fn literal_values_and_other_operators_are_rejected() {
        assert!(filter(
            "email = {{sender_email}} OR region = {{region}}",
            &["sender_email", "region"]
        )
        .is_err());
        assert!(filter("email = {{sender_email}} AND active = 1", &["sender_email"]).is_err());
        assert!(filter("email LIKE {{sender_email}}", &["sender_email"]).is_err());
    }

    #[test]
    fn csv_cells_are_trimmed_text() {
        let rows = parse_records(FileFormat::Csv, "email, status\nops@acme.test , active\n")
            .expect("csv");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("status"), Some(&serde_json::json!("active")));
    }

    #[test]
    fn json_lines_reports_the_bad_line() {
        let error = parse_records(FileFormat::JsonLines, "{\"a\":1}\n\nnot json\n")
            .expect_err("bad line");
        assert!(error.to_string().contains("line 3"));
    }
}
