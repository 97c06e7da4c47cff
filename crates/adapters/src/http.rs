//! HTTP lookups.
//!
//! The rendered statement has the form `METHOD /path?query`. The literal text
//! of the template is the skeleton of the request: `/` separates path segments,
//! `?` starts the query, and `&`/`=` separate query pairs. Record values are
//! never parsed for structure. Each one lands inside the path segment or query
//! key/value it was written in and is percent-encoded there by the url builder.

use async_trait::async_trait;
use eivs_core::config::HttpConfig;
use eivs_core::{
    AdapterError, AuthKind, ConcreteQuery, ConnectionDescriptor, DatasourceAdapter,
    DatasourceKind, QuerySegment, ResultSet, Row,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::debug;
use url::Url;

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";
const ENVELOPE_KEYS: [&str; 3] = ["rows", "data", "items"];

#[derive(Clone, Debug)]
pub struct HttpAdapter {
    client: Client,
    max_body_bytes: usize,
}

impl HttpAdapter {
    pub fn new(config: &HttpConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|error| {
                AdapterError::Unsupported(format!("http client could not be built: {error}"))
            })?;
        Ok(Self { client, max_body_bytes: config.max_body_bytes })
    }

    fn request(
        &self,
        method: Method,
        url: Url,
        connection: &ConnectionDescriptor,
    ) -> Result<RequestBuilder, AdapterError> {
        let mut request = self.client.request(method, url);

        if let Some(Value::Object(headers)) = connection.extra.get("headers") {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let credential = || {
            connection
                .credential
                .as_ref()
                .map(|secret| secret.expose_secret().to_string())
                .ok_or_else(|| {
                    AdapterError::Unsupported(format!(
                        "{} auth on `{}` has no credential",
                        connection.auth_kind.as_str(),
                        connection.config_name
                    ))
                })
        };

        request = match connection.auth_kind {
            AuthKind::None => request,
            AuthKind::Basic => {
                let credential = credential()?;
                let (user, password) = match credential.split_once(':') {
                    Some((user, password)) => (user.to_string(), Some(password.to_string())),
                    None => (credential, None),
                };
                request.basic_auth(user, password)
            }
            AuthKind::Bearer => request.bearer_auth(credential()?),
            AuthKind::ApiKey => {
                let header =
                    connection.extra_str("api_key_header").unwrap_or(DEFAULT_API_KEY_HEADER);
                request.header(header, credential()?)
            }
        };

        Ok(request)
    }

    async fn read_body(&self, mut response: Response) -> Result<Vec<u8>, AdapterError> {
        let limit = self.max_body_bytes;
        if response.content_length().is_some_and(|length| length > limit as u64) {
            return Err(body_too_large(limit));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|error| AdapterError::ConnectionFailed(error.without_url().to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(body_too_large(limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl DatasourceAdapter for HttpAdapter {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::Http
    }

    async fn execute(
        &self,
        connection: &ConnectionDescriptor,
        query: &ConcreteQuery,
    ) -> Result<ResultSet, AdapterError> {
        let target = RequestTarget::from_query(query)?;
        let url = target.url(&connection.base_address)?;

        let response = self
            .request(target.method.clone(), url, connection)?
            .send()
            .await
            .map_err(|error| AdapterError::ConnectionFailed(error.without_url().to_string()))?;

        let status = response.status();
        debug!(
            event_name = "adapter.http.executed",
            tenant_id = %connection.tenant_id,
            config_name = %connection.config_name,
            method = %target.method,
            status = status.as_u16(),
            "http lookup executed"
        );

        if status == StatusCode::NOT_FOUND {
            return Ok(ResultSet::empty());
        }
        if status.is_server_error() {
            return Err(AdapterError::ConnectionFailed(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Err(AdapterError::Malformed(format!("upstream rejected lookup with {status}")));
        }

        let body = self.read_body(response).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ResultSet::empty());
        }
        let payload: Value = serde_json::from_slice(&body)
            .map_err(|error| AdapterError::Malformed(format!("response is not JSON: {error}")))?;

        normalize_payload(payload).map(ResultSet::from_rows)
    }

    async fn probe(&self, connection: &ConnectionDescriptor) -> Result<(), AdapterError> {
        let url = base_url(&connection.base_address)?;
        self.request(Method::GET, url, connection)?
            .send()
            .await
            .map(|_| ())
            .map_err(|error| AdapterError::ConnectionFailed(error.without_url().to_string()))
    }
}

fn body_too_large(limit: usize) -> AdapterError {
    AdapterError::Malformed(format!("response body exceeds {limit} bytes"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Part {
    Method,
    Gap,
    Path,
    QueryKey,
    QueryValue,
    Trailing,
}

/// Method, decoded path segments, and decoded query pairs of one lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RequestTarget {
    method: Method,
    path: Vec<String>,
    query: Vec<(String, String)>,
}

impl RequestTarget {
    fn from_query(query: &ConcreteQuery) -> Result<Self, AdapterError> {
        let mut part = Part::Method;
        let mut method = String::new();
        let mut path = Vec::new();
        let mut pairs = Vec::new();
        let mut key = String::new();
        let mut current = String::new();

        for segment in &query.segments {
            match segment {
                QuerySegment::Param(index) => {
                    let value = query
                        .param(*index)
                        .map(|param| param.value.as_text())
                        .ok_or_else(|| {
                            AdapterError::Malformed(format!("no value bound for parameter {index}"))
                        })?;
                    match part {
                        Part::Path | Part::QueryKey | Part::QueryValue => current.push_str(&value),
                        _ => {
                            return Err(AdapterError::Malformed(
                                "record values may only appear in the path or query".to_string(),
                            ))
                        }
                    }
                }
                QuerySegment::Literal(text) => {
                    for ch in text.chars() {
                        part = match (part, ch) {
                            (Part::Method, '/') if method.is_empty() => Part::Path,
                            (Part::Method, ch) if ch.is_whitespace() => {
                                if method.is_empty() {
                                    Part::Method
                                } else {
                                    Part::Gap
                                }
                            }
                            (Part::Method, ch) => {
                                method.push(ch);
                                Part::Method
                            }
                            (Part::Gap, ch) if ch.is_whitespace() => Part::Gap,
                            (Part::Gap, '/') => Part::Path,
                            (Part::Gap, _) => return Err(path_must_start_with_slash(text)),
                            (Part::Path, '/') => {
                                path.push(std::mem::take(&mut current));
                                Part::Path
                            }
                            (Part::Path, '?') => {
                                path.push(std::mem::take(&mut current));
                                Part::QueryKey
                            }
                            (Part::QueryKey, '=') => {
                                key = std::mem::take(&mut current);
                                Part::QueryValue
                            }
                            (Part::QueryKey, '&') => {
                                if !current.is_empty() {
                                    pairs.push((std::mem::take(&mut current), String::new()));
                                }
                                Part::QueryKey
                            }
                            (Part::QueryValue, '&') => {
                                pairs.push((std::mem::take(&mut key), std::mem::take(&mut current)));
                                Part::QueryKey
                            }
                            (Part::Path | Part::QueryKey | Part::QueryValue, '#') => {
                                return Err(AdapterError::Malformed(
                                    "http lookup target must not carry a fragment".to_string(),
                                ))
                            }
                            (Part::Path | Part::QueryKey | Part::QueryValue, ch)
                                if ch.is_whitespace() =>
                            {
                                close_part(part, &mut path, &mut pairs, &mut key, &mut current);
                                Part::Trailing
                            }
                            (Part::Path | Part::QueryKey | Part::QueryValue, ch) => {
                                current.push(ch);
                                part
                            }
                            (Part::Trailing, ch) if ch.is_whitespace() => Part::Trailing,
                            (Part::Trailing, _) => {
                                return Err(AdapterError::Malformed(format!(
                                    "unexpected text after the http lookup target in `{text}`"
                                )))
                            }
                        };
                    }
                }
            }
        }

        match part {
            Part::Method if method.is_empty() => {
                return Err(AdapterError::Malformed("http lookup statement is empty".to_string()))
            }
            Part::Method | Part::Gap => return Err(path_must_start_with_slash(&method)),
            _ => close_part(part, &mut path, &mut pairs, &mut key, &mut current),
        }

        if let Some(segment) = path.iter().find(|segment| matches!(segment.as_str(), "." | "..")) {
            return Err(AdapterError::Malformed(format!(
                "path segment `{segment}` would leave the lookup route"
            )));
        }

        let method = if method.is_empty() { "GET".to_string() } else { method };
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AdapterError::Malformed(format!("unknown http method `{method}`")))?;

        Ok(Self { method, path, query: pairs })
    }

    fn url(&self, base_address: &str) -> Result<Url, AdapterError> {
        let mut url = base_url(base_address)?;
        url.path_segments_mut()
            .map_err(|()| {
                AdapterError::Malformed(format!("base address `{base_address}` cannot carry a path"))
            })?
            .pop_if_empty()
            .extend(&self.path);
        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(key, value)| (key.as_str(), value.as_str())));
        }
        Ok(url)
    }
}

fn close_part(
    part: Part,
    path: &mut Vec<String>,
    pairs: &mut Vec<(String, String)>,
    key: &mut String,
    current: &mut String,
) {
    match part {
        Part::Path => path.push(std::mem::take(current)),
        Part::QueryKey if !current.is_empty() => {
            pairs.push((std::mem::take(current), String::new()))
        }
        Part::QueryValue => pairs.push((std::mem::take(key), std::mem::take(current))),
        _ => {}
    }
}

fn path_must_start_with_slash(text: &str) -> AdapterError {
    AdapterError::Malformed(format!(
        "http lookup target in `{}` must be a path starting with `/`",
        text.trim()
    ))
}

fn base_url(base_address: &str) -> Result<Url, AdapterError> {
    Url::parse(base_address.trim())
        .map_err(|error| AdapterError::Malformed(format!("invalid lookup url: {error}")))
}

/// Arrays become rows, `{rows|data|items: [...]}` envelopes are unwrapped, a
/// lone object is one row, and `null` is no rows.
fn normalize_payload(payload: Value) -> Result<Vec<Row>, AdapterError> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.into_iter().map(item_to_row).collect()),
        Value::Object(mut object) => {
            for key in ENVELOPE_KEYS {
                if matches!(object.get(key), Some(Value::Array(_))) {
                    if let Some(Value::Array(items)) = object.remove(key) {
                        return Ok(items.into_iter().map(item_to_row).collect());
                    }
                }
            }
            Ok(vec![object.into_iter().collect()])
        }
        other => Err(AdapterError::Malformed(format!("expected JSON object or array, got {other}"))),
    }
}

fn item_to_row(item: Value) -> Row {
    match item {
        Value::Object(object) => object.into_iter().collect(),
        scalar => Row::from([("value".to_string(), scalar)]),
    }
}
