use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use common::{GraphErrorEnvelope, RequestFailure, TransportError};

/// Longest server body kept in error messages
const MAX_ERROR_BODY_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FormField>),
}

/// Transport-agnostic description of a single API call
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    /// Append a text field, switching the body to multipart if needed
    pub fn text_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_field(FormField {
            name: name.into(),
            value: FormValue::Text(value.into()),
        });
        self
    }

    /// Append a binary field, switching the body to multipart if needed
    pub fn file_field(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        self.push_field(FormField {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                content_type: content_type.into(),
                data,
            },
        });
        self
    }

    fn push_field(&mut self, field: FormField) {
        match &mut self.body {
            RequestBody::Multipart(fields) => fields.push(field),
            _ => self.body = RequestBody::Multipart(vec![field]),
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn form_text(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Multipart(fields) => fields.iter().find_map(|field| match &field.value {
                FormValue::Text(value) if field.name == name => Some(value.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn form_file(&self, name: &str) -> Option<&Bytes> {
        match &self.body {
            RequestBody::Multipart(fields) => fields.iter().find_map(|field| match &field.value {
                FormValue::File { data, .. } if field.name == name => Some(data),
                _ => None,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_value(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode {
            message: e.to_string(),
        })
    }

    /// JSON body, or `null` for an empty body
    pub fn json_or_null(&self) -> Result<serde_json::Value, TransportError> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        self.json()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// `error.message` of a Graph API error envelope, if the body is one
    pub fn graph_error_message(&self) -> Option<String> {
        serde_json::from_slice::<GraphErrorEnvelope>(&self.body)
            .ok()
            .map(|envelope| envelope.error.message)
            .filter(|message| !message.is_empty())
    }

    /// Turn a non-2xx response into [`RequestFailure::Status`]
    pub fn error_for_status(self) -> Result<Self, RequestFailure> {
        if self.is_success() {
            return Ok(self);
        }

        let message = self.graph_error_message().unwrap_or_else(|| {
            let mut text = self.text();
            if text.len() > MAX_ERROR_BODY_LEN {
                let mut cut = MAX_ERROR_BODY_LEN;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            text
        });

        Err(RequestFailure::Status {
            code: self.status,
            message,
        })
    }
}

/// `base` with each of `segments` appended as one percent-encoded path segment
pub fn join_path(base: &str, segments: &[&str]) -> Result<String, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidRequest {
        message: format!("invalid base URL {}: {}", base, e),
    })?;

    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidRequest {
            message: format!("base URL {} cannot carry a path", base),
        })?
        .pop_if_empty()
        .extend(segments);

    Ok(url.into())
}

/// Request/response seam shared by every vendor client
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("stream-publisher/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| TransportError::InvalidRequest {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build_multipart(fields: Vec<FormField>) -> Result<reqwest::multipart::Form, TransportError> {
        let mut form = reqwest::multipart::Form::new();

        for field in fields {
            form = match field.value {
                FormValue::Text(value) => form.text(field.name, value),
                FormValue::File {
                    file_name,
                    content_type,
                    data,
                } => {
                    let part = reqwest::multipart::Part::bytes(data.to_vec())
                        .file_name(file_name)
                        .mime_str(&content_type)
                        .map_err(|e| TransportError::InvalidRequest {
                            message: format!("Invalid content type {}: {}", content_type, e),
                        })?;
                    form.part(field.name, part)
                }
            };
        }

        Ok(form)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        debug!(method = ?request.method, url = %request.url, "Sending request");

        let mut builder = self.client.request(request.method.into(), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(fields) => builder.multipart(Self::build_multipart(fields)?),
        };

        let response = builder.send().await.map_err(|e| TransportError::Network {
            message: e.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| TransportError::Network {
            message: format!("Failed to read response body: {}", e),
        })?;

        debug!(status, bytes = body.len(), "Received response");

        Ok(HttpResponse { status, body })
    }
}
