use crate::error::TransportError;
use crate::parse::error_detail;
use crate::request::{Body, HttpRequest};
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::pin::Pin;
use std::time::Duration;

/// Raw response bytes, chunked as they arrive from the socket.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Maps non-2xx statuses to `TransportError`, keeping the server's `detail`.
    pub fn ensure_success(self) -> Result<Self, TransportError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(status_error(self.status, &self.body))
    }
}

pub(crate) fn status_error(status: u16, body: &[u8]) -> TransportError {
    if status == 401 {
        return TransportError::Unauthorized;
    }
    TransportError::Status {
        status,
        detail: error_detail(body),
    }
}

#[derive(Debug, Clone)]
pub struct HttpRuntime {
    client: reqwest::Client,
    // Streams are long-lived: connect timeout only, idleness is policed by the reader.
    stream_client: reqwest::Client,
}

impl HttpRuntime {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, TransportError> {
        // Without an explicit timeout a broken endpoint can hang a request indefinitely.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(TransportError::network)?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(TransportError::network)?;
        Ok(Self {
            client,
            stream_client,
        })
    }

    pub async fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        log::debug!("http {} {}", req.method, req.url);
        let resp = build(&self.client, req)?
            .send()
            .await
            .map_err(TransportError::network)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(TransportError::network)?
            .to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }

    /// Opens a response body as a byte stream.
    ///
    /// A connection failure or a non-2xx status is reported here, before any
    /// byte is handed out, so callers can tell it apart from an empty stream.
    pub async fn open_stream(&self, req: &HttpRequest) -> Result<ByteStream, TransportError> {
        log::debug!("http stream {} {}", req.method, req.url);
        let resp = build(&self.stream_client, req)?
            .send()
            .await
            .map_err(TransportError::network)?;

        let status = resp.status().as_u16();
        if !(200..=299).contains(&status) {
            let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let stream = resp.bytes_stream().map(|chunk| {
            chunk
                .map(|b| b.to_vec())
                .map_err(TransportError::network)
        });
        Ok(Box::pin(stream))
    }
}

fn build(client: &reqwest::Client, req: &HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
    let mut headers = HeaderMap::new();
    for (k, v) in &req.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid header name: {k}")))?;
        let value = HeaderValue::from_str(v)
            .map_err(|_| TransportError::InvalidRequest(format!("invalid header value for {k}")))?;
        headers.insert(name, value);
    }

    let builder = match req.method.as_str() {
        "GET" => client.get(&req.url),
        "POST" => client.post(&req.url),
        "PUT" => client.put(&req.url),
        "DELETE" => client.delete(&req.url),
        other => {
            return Err(TransportError::InvalidRequest(format!(
                "unsupported method: {other}"
            )));
        }
    }
    .headers(headers);

    Ok(match &req.body {
        Body::Empty => builder,
        Body::Json(s) => builder.body(s.clone()),
        Body::MultipartFormData { bytes, .. } => builder.body(bytes.clone()),
    })
}
