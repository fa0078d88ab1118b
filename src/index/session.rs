use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use miette::Diagnostic;
use thiserror::Error;
use url::Url;

/// An error raised by the HTTP collaborator. The finder never propagates
/// these: a failed fetch means the page is logged and dropped.
#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    /// The server answered with an error status.
    #[error("HTTP error {status} for url {url}")]
    Http {
        /// The response status code.
        status: StatusCode,
        /// The URL that was requested.
        url: Url,
    },

    /// The request never produced a response.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request timed out.
    #[error("timed out")]
    Timeout,
}

/// A fully buffered HTTP response. The finder requires nothing streaming:
/// index pages are small and are parsed in one piece.
#[derive(Debug, Clone)]
pub struct SessionResponse {
    /// The final URL of the response, after any redirects.
    pub url: Url,

    /// The response status.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The response body, decoded to text.
    pub text: String,
}

impl SessionResponse {
    /// Turns a 4xx/5xx response into a [`FetchError::Http`].
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.status.is_client_error() || self.status.is_server_error() {
            Err(FetchError::Http {
                status: self.status,
                url: self.url,
            })
        } else {
            Ok(self)
        }
    }

    /// The `Content-Type` header, or `"unknown"` when absent or unreadable.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("unknown")
    }
}

/// The HTTP transport the finder fetches index pages through. Implementations
/// may block or run on an event loop; the finder only awaits one request at a
/// time.
#[async_trait]
pub trait HtmlSession: Send + Sync {
    /// Performs a GET request with the given extra headers.
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<SessionResponse, FetchError>;

    /// Performs a HEAD request, following redirects.
    async fn head(&self, url: &Url) -> Result<SessionResponse, FetchError>;
}

fn convert_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if let (Some(status), Some(url)) = (error.status(), error.url()) {
        FetchError::Http {
            status,
            url: url.clone(),
        }
    } else {
        FetchError::Connection(error.to_string())
    }
}

async fn convert_response(response: reqwest::Response) -> Result<SessionResponse, FetchError> {
    let url = response.url().clone();
    let status = response.status();
    let headers = response.headers().clone();
    let text = response.text().await.map_err(convert_error)?;
    Ok(SessionResponse {
        url,
        status,
        headers,
        text,
    })
}

#[async_trait]
impl HtmlSession for reqwest::Client {
    async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<SessionResponse, FetchError> {
        let response = reqwest::Client::get(self, url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(convert_error)?;
        convert_response(response).await
    }

    async fn head(&self, url: &Url) -> Result<SessionResponse, FetchError> {
        let response = reqwest::Client::head(self, url.clone())
            .send()
            .await
            .map_err(convert_error)?;
        convert_response(response).await
    }
}
