//! Transport-neutral HTTP request and response values.
//!
//! Both the client engine and the reference server speak in these types so
//! the same handler can be reached in-process or over a real socket.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Header carrying the bearer credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";
/// Default header used to echo the anti-forgery token.
pub const DEFAULT_CSRF_HEADER: &str = "x-csrf-token";
/// Cookie holding the signed anti-forgery hash.
pub const CSRF_COOKIE_NAME: &str = "csrf_token";
/// JSON content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Returns true for methods that change server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(ProtocolError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// Header pairs. Names are matched case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a request with a JSON body.
    pub fn json<T: Serialize + ?Sized>(
        method: Method,
        path: impl Into<String>,
        body: &T,
    ) -> ProtocolResult<Self> {
        let bytes = serde_json::to_vec(body)?;
        Ok(Self::new(method, path)
            .with_header("content-type", CONTENT_TYPE_JSON)
            .with_body(bytes))
    }

    /// Adds or replaces a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds or replaces a header in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Looks up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the bearer token from the authorization header, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.header(AUTHORIZATION_HEADER)
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Returns the value of a cookie from the `cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.header("cookie")?.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then_some(v)
        })
    }

    /// Returns the path without its query string.
    pub fn route_path(&self) -> &str {
        self.path.split('?').next().unwrap_or("")
    }

    /// Decodes the body as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        let body = self.body.as_deref().ok_or(ProtocolError::MissingBody)?;
        Ok(serde_json::from_slice(body)?)
    }
}

/// A received HTTP response.
///
/// Error responses are kept intact (status, headers and body) so that callers
/// can inspect exactly what the server returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Header pairs.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Creates a response with a raw body.
    pub fn with_body(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Creates a JSON response.
    pub fn json<T: Serialize + ?Sized>(status: u16, body: &T) -> ProtocolResult<Self> {
        Ok(Self::with_body(status, serde_json::to_vec(body)?)
            .with_header("content-type", CONTENT_TYPE_JSON))
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for 5xx statuses.
    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Returns the body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_roundtrip() {
        for m in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
        ] {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), m);
        }
        assert!("TRACE".parse::<Method>().is_err());
        assert!(!Method::Get.is_mutating());
        assert!(Method::Patch.is_mutating());
    }

    #[test]
    fn headers_are_case_insensitive_and_replaced() {
        let req = HttpRequest::new(Method::Get, "/x")
            .with_header("Authorization", "Bearer abc")
            .with_header("authorization", "Bearer def");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.bearer_token(), Some("def"));
    }

    #[test]
    fn cookie_lookup() {
        let req = HttpRequest::new(Method::Get, "/x")
            .with_header("cookie", "a=1; csrf_token=xyz; b=2");
        assert_eq!(req.cookie(CSRF_COOKIE_NAME), Some("xyz"));
        assert_eq!(req.cookie("missing"), None);
    }

    #[test]
    fn route_path_strips_query() {
        let req = HttpRequest::new(Method::Get, "/task/u1?limit=3");
        assert_eq!(req.route_path(), "/task/u1");
    }

    #[test]
    fn response_classification() {
        assert!(HttpResponse::new(204).is_success());
        assert!(!HttpResponse::new(300).is_success());
        assert!(!HttpResponse::new(499).is_server_error());
        assert!(HttpResponse::new(503).is_server_error());
        assert_eq!(HttpResponse::with_body(500, "boom").text(), "boom");
    }
}
