//! The head of a parsed request.
//!
//! Header lines are kept raw and in arrival order; folding repeated fields into one value is
//! the job of [`Headers::add_line`](crate::protocol::Headers::add_line).

use http::{Method, Version};

use crate::protocol::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    method: Method,
    url: String,
    version: Version,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn new(method: Method, url: impl Into<String>, version: Version) -> Self {
        Self { method, url: url.into(), version, headers: Vec::new() }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as sent, e.g. `/index?a=1`.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// `"1.0"` or `"1.1"`.
    pub fn http_version(&self) -> &'static str {
        version_str(self.version)
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// First value of the field `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
    }

    fn has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, value)| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    /// HTTP/1.1 keeps the connection unless told to close; HTTP/1.0 only when asked to.
    pub fn should_keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.has_token("connection", "close"),
            _ => self.has_token("connection", "keep-alive"),
        }
    }

    /// `CONNECT`, or a `Connection: upgrade` request naming a protocol in `Upgrade`.
    pub fn is_upgrade(&self) -> bool {
        self.method == Method::CONNECT || (self.has_token("connection", "upgrade") && self.header("upgrade").is_some())
    }

    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11 && self.header("expect").is_some_and(|value| value.trim().eq_ignore_ascii_case("100-continue"))
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "1.0",
        _ => "1.1",
    }
}

impl TryFrom<&httparse::Request<'_, '_>> for RequestHead {
    type Error = ParseError;

    fn try_from(req: &httparse::Request<'_, '_>) -> Result<Self, Self::Error> {
        let method = req.method.ok_or(ParseError::InvalidMethod)?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
        let url = req.path.ok_or(ParseError::InvalidUri)?;
        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            // HTTP/2 and HTTP/3 are not spoken here
            _ => return Err(ParseError::InvalidVersion(req.version)),
        };

        let mut head = RequestHead::new(method, url, version);
        head.headers.reserve(req.headers.len());
        for header in req.headers.iter() {
            head.push_header(header.name, String::from_utf8_lossy(header.value));
        }
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(version: Version, headers: &[(&str, &str)]) -> RequestHead {
        let mut head = RequestHead::new(Method::GET, "/", version);
        for (name, value) in headers {
            head.push_header(*name, *value);
        }
        head
    }

    #[test]
    fn keep_alive_follows_version_and_connection() {
        assert!(head(Version::HTTP_11, &[]).should_keep_alive());
        assert!(!head(Version::HTTP_11, &[("Connection", "Close")]).should_keep_alive());
        assert!(!head(Version::HTTP_10, &[]).should_keep_alive());
        assert!(head(Version::HTTP_10, &[("connection", "Keep-Alive")]).should_keep_alive());
    }

    #[test]
    fn upgrade_needs_both_fields() {
        assert!(!head(Version::HTTP_11, &[("Upgrade", "websocket")]).is_upgrade());
        assert!(head(Version::HTTP_11, &[("Connection", "keep-alive, Upgrade"), ("Upgrade", "websocket")]).is_upgrade());

        let connect = RequestHead::new(Method::CONNECT, "example.com:443", Version::HTTP_11);
        assert!(connect.is_upgrade());
    }

    #[test]
    fn continue_only_for_http_11() {
        assert!(head(Version::HTTP_11, &[("Expect", "100-Continue")]).expects_continue());
        assert!(!head(Version::HTTP_10, &[("Expect", "100-continue")]).expects_continue());
        assert!(!head(Version::HTTP_11, &[]).expects_continue());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let head = head(Version::HTTP_11, &[("Host", "a"), ("HOST", "b")]);
        assert_eq!(head.header("host"), Some("a"));
        assert_eq!(head.header("accept"), None);
        assert_eq!(head.http_version(), "1.1");
    }
}
