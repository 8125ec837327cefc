//! HTTP/1.1 framing for web WHOIS probes.
//!
//! Requests are written with an explicit `Content-Length` when they carry a
//! body. Responses are read using `Content-Length`, chunked transfer
//! encoding, or read-until-close when neither is present.

use crate::error::ProberError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on an aggregated response (head plus body).
pub const MAX_RESPONSE_LEN: usize = 1024 * 1024;

const MAX_HEADERS: usize = 64;

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl HttpRequest {
    /// A `GET` request for `path` with the `Host` header set.
    pub fn get<H: AsRef<str>, P: Into<String>>(host: H, path: P) -> Result<Self, ProberError> {
        Self::new(Method::GET, path).with_host(host)
    }

    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        Self {
            method,
            path: normalize_path(path.into()),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Value of the `Host` header, if set.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
    }

    /// Set or replace the `Host` header.
    pub fn with_host<H: AsRef<str>>(self, host: H) -> Result<Self, ProberError> {
        self.with_header(header::HOST.as_str(), host.as_ref())
    }

    /// Set or replace an arbitrary header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ProberError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ProberError::internal(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            ProberError::internal(format!("Invalid value for header '{}': {}", name, e))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_path<P: Into<String>>(mut self, path: P) -> Self {
        self.path = normalize_path(path.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Drop the body and any headers describing it.
    pub fn without_body(mut self) -> Self {
        self.body = None;
        self.headers.remove(header::CONTENT_LENGTH);
        self.headers.remove(header::CONTENT_TYPE);
        self.headers.remove(header::TRANSFER_ENCODING);
        self
    }
}

fn normalize_path(path: String) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

/// A decoded HTTP response with its body fully aggregated.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The `Location` header, if present and valid UTF-8.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
    len: usize,
}

enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

/// Client-side HTTP/1.1 codec: encodes requests, decodes responses.
#[derive(Debug, Clone)]
pub struct HttpCodec {
    max_len: usize,
}

impl HttpCodec {
    pub fn new() -> Self {
        Self {
            max_len: MAX_RESPONSE_LEN,
        }
    }

    /// Codec with a custom aggregate size limit.
    pub fn with_max_len(max_len: usize) -> Self {
        Self { max_len }
    }

    fn check_len(&self, len: usize) -> Result<(), ProberError> {
        if len > self.max_len {
            return Err(ProberError::malformed(format!(
                "HTTP response exceeds {} bytes",
                self.max_len
            )));
        }
        Ok(())
    }
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for HttpCodec {
    type Item = HttpResponse;
    type Error = ProberError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let head = match parse_head(src)? {
                Some(head) => head,
                None => {
                    self.check_len(src.len())?;
                    return Ok(None);
                }
            };

            // Interim 1xx responses precede the real one.
            if head.status.is_informational() {
                src.advance(head.len);
                continue;
            }

            let complete = match framing(&head)? {
                BodyFraming::Empty => Some((head.len, Bytes::new())),
                BodyFraming::Length(n) => {
                    let total = head.len.saturating_add(n);
                    self.check_len(total)?;
                    if src.len() >= total {
                        Some((total, Bytes::copy_from_slice(&src[head.len..total])))
                    } else {
                        None
                    }
                }
                BodyFraming::Chunked => self
                    .decode_chunked(&src[head.len..])?
                    .map(|(consumed, body)| (head.len + consumed, body)),
                BodyFraming::UntilClose => None,
            };

            return match complete {
                Some((consumed, body)) => {
                    self.check_len(consumed)?;
                    src.advance(consumed);
                    Ok(Some(HttpResponse::new(head.status, head.headers, body)))
                }
                None => {
                    self.check_len(src.len())?;
                    Ok(None)
                }
            };
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(response) = self.decode(src)? {
            return Ok(Some(response));
        }
        if src.is_empty() {
            return Ok(None);
        }

        match parse_head(src)? {
            Some(head) if matches!(framing(&head)?, BodyFraming::UntilClose) => {
                let all = src.split_to(src.len());
                let body = Bytes::copy_from_slice(&all[head.len..]);
                Ok(Some(HttpResponse::new(head.status, head.headers, body)))
            }
            _ => Err(ProberError::connection_closed(
                "peer closed the connection in the middle of an HTTP response",
            )),
        }
    }
}

impl Encoder<HttpRequest> for HttpCodec {
    type Error = ProberError;

    fn encode(&mut self, item: HttpRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(item.method.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(item.path.as_bytes());
        dst.put_slice(b" HTTP/1.1\r\n");

        for (name, value) in item.headers.iter() {
            if name == header::CONTENT_LENGTH {
                continue;
            }
            dst.put_slice(name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }

        if let Some(body) = &item.body {
            dst.put_slice(format!("content-length: {}\r\n\r\n", body.len()).as_bytes());
            dst.put_slice(body);
        } else {
            dst.put_slice(b"\r\n");
        }

        Ok(())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_head(src: &[u8]) -> Result<Option<ResponseHead>, ProberError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut raw_headers);

    let len = match response.parse(src) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => {
            let line = src.split(|b| *b == b'\n').next().unwrap_or_default();
            return Err(ProberError::malformed_with_content(
                format!("Invalid HTTP response head: {}", e),
                String::from_utf8_lossy(line).trim_end(),
            ));
        }
    };

    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| ProberError::malformed("Invalid HTTP status code"))?;

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for raw in response.headers.iter() {
        let name = HeaderName::from_bytes(raw.name.as_bytes()).map_err(|_| {
            ProberError::malformed_with_content("Invalid HTTP header name", raw.name)
        })?;
        let value = HeaderValue::from_bytes(raw.value).map_err(|_| {
            ProberError::malformed_with_content("Invalid HTTP header value", raw.name)
        })?;
        headers.append(name, value);
    }

    Ok(Some(ResponseHead {
        status,
        headers,
        len,
    }))
}

fn framing(head: &ResponseHead) -> Result<BodyFraming, ProberError> {
    if head.status == StatusCode::NO_CONTENT || head.status == StatusCode::NOT_MODIFIED {
        return Ok(BodyFraming::Empty);
    }

    let chunked = head
        .headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .any(|value| value.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Ok(BodyFraming::Chunked);
    }

    match head.headers.get(header::CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map(BodyFraming::Length)
            .ok_or_else(|| ProberError::malformed("Invalid Content-Length header")),
        None => Ok(BodyFraming::UntilClose),
    }
}

impl HttpCodec {
    /// Decode a complete chunked body, returning bytes consumed and the payload.
    fn decode_chunked(&self, src: &[u8]) -> Result<Option<(usize, Bytes)>, ProberError> {
        let mut pos = 0;
        let mut body = BytesMut::new();

        loop {
            let (line_len, size) = match httparse::parse_chunk_size(&src[pos..]) {
                Ok(httparse::Status::Complete(parsed)) => parsed,
                Ok(httparse::Status::Partial) => return Ok(None),
                Err(_) => return Err(ProberError::malformed("Invalid chunk size line")),
            };
            let size = usize::try_from(size)
                .ok()
                .filter(|size| *size <= self.max_len)
                .ok_or_else(|| {
                    ProberError::malformed(format!(
                        "HTTP chunk of {} bytes exceeds {} bytes",
                        size, self.max_len
                    ))
                })?;
            pos += line_len;

            if size == 0 {
                // Trailer section ends with an empty line.
                loop {
                    let trailer_len = match find(&src[pos..], b"\r\n") {
                        Some(len) => len,
                        None => return Ok(None),
                    };
                    pos += trailer_len + 2;
                    if trailer_len == 0 {
                        return Ok(Some((pos, body.freeze())));
                    }
                }
            }

            let end = pos
                .checked_add(size)
                .ok_or_else(|| ProberError::malformed("HTTP chunk overflows the buffer"))?;
            if src.len() < end + 2 {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(ProberError::malformed("Chunk is not terminated by CRLF"));
            }
            body.extend_from_slice(&src[pos..end]);
            self.check_len(body.len())?;
            pos = end + 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Option<HttpResponse>, ProberError> {
        let mut codec = HttpCodec::new();
        let mut buf = BytesMut::from(input);
        codec.decode(&mut buf)
    }

    #[test]
    fn test_encode_get_request() {
        let request = HttpRequest::get("whois.nic.example", "/").unwrap();
        let mut dst = BytesMut::new();
        HttpCodec::new().encode(request, &mut dst).unwrap();
        assert_eq!(
            &dst[..],
            b"GET / HTTP/1.1\r\nhost: whois.nic.example\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_request_with_body() {
        let request = HttpRequest::new(Method::POST, "submit")
            .with_host("h.example")
            .unwrap()
            .with_body("abc");
        assert_eq!(request.path(), "/submit");

        let mut dst = BytesMut::new();
        HttpCodec::new().encode(request, &mut dst).unwrap();
        let text = String::from_utf8(dst.to_vec()).unwrap();
        assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(text.ends_with("content-length: 3\r\n\r\nabc"));
    }

    #[test]
    fn test_decode_content_length() {
        let response = decode_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body()[..], b"hello");
    }

    #[test]
    fn test_decode_waits_for_full_body() {
        let mut codec = HttpCodec::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhel"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo");
        let response = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&response.body()[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_redirect_location() {
        let response = decode_all(
            b"HTTP/1.1 301 Moved Permanently\r\nLocation: https://whois.nic.example/\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.location(), Some("https://whois.nic.example/"));
    }

    #[test]
    fn test_decode_chunked() {
        let response = decode_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(&response.body()[..], b"hello world");
    }

    #[test]
    fn test_decode_until_close() {
        let mut codec = HttpCodec::new();
        let mut buf = BytesMut::from(&b"HTTP/1.0 200 OK\r\nServer: test\r\n\r\npartial body"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let response = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(&response.body()[..], b"partial body");
    }

    #[test]
    fn test_truncated_response_at_eof_is_connection_closed() {
        let mut codec = HttpCodec::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc"[..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, ProberError::ConnectionClosed { .. }));
    }

    #[test]
    fn test_skips_informational_response() {
        let response = decode_all(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_rejects_oversized_and_malformed() {
        let mut codec = HttpCodec::with_max_len(64);
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n"[..],
        );
        assert!(codec.decode(&mut buf).unwrap_err().is_validation());

        assert!(decode_all(b"SMTP 220 hi\r\n\r\n").unwrap_err().is_validation());
        assert!(decode_all(b"HTTP/1.1 abc OK\r\n\r\n").unwrap_err().is_validation());
    }

    #[test]
    fn test_rejects_oversized_chunk_size() {
        let err = decode_all(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab",
        )
        .unwrap_err();
        assert!(matches!(err, ProberError::Malformed { .. }));

        let mut codec = HttpCodec::with_max_len(16);
        let mut buf = BytesMut::from(
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n11\r\n"[..],
        );
        assert!(codec.decode(&mut buf).unwrap_err().is_validation());
    }

    #[test]
    fn test_rejects_huge_content_length() {
        let err = decode_all(
            b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, ProberError::Malformed { .. }));
    }

    #[test]
    fn test_partial_head_waits_and_leaves_next_response() {
        let mut codec = HttpCodec::new();
        let mut buf = BytesMut::from(&b"HTTP/1.1 200 OK\r\nContent-Le"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ngth: 2\r\n\r\nokHTTP/1.1 204 No Content\r\n\r\n");
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.body()[..], b"ok");
        assert_eq!(&buf[..], b"HTTP/1.1 204 No Content\r\n\r\n");

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.status(), StatusCode::NO_CONTENT);
        assert!(buf.is_empty());
    }
}
