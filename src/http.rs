//! Minimal HTTP/1.1 heads for the opening handshake.

use framez::{decode::Decoder, encode::Encoder};

use crate::error::EncodeError;

/// An HTTP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// The header name.
    pub name: String,
    /// The raw header value.
    pub value: Vec<u8>,
}

impl Header {
    /// Creates a new [`Header`].
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Header lookups shared by requests and responses.
pub trait HeaderExt {
    /// The headers in wire order.
    fn headers(&self) -> &[Header];

    /// Returns the value of the first header named `name`, ignoring case.
    fn header_value(&self, name: &str) -> Option<&[u8]> {
        self.headers()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    /// Like [`HeaderExt::header_value`], if the value is UTF-8.
    fn header_value_str(&self, name: &str) -> Option<&str> {
        self.header_value(name)
            .and_then(|v| core::str::from_utf8(v).ok())
    }

    /// Returns `true` if the comma separated header `name` contains `token`, ignoring case.
    fn header_contains_token(&self, name: &str, token: &str) -> bool {
        self.header_value_str(name).is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// An HTTP request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    path: String,
    version: u8,
    headers: Vec<Header>,
}

impl Request {
    /// Creates an HTTP/1.1 `GET` request.
    pub fn get(path: impl Into<String>, headers: Vec<Header>) -> Self {
        Self {
            method: String::from("GET"),
            path: path.into(),
            version: 1,
            headers,
        }
    }

    /// The request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The minor HTTP version.
    pub const fn version(&self) -> u8 {
        self.version
    }
}

impl HeaderExt for Request {
    fn headers(&self) -> &[Header] {
        &self.headers
    }
}

/// An HTTP response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: Option<u16>,
    reason: String,
    headers: Vec<Header>,
}

impl Response {
    /// Creates a `101 Switching Protocols` response.
    pub fn switching_protocols(headers: Vec<Header>) -> Self {
        Self {
            code: Some(101),
            reason: String::from("Switching Protocols"),
            headers,
        }
    }

    /// The status code.
    pub const fn code(&self) -> Option<u16> {
        self.code
    }
}

impl HeaderExt for Response {
    fn headers(&self) -> &[Header] {
        &self.headers
    }
}

fn own_headers(headers: &[httparse::Header<'_>]) -> Vec<Header> {
    headers
        .iter()
        .map(|h| Header::new(h.name, h.value))
        .collect()
}

/// Writes a head into a fixed buffer.
struct HeadWriter<'a> {
    dst: &'a mut [u8],
    pos: usize,
}

impl<'a> HeadWriter<'a> {
    fn new(dst: &'a mut [u8]) -> Self {
        Self { dst, pos: 0 }
    }

    fn put(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        let end = self.pos + data.len();

        if end > self.dst.len() {
            return Err(EncodeError::BufferTooSmall);
        }

        self.dst[self.pos..end].copy_from_slice(data);
        self.pos = end;

        Ok(())
    }

    /// Writes the headers and the empty line closing the head.
    fn finish(mut self, headers: &[Header]) -> Result<usize, EncodeError> {
        for header in headers {
            self.put(header.name.as_bytes())?;
            self.put(b": ")?;
            self.put(&header.value)?;
            self.put(b"\r\n")?;
        }

        self.put(b"\r\n")?;

        Ok(self.pos)
    }
}

/// Reads or writes a [`Request`] head.
#[derive(Debug)]
pub(crate) struct RequestCodec {
    max_headers: usize,
}

impl RequestCodec {
    pub(crate) const fn new(max_headers: usize) -> Self {
        RequestCodec { max_headers }
    }
}

impl framez::decode::DecodeError for RequestCodec {
    type Error = httparse::Error;
}

impl<'buf> Decoder<'buf> for RequestCodec {
    type Item = Request;

    fn decode(&mut self, src: &'buf mut [u8]) -> Result<Option<(Self::Item, usize)>, Self::Error> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut request = httparse::Request::new(&mut headers);

        let len = match request.parse(src)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };

        let item = Request {
            method: request.method.unwrap_or_default().to_owned(),
            path: request.path.unwrap_or_default().to_owned(),
            version: request.version.unwrap_or_default(),
            headers: own_headers(request.headers),
        };

        Ok(Some((item, len)))
    }
}

impl Encoder<&Request> for RequestCodec {
    type Error = EncodeError;

    fn encode(&mut self, item: &Request, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let mut head = HeadWriter::new(dst);

        head.put(item.method.as_bytes())?;
        head.put(b" ")?;
        head.put(item.path.as_bytes())?;
        head.put(b" HTTP/1.1\r\n")?;

        head.finish(&item.headers)
    }
}

/// Reads or writes a [`Response`] head.
#[derive(Debug)]
pub(crate) struct ResponseCodec {
    max_headers: usize,
}

impl ResponseCodec {
    pub(crate) const fn new(max_headers: usize) -> Self {
        ResponseCodec { max_headers }
    }
}

impl framez::decode::DecodeError for ResponseCodec {
    type Error = httparse::Error;
}

impl<'buf> Decoder<'buf> for ResponseCodec {
    type Item = Response;

    fn decode(&mut self, src: &'buf mut [u8]) -> Result<Option<(Self::Item, usize)>, Self::Error> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut response = httparse::Response::new(&mut headers);

        let len = match response.parse(src)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Ok(None),
        };

        let item = Response {
            code: response.code,
            reason: response.reason.unwrap_or_default().to_owned(),
            headers: own_headers(response.headers),
        };

        Ok(Some((item, len)))
    }
}

impl Encoder<&Response> for ResponseCodec {
    type Error = EncodeError;

    fn encode(&mut self, item: &Response, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let mut head = HeadWriter::new(dst);

        head.put(b"HTTP/1.1 ")?;
        head.put(item.code.unwrap_or(500).to_string().as_bytes())?;
        head.put(b" ")?;
        head.put(item.reason.as_bytes())?;
        head.put(b"\r\n")?;

        head.finish(&item.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_request(request: &Request) -> Vec<u8> {
        let mut dst = [0u8; 256];
        let len = RequestCodec::new(16).encode(request, &mut dst).unwrap();

        dst[..len].to_vec()
    }

    #[test]
    fn request_wire_format() {
        let request = Request::get(
            "/chat",
            vec![
                Header::new("Connection", "Upgrade"),
                Header::new("Upgrade", "websocket"),
            ],
        );

        let mut wire = encode_request(&request);

        assert_eq!(
            &wire[..],
            b"GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n"
        );

        let (decoded, len) = RequestCodec::new(16).decode(&mut wire).unwrap().unwrap();

        assert_eq!(decoded, request);
        assert_eq!(len, wire.len());
    }

    #[test]
    fn request_buffer_too_small() {
        let request = Request::get("/chat", vec![Header::new("Upgrade", "websocket")]);
        let mut dst = [0u8; 24];

        assert_eq!(
            RequestCodec::new(16).encode(&request, &mut dst),
            Err(EncodeError::BufferTooSmall)
        );
    }

    #[test]
    fn response_leaves_trailing_bytes() {
        let mut src =
            *b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x81\x02hi";

        let (response, len) = ResponseCodec::new(16).decode(&mut src).unwrap().unwrap();

        assert_eq!(response.code(), Some(101));
        assert_eq!(response.header_value_str("upgrade"), Some("websocket"));
        assert_eq!(&src[len..], b"\x81\x02hi");
    }

    #[test]
    fn partial_response() {
        let mut src = *b"HTTP/1.1 101 Switching Protocols\r\nUpgr";

        assert!(ResponseCodec::new(16).decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn too_many_headers() {
        let mut src = *b"HTTP/1.1 101 OK\r\nA: 1\r\nB: 2\r\n\r\n";

        assert!(matches!(
            ResponseCodec::new(1).decode(&mut src),
            Err(httparse::Error::TooManyHeaders)
        ));
    }

    #[test]
    fn token_lists() {
        let response = Response::switching_protocols(vec![Header::new(
            "Connection",
            "keep-alive, Upgrade",
        )]);

        assert!(response.header_contains_token("connection", "upgrade"));
        assert!(!response.header_contains_token("connection", "close"));
        assert!(!response.header_contains_token("upgrade", "websocket"));
    }
}
