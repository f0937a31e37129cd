use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::{
    error::HandshakeError,
    http::{Header, HeaderExt, Request, Response},
};

const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generates a `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_sec_key() -> String {
    let mut key = [0u8; 16];

    rand::rng().fill_bytes(&mut key);

    general_purpose::STANDARD.encode(key)
}

/// Derives the `Sec-WebSocket-Accept` value for `sec_key`.
pub fn derive_accept(sec_key: &[u8]) -> String {
    let mut sha1 = Sha1::new();

    sha1.update(sec_key);
    sha1.update(ACCEPT_GUID);

    general_purpose::STANDARD.encode(sha1.finalize())
}

/// Builds the client upgrade request for `uri`.
///
/// Returns the request and the key it carries.
pub fn client_request(
    uri: &str,
    additional_headers: &[Header],
) -> Result<(Request, String), HandshakeError> {
    let uri: ::http::Uri = uri.parse().map_err(|_| HandshakeError::InvalidUri)?;

    if !matches!(uri.scheme_str(), None | Some("ws" | "wss" | "http" | "https")) {
        return Err(HandshakeError::InvalidUri);
    }

    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");

    let sec_key = generate_sec_key();

    let mut headers = vec![
        Header::new("Connection", "Upgrade"),
        Header::new("Upgrade", "websocket"),
        Header::new("Sec-WebSocket-Key", sec_key.as_str()),
        Header::new("Sec-WebSocket-Version", "13"),
    ];

    if let Some(authority) = uri.authority() {
        headers.push(Header::new("Host", authority.as_str()));
    }

    headers.extend_from_slice(additional_headers);

    Ok((Request::get(path, headers), sec_key))
}

/// Checks the server's answer to a request that carried `sec_key`.
pub fn validate_response(response: &Response, sec_key: &str) -> Result<(), HandshakeError> {
    if response.code() != Some(101) {
        return Err(HandshakeError::InvalidStatusCode {
            code: response.code(),
        });
    }

    if !response
        .header_value_str("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    {
        return Err(HandshakeError::MissingOrInvalidUpgrade);
    }

    if !response.header_contains_token("connection", "upgrade") {
        return Err(HandshakeError::MissingOrInvalidConnection);
    }

    let expected = derive_accept(sec_key.as_bytes());

    if response
        .header_value("sec-websocket-accept")
        .is_none_or(|v| v != expected.as_bytes())
    {
        return Err(HandshakeError::MissingOrInvalidAccept);
    }

    Ok(())
}

/// Checks a client's upgrade request and builds the `101` answer.
pub fn server_response(
    request: &Request,
    additional_headers: &[Header],
) -> Result<Response, HandshakeError> {
    if request.method() != "GET" {
        return Err(HandshakeError::WrongHttpMethod);
    }

    if request.version() < 1 {
        return Err(HandshakeError::WrongHttpVersion);
    }

    if !request
        .header_value_str("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
    {
        return Err(HandshakeError::MissingOrInvalidUpgrade);
    }

    if !request.header_contains_token("connection", "upgrade") {
        return Err(HandshakeError::MissingOrInvalidConnection);
    }

    if !request
        .header_value_str("sec-websocket-version")
        .is_some_and(|v| v.trim() == "13")
    {
        return Err(HandshakeError::MissingOrInvalidSecVersion);
    }

    let sec_key = request
        .header_value("sec-websocket-key")
        .ok_or(HandshakeError::MissingSecKey)?;

    let mut headers = vec![
        Header::new("Upgrade", "websocket"),
        Header::new("Connection", "Upgrade"),
        Header::new("Sec-WebSocket-Accept", derive_accept(sec_key)),
    ];

    headers.extend_from_slice(additional_headers);

    Ok(Response::switching_protocols(headers))
}
