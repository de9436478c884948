//! Extraction of routing keys from the first bytes a client sends.
//!
//! Two keys are supported: the `server_name` extension of a TLS ClientHello and
//! the `Host` header of a plaintext HTTP/1.x request.
use std::io::Cursor;

use bytes::Buf;
use thiserror::Error;

/// Largest prelude buffered before giving up on finding a routing key.
pub const MAX_PRELUDE_LEN: usize = 16 * 1024 + 5;

const TLS_HANDSHAKE: u8 = 22;
const TLS_CLIENT_HELLO: u8 = 1;
const EXT_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreludeError {
    #[error("not a TLS handshake")]
    NotTls,

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("not a ClientHello: handshake_type = {0}")]
    NotClientHello(u8),

    #[error("no server_name extension")]
    NoServerName,

    #[error("server name is not valid UTF-8")]
    InvalidUtf8,

    #[error("not an HTTP/1.x request")]
    NotHttp,

    #[error("request has no Host header")]
    NoHostHeader,
}

/// Whether `data` holds enough bytes to decide every supported rule kind.
///
/// A TLS record is complete once its announced length has arrived; an HTTP request
/// once the header block terminator has been seen.
pub fn prelude_complete(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    if data[0] == TLS_HANDSHAKE {
        if data.len() < 5 {
            return false;
        }
        let record_len = u16::from_be_bytes([data[3], data[4]]) as usize;
        return data.len() >= 5 + record_len;
    }
    find_header_end(data).is_some()
}

/// Extract the SNI hostname from a TLS ClientHello message.
pub fn extract_sni(data: &[u8]) -> Result<String, PreludeError> {
    if data.len() < 5 {
        return Err(PreludeError::Truncated("TLS record header"));
    }

    let mut cursor = Cursor::new(data);
    let content_type = cursor.get_u8();
    let version_major = cursor.get_u8();
    let _version_minor = cursor.get_u8();
    let record_len = cursor.get_u16() as usize;

    if content_type != TLS_HANDSHAKE || version_major != 3 {
        return Err(PreludeError::NotTls);
    }
    if cursor.remaining() < record_len {
        return Err(PreludeError::Truncated("TLS record"));
    }

    ensure(&cursor, 4, "handshake header")?;
    let handshake_type = cursor.get_u8();
    let handshake_len = cursor.get_uint(3) as usize;
    if handshake_type != TLS_CLIENT_HELLO {
        return Err(PreludeError::NotClientHello(handshake_type));
    }
    ensure(&cursor, handshake_len, "ClientHello")?;

    // client version + random
    skip(&mut cursor, 2 + 32, "ClientHello random")?;

    ensure(&cursor, 1, "session id")?;
    let session_id_len = cursor.get_u8() as usize;
    skip(&mut cursor, session_id_len, "session id")?;

    ensure(&cursor, 2, "cipher suites")?;
    let cipher_suites_len = cursor.get_u16() as usize;
    skip(&mut cursor, cipher_suites_len, "cipher suites")?;

    ensure(&cursor, 1, "compression methods")?;
    let compression_len = cursor.get_u8() as usize;
    skip(&mut cursor, compression_len, "compression methods")?;

    if cursor.remaining() < 2 {
        return Err(PreludeError::NoServerName);
    }
    let extensions_len = cursor.get_u16() as usize;
    ensure(&cursor, extensions_len, "extensions")?;
    let extensions_end = cursor.position() + extensions_len as u64;

    while cursor.position() + 4 <= extensions_end {
        let extension_type = cursor.get_u16();
        let extension_len = cursor.get_u16() as usize;
        ensure(&cursor, extension_len, "extension")?;

        if extension_type == EXT_SERVER_NAME {
            return parse_server_name(&mut cursor, extension_len);
        }
        cursor.advance(extension_len);
    }

    Err(PreludeError::NoServerName)
}

fn parse_server_name(cursor: &mut Cursor<&[u8]>, extension_len: usize) -> Result<String, PreludeError> {
    let end = cursor.position() + extension_len as u64;

    ensure(cursor, 2, "server name list")?;
    let _list_len = cursor.get_u16();

    while cursor.position() + 3 <= end {
        let name_type = cursor.get_u8();
        let name_len = cursor.get_u16() as usize;
        ensure(cursor, name_len, "server name")?;

        if name_type == NAME_TYPE_HOST {
            let mut name = vec![0u8; name_len];
            cursor.copy_to_slice(&mut name);
            let name = String::from_utf8(name).map_err(|_| PreludeError::InvalidUtf8)?;
            if name.is_empty() {
                return Err(PreludeError::NoServerName);
            }
            return Ok(name);
        }
        cursor.advance(name_len);
    }

    Err(PreludeError::NoServerName)
}

fn ensure(cursor: &Cursor<&[u8]>, len: usize, what: &'static str) -> Result<(), PreludeError> {
    if cursor.remaining() < len {
        Err(PreludeError::Truncated(what))
    } else {
        Ok(())
    }
}

fn skip(cursor: &mut Cursor<&[u8]>, len: usize, what: &'static str) -> Result<(), PreludeError> {
    ensure(cursor, len, what)?;
    cursor.advance(len);
    Ok(())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Extract the `Host` header value from an HTTP/1.x request head.
pub fn extract_http_host(data: &[u8]) -> Result<String, PreludeError> {
    let head_len = find_header_end(data).ok_or(PreludeError::Truncated("HTTP request head"))?;
    let head = std::str::from_utf8(&data[..head_len]).map_err(|_| PreludeError::NotHttp)?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(PreludeError::NotHttp)?;
    let mut parts = request_line.split(' ');
    let (Some(method), Some(_target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(PreludeError::NotHttp);
    };
    if method.is_empty() || !version.starts_with("HTTP/1.") {
        return Err(PreludeError::NotHttp);
    }

    lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(PreludeError::NoHostHeader)
}

/// Compare a `Host` header value with a configured host, ignoring case and any port.
pub fn host_matches(expected: &str, header: &str) -> bool {
    header.eq_ignore_ascii_case(expected) || strip_port(header).eq_ignore_ascii_case(expected)
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
