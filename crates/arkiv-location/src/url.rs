//! The textual form `protocol://path[//payload[:subpath]]*`.
//!
//! Paths are percent-encoded with everything but unreserved characters and
//! `/` escaped, so an encoded path never contains `:` and a normalized one
//! never contains `//`. That is what keeps the separators unambiguous.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::{LocationError, Result};
use crate::location::{Location, Payload};
use crate::normalize::{normalize_abs, normalize_rel};

const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SCHEME_SEPARATOR: &str = "://";
pub(crate) const PAYLOAD_SEPARATOR: &str = "//";

pub(crate) fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

fn decode_path(input: &str, encoded: &str) -> Result<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| LocationError::parse(input, "path is not valid UTF-8 after decoding"))
}

pub(crate) fn is_valid_protocol(protocol: &str) -> bool {
    !protocol.is_empty()
        && protocol
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.' | b'_'))
}

pub(crate) fn parse(input: &str) -> Result<Location> {
    let (protocol, rest) = input
        .split_once(SCHEME_SEPARATOR)
        .ok_or_else(|| LocationError::parse(input, "missing '://'"))?;
    if !is_valid_protocol(protocol) {
        return Err(LocationError::parse(input, "invalid protocol"));
    }
    if !rest.starts_with('/') {
        return Err(LocationError::parse(input, "base path is not absolute"));
    }

    // The base path owns its leading '/', so the first payload separator is
    // searched for after it. This keeps `file:///` + `//archive` unambiguous.
    let (base, section) = match rest[1..].find(PAYLOAD_SEPARATOR) {
        Some(idx) => (&rest[..idx + 1], Some(&rest[idx + 1 + PAYLOAD_SEPARATOR.len()..])),
        None => (rest, None),
    };

    let base_path = normalize_abs(&decode_path(input, base)?);

    let mut payloads = Vec::new();
    if let Some(section) = section {
        for segment in section.split(PAYLOAD_SEPARATOR) {
            payloads.push(parse_payload(input, segment)?);
        }
    }

    Ok(Location::from_parts(protocol.to_string(), base_path, payloads))
}

fn parse_payload(input: &str, segment: &str) -> Result<Payload> {
    if segment.is_empty() {
        return Err(LocationError::parse(input, "empty payload"));
    }
    let (protocol, encoded) = segment.split_once(':').unwrap_or((segment, ""));
    if !is_valid_protocol(protocol) {
        return Err(LocationError::parse(input, "invalid payload protocol"));
    }
    let path = normalize_rel(&decode_path(input, encoded)?);
    Ok(Payload::from_parts(protocol.to_string(), path))
}

pub(crate) fn format(location: &Location) -> String {
    let mut url = format!(
        "{}{}{}",
        location.protocol(),
        SCHEME_SEPARATOR,
        encode_path(location.base_path())
    );
    for payload in location.payloads() {
        url.push_str(PAYLOAD_SEPARATOR);
        url.push_str(payload.protocol());
        if !payload.path().is_empty() {
            url.push(':');
            url.push_str(&encode_path(payload.path()));
        }
    }
    url
}
