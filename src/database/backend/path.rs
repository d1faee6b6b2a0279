use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use super::{SdkException, SdkResult};

const MAX_KEY_BYTES: usize = 768;

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// An absolute address split into the database origin and the node path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ParsedUrl {
    pub(crate) origin: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) path: Vec<String>,
}

pub(crate) fn validate_key(key: &str) -> SdkResult<()> {
    if key.is_empty() {
        return Err(SdkException::new("Key cannot be empty"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(SdkException::new(format!(
            "Key is longer than {MAX_KEY_BYTES} bytes"
        )));
    }
    if let Some(bad) = key
        .chars()
        .find(|ch| matches!(ch, '.' | '#' | '$' | '[' | ']' | '/') || ch.is_control())
    {
        return Err(SdkException::new(format!(
            "Key \"{key}\" contains an invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Splits a relative slash-separated path, validating every segment.
pub(crate) fn parse_path(path: &str) -> SdkResult<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(SdkException::new(format!(
                "Path \"{path}\" contains an empty segment"
            )));
        }
        validate_key(segment)?;
        segments.push(segment.to_string());
    }
    Ok(segments)
}

pub(crate) fn parse_url(raw: &str) -> SdkResult<ParsedUrl> {
    let url = Url::parse(raw)
        .map_err(|err| SdkException::new(format!("Invalid database URL '{raw}': {err}")))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SdkException::new(format!("Database URL '{raw}' has no host")))?;

    let origin = match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };

    let mut path = Vec::new();
    for encoded in url.path().split('/').filter(|segment| !segment.is_empty()) {
        let decoded = percent_decode_str(encoded)
            .decode_utf8()
            .map_err(|err| SdkException::new(format!("Invalid path encoding: {err}")))?;
        validate_key(&decoded)?;
        path.push(decoded.into_owned());
    }

    let query = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    Ok(ParsedUrl {
        origin,
        query,
        path,
    })
}

/// Renders `origin` plus the percent-encoded path; the root keeps its trailing slash.
pub(crate) fn render_url(origin: &str, path: &[String]) -> String {
    let mut url = String::from(origin);
    url.push('/');
    let encoded: Vec<String> = path
        .iter()
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect();
    url.push_str(&encoded.join("/"));
    url
}

pub(crate) fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len()
        && prefix
            .iter()
            .zip(path.iter())
            .all(|(left, right)| left == right)
}

pub(crate) fn paths_related(a: &[String], b: &[String]) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}
