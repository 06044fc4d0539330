//! Content negotiation for the index endpoints: HTML versus JSON, picked
//! from the `Accept` header or a `format` query argument, and response
//! compression picked from `Accept-Encoding`.

use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::Write;

pub const JSON_V1: &str = "application/vnd.pypi.simple.v1+json";
pub const JSON_LATEST: &str = "application/vnd.pypi.simple.latest+json";
pub const HTML_V1: &str = "application/vnd.pypi.simple.v1+html";
pub const HTML_LATEST: &str = "application/vnd.pypi.simple.latest+html";
pub const TEXT_HTML: &str = "text/html";

/// The client's acceptable response forms admit neither HTML nor JSON (or no
/// acceptable transfer encoding exists).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not acceptable")]
pub struct NotAcceptable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Html,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
}

impl Encoding {
    /// `Content-Encoding` header value, or `None` for identity.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Encoding::Identity => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
        }
    }
}

/// Parse an Accept-style header into lowercased (value, quality) pairs.
/// Malformed quality parameters fall back to 1.
fn parse_qualities(header: &str) -> Vec<(String, f64)> {
    header
        .split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let value = parts.next()?.trim().to_ascii_lowercase();
            if value.is_empty() {
                return None;
            }
            let mut quality = 1.0;
            for parameter in parts {
                if let Some(raw) = parameter.trim().strip_prefix("q=")
                    && let Ok(parsed) = raw.trim().parse::<f64>()
                {
                    quality = parsed.clamp(0.0, 1.0);
                }
            }
            Some((value, quality))
        })
        .collect()
}

/// Quality of `media_type` under the parsed header: exact match, then
/// `type/*`, then `*/*`, else zero.
fn media_type_quality(entries: &[(String, f64)], media_type: &str) -> f64 {
    let exact = entries
        .iter()
        .find(|(value, _)| value == media_type)
        .map(|(_, quality)| *quality);
    if let Some(quality) = exact {
        return quality;
    }
    let type_prefix = media_type.split('/').next().unwrap_or("");
    let partial_wildcard = format!("{type_prefix}/*");
    for wildcard in [partial_wildcard.as_str(), "*/*"] {
        if let Some((_, quality)) = entries.iter().find(|(value, _)| value == wildcard) {
            return *quality;
        }
    }
    0.0
}

/// Decide between the JSON and HTML forms of a v1 index response.
///
/// JSON wins when the `format` argument names it outright, or when its
/// quality is at least every HTML variant's and strictly above `text/html`'s
/// (so a bare `*/*` stays HTML). A `latest` JSON entry satisfies a v1
/// request. Neither form acceptable is a 406.
pub fn negotiate_content(
    accept: Option<&str>,
    format: Option<&str>,
) -> Result<ContentKind, NotAcceptable> {
    if let Some(format) = format
        && (format == JSON_V1 || format == JSON_LATEST)
    {
        return Ok(ContentKind::Json);
    }

    let entries = parse_qualities(accept.unwrap_or("*/*"));
    let json_quality = media_type_quality(&entries, JSON_V1)
        .max(media_type_quality(&entries, JSON_LATEST));
    let text_html_quality = media_type_quality(&entries, TEXT_HTML);
    let html_quality = text_html_quality
        .max(media_type_quality(&entries, HTML_V1))
        .max(media_type_quality(&entries, HTML_LATEST));

    if json_quality > 0.0 && json_quality >= html_quality && json_quality > text_html_quality {
        Ok(ContentKind::Json)
    } else if html_quality > 0.0 {
        Ok(ContentKind::Html)
    } else {
        Err(NotAcceptable)
    }
}

fn encoding_quality(entries: &[(String, f64)], name: &str) -> f64 {
    if let Some((_, quality)) = entries.iter().find(|(value, _)| value == name) {
        return *quality;
    }
    if let Some((_, quality)) = entries.iter().find(|(value, _)| value == "*") {
        return *quality;
    }
    // Identity is acceptable unless ruled out explicitly.
    if name == "identity" { 1.0 } else { 0.0 }
}

/// Decide the transfer encoding: gzip when its quality dominates both
/// identity and deflate, else deflate on the analogous rule, else identity.
/// A client that rejects identity with no compressed winner gets a 406.
pub fn negotiate_encoding(accept_encoding: Option<&str>) -> Result<Encoding, NotAcceptable> {
    let entries = parse_qualities(accept_encoding.unwrap_or(""));
    let gzip = encoding_quality(&entries, "gzip");
    let deflate = encoding_quality(&entries, "deflate");
    let identity = encoding_quality(&entries, "identity");

    if gzip > 0.0 && gzip >= identity && gzip >= deflate {
        Ok(Encoding::Gzip)
    } else if deflate > 0.0 && deflate >= identity {
        Ok(Encoding::Deflate)
    } else if identity > 0.0 {
        Ok(Encoding::Identity)
    } else {
        Err(NotAcceptable)
    }
}

/// Apply the negotiated encoding to a response body.
pub fn compress(body: &[u8], encoding: Encoding) -> std::io::Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(body.to_vec()),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()
        }
        Encoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()
        }
    }
}
