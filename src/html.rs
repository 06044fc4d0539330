//! Streaming anchor extraction for the HTML form of the Simple API.
//!
//! Index listings can run to tens of megabytes, so the response body is never
//! buffered whole: chunks are pushed through [`AnchorScanner`], which yields
//! each `<a>` element as soon as its closing tag arrives and retains only the
//! unconsumed tail between pushes.

use indexmap::IndexMap;

/// Upper bound on retained unparsed input. An anchor that has not completed
/// within this window is dropped as malformed.
const MAX_PENDING: usize = 64 * 1024;

/// A raw `<a>` element: its text content and all attributes (`href`
/// included), entity-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub text: String,
    pub attributes: IndexMap<String, String>,
}

impl Anchor {
    /// The `href` attribute, with the remaining attributes as a second map.
    pub fn into_href_and_attributes(mut self) -> Option<(String, IndexMap<String, String>)> {
        let href = self.attributes.shift_remove("href")?;
        Some((href, self.attributes))
    }
}

#[derive(Debug, Default)]
pub struct AnchorScanner {
    buf: Vec<u8>,
}

impl AnchorScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of the document, returning every anchor completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Anchor> {
        self.buf.extend_from_slice(chunk);
        let mut anchors = Vec::new();
        loop {
            let text = valid_prefix(&self.buf);
            let Some(open_start) = find_anchor_open(text) else {
                let keep_from = text.rfind('<').unwrap_or(text.len());
                self.buf.drain(..keep_from);
                // Malformed input (say, undecodable bytes) must not pin the
                // buffer open forever.
                if self.buf.len() > MAX_PENDING {
                    let excess = self.buf.len() - MAX_PENDING;
                    self.buf.drain(..excess);
                }
                break;
            };
            let Some(parsed) = parse_anchor_at(text, open_start) else {
                if self.buf.len() > MAX_PENDING {
                    self.buf.drain(..open_start + 1);
                    continue;
                }
                self.buf.drain(..open_start);
                break;
            };
            let (anchor, consumed) = parsed;
            anchors.push(anchor);
            self.buf.drain(..consumed);
        }
        anchors
    }
}

/// Parse a complete standalone document. Test and convenience path; the
/// request path pushes response chunks instead.
pub fn parse_document(text: &str) -> Vec<Anchor> {
    AnchorScanner::new().push(text.as_bytes())
}

fn valid_prefix(buf: &[u8]) -> &str {
    match std::str::from_utf8(buf) {
        Ok(text) => text,
        // A multi-byte character split across chunks stays in the buffer.
        Err(err) => std::str::from_utf8(&buf[..err.valid_up_to()]).unwrap_or(""),
    }
}

/// Byte offset of the next `<a`/`<A` tag open, if any.
fn find_anchor_open(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(offset) = text[i..].find('<') {
        let at = i + offset;
        if bytes.len() > at + 2
            && bytes[at + 1].eq_ignore_ascii_case(&b'a')
            && (bytes[at + 2].is_ascii_whitespace() || bytes[at + 2] == b'>')
        {
            return Some(at);
        }
        if bytes.len() <= at + 2 {
            // Possibly a split `<a`; wait for more input.
            return None;
        }
        i = at + 1;
    }
    None
}

/// Parse the anchor starting at `open_start`. Returns the anchor and the byte
/// offset one past its closing tag, or `None` if the element is incomplete.
fn parse_anchor_at(text: &str, open_start: usize) -> Option<(Anchor, usize)> {
    let open_end = find_tag_end(text, open_start)?;
    let attributes = parse_attributes(&text[open_start + 2..open_end]);
    let (text_end, close_end) = find_anchor_close(text, open_end + 1)?;
    let content = html_escape::decode_html_entities(&text[open_end + 1..text_end]).into_owned();
    Some((
        Anchor {
            text: content,
            attributes,
        },
        close_end,
    ))
}

/// Offset of the `>` closing the tag opened at `start`, quote-aware.
fn find_tag_end(text: &str, start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, byte) in text.as_bytes().iter().enumerate().skip(start) {
        match quote {
            Some(open) => {
                if *byte == open {
                    quote = None;
                }
            }
            None => match byte {
                b'"' | b'\'' => quote = Some(*byte),
                b'>' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

/// Locate `</a ... >` at or after `from`: (text end, one past tag end).
fn find_anchor_close(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = from;
    while let Some(offset) = text[i..].find("</") {
        let at = i + offset;
        if bytes.len() > at + 2 && bytes[at + 2].eq_ignore_ascii_case(&b'a') {
            let mut j = at + 3;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'>' {
                return Some((at, j + 1));
            }
            if j >= bytes.len() {
                return None;
            }
        }
        if bytes.len() <= at + 2 {
            return None;
        }
        i = at + 2;
    }
    None
}

/// Parse `name`, `name=value`, `name="value"` pairs. Names are lowercased,
/// values entity-decoded; a value-less attribute maps to the empty string.
fn parse_attributes(raw: &str) -> IndexMap<String, String> {
    let mut attributes = IndexMap::new();
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && bytes[i] != b'='
            && bytes[i] != b'/'
        {
            i += 1;
        }
        if i == name_start {
            break;
        }
        let name = raw[name_start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let value_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                value = html_escape::decode_html_entities(&raw[value_start..i]).into_owned();
                i = (i + 1).min(bytes.len());
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                value = html_escape::decode_html_entities(&raw[value_start..i]).into_owned();
            }
        }
        attributes.insert(name, value);
    }
    attributes
}
