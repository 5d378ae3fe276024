//! yEnc decoder
//!
//! yEnc is the binary encoding used by Usenet posts: every byte is shifted by 42,
//! and the few results that would break a text line (`NUL`, `LF`, `CR`, `=`) are
//! escaped as `=` followed by the value shifted by another 64.
//!
//! ```text
//! =ybegin part=1 line=128 size=123456 name=filename.ext
//! =ypart begin=1 end=65536
//! <encoded binary data>
//! =yend size=65536 part=1 pcrc32=ABCD1234
//! ```
//!
//! Triage only ever needs the head of an article, so decoding stops after
//! `max_bytes` output bytes. Truncation is expected; the inspectors deal with
//! short buffers.

use thiserror::Error;

/// Failure to find a yEnc payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The body has no `=ybegin` line
    #[error("no =ybegin marker found")]
    MissingHeader,
}

/// Decoded article plus the header fields triage uses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YencArticle {
    /// Decoded bytes, at most `max_bytes`
    pub data: Vec<u8>,
    /// `name=` from `=ybegin`
    pub name: Option<String>,
    /// `size=` from `=ybegin`: size of the whole file
    pub file_size: Option<u64>,
    /// `part=` from `=ybegin`
    pub part: Option<u32>,
    /// `begin=` from `=ypart` (1-based offset in the file)
    pub part_begin: Option<u64>,
    /// `end=` from `=ypart` (inclusive)
    pub part_end: Option<u64>,
    /// Whether decoding stopped at `max_bytes` before `=yend`
    pub truncated: bool,
}

impl YencArticle {
    /// Zero-based file offset of `data[0]`
    pub fn offset(&self) -> u64 {
        self.part_begin.map(|b| b.saturating_sub(1)).unwrap_or(0)
    }

    /// Length of this part as announced by `=ypart`
    pub fn part_len(&self) -> Option<u64> {
        match (self.part_begin, self.part_end) {
            (Some(begin), Some(end)) if end >= begin => Some(end - begin + 1),
            _ => None,
        }
    }
}

const ESCAPE: u8 = b'=';

/// Decode a raw article body into at most `max_bytes` bytes.
pub fn decode(raw: &[u8], max_bytes: usize) -> Result<Vec<u8>, DecodeError> {
    decode_article(raw, max_bytes).map(|article| article.data)
}

/// Decode a raw article body, keeping the `=ybegin`/`=ypart` metadata.
///
/// Accepts bodies with their line breaks intact as well as bodies whose lines
/// were joined without separators.
pub fn decode_article(raw: &[u8], max_bytes: usize) -> Result<YencArticle, DecodeError> {
    match reframe_joined(raw) {
        Some(framed) => decode_lines(&framed, max_bytes),
        None => decode_lines(raw, max_bytes),
    }
}

fn decode_lines(raw: &[u8], max_bytes: usize) -> Result<YencArticle, DecodeError> {
    let mut article = YencArticle::default();
    let mut seen_begin = false;
    let mut escape_next = false;

    'lines: for line in raw.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        if !seen_begin {
            if line.starts_with(b"=ybegin ") || line == b"=ybegin" {
                parse_begin(line, &mut article);
                seen_begin = true;
            }
            continue;
        }

        if line.starts_with(b"=ypart") {
            parse_part(line, &mut article);
            continue;
        }
        if line.starts_with(b"=yend") {
            break;
        }

        for &byte in line {
            if article.data.len() >= max_bytes {
                article.truncated = true;
                break 'lines;
            }
            if escape_next {
                article.data.push(byte.wrapping_sub(64).wrapping_sub(42));
                escape_next = false;
            } else if byte == ESCAPE {
                escape_next = true;
            } else {
                article.data.push(byte.wrapping_sub(42));
            }
        }
    }

    if !seen_begin {
        return Err(DecodeError::MissingHeader);
    }
    Ok(article)
}

/// Restore the line structure of a body whose lines were concatenated.
///
/// `=y` never occurs inside encoded data (`y` is not an escaped value), so the
/// control lines can be found by their markers. What cannot be found that way
/// is where `end=` digits or the `name=` value stop and data starts; that
/// boundary is the one position whose decoded length matches the `=yend`
/// size. Every `=` in the data leads an escape pair, so the decoded length of
/// `data[k..]` is its byte count minus its `=` count.
fn reframe_joined(raw: &[u8]) -> Option<Vec<u8>> {
    let body = &raw[find(raw, b"=ybegin ")?..];
    if body.contains(&b'\n') {
        return None;
    }
    let data_end = rfind(body, b"=yend ").unwrap_or(body.len());
    let trailer_size = keyword(&body[data_end..], "size");

    let header_end;
    let data_start;
    if let Some(part_at) = find(&body[..data_end], b"=ypart ") {
        header_end = part_at;
        let end_at = part_at + find(&body[part_at..data_end], b"end=")? + 4;
        let digits = body[end_at..data_end]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        let begin = keyword(&body[part_at..end_at], "begin");
        let fits = |width: usize| {
            let Some(size) = trailer_size else { return false };
            let end: Option<u64> = std::str::from_utf8(&body[end_at..end_at + width])
                .ok()
                .and_then(|d| d.parse().ok());
            let span_ok = match (begin, end) {
                (Some(begin), Some(end)) => end >= begin && end - begin + 1 == size,
                _ => true,
            };
            span_ok && decoded_len(&body[end_at + width..data_end]) == size
        };
        let width = (1..=digits).rev().find(|&w| fits(w)).unwrap_or(digits);
        data_start = end_at + width;
    } else {
        let name_at = find(&body[..data_end], b" name=")? + 6;
        header_end = usize::MAX;
        let expected = trailer_size.or_else(|| keyword(&body[..name_at], "size"))?;
        let mut len = decoded_len(&body[name_at..data_end]);
        if len <= expected {
            return None;
        }
        let mut start = None;
        for k in name_at..data_end {
            if body[k] != ESCAPE {
                len -= 1;
            }
            if len == expected {
                start = Some(k + 1);
                break;
            }
            if len < expected {
                break;
            }
        }
        data_start = start?;
    }

    let mut framed = Vec::with_capacity(body.len() + 8);
    if header_end < data_start {
        framed.extend_from_slice(&body[..header_end]);
        framed.extend_from_slice(b"\r\n");
        framed.extend_from_slice(&body[header_end..data_start]);
    } else {
        framed.extend_from_slice(&body[..data_start]);
    }
    framed.extend_from_slice(b"\r\n");
    framed.extend_from_slice(&body[data_start..data_end]);
    framed.extend_from_slice(b"\r\n");
    framed.extend_from_slice(&body[data_end..]);
    Some(framed)
}

fn decoded_len(data: &[u8]) -> u64 {
    let escapes = data.iter().filter(|&&b| b == ESCAPE).count();
    (data.len() - escapes) as u64
}

/// Numeric `key=value` from a control line
fn keyword(line: &[u8], key: &str) -> Option<u64> {
    let text = String::from_utf8_lossy(line);
    text.split_whitespace()
        .filter_map(|t| t.split_once('='))
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| {
            let digits: String = v.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn parse_begin(line: &[u8], article: &mut YencArticle) {
    let text = String::from_utf8_lossy(line);
    // name= runs to the end of the line and may contain spaces
    let (params, name) = match text.find(" name=") {
        Some(idx) => (&text[..idx], Some(text[idx + 6..].trim().to_string())),
        None => (&text[..], None),
    };
    article.name = name.filter(|n| !n.is_empty());
    for (key, value) in params.split_whitespace().filter_map(|t| t.split_once('=')) {
        match key {
            "size" => article.file_size = value.parse().ok(),
            "part" => article.part = value.parse().ok(),
            _ => {}
        }
    }
}

fn parse_part(line: &[u8], article: &mut YencArticle) {
    let text = String::from_utf8_lossy(line);
    for (key, value) in text.split_whitespace().filter_map(|t| t.split_once('=')) {
        match key {
            "begin" => article.part_begin = value.parse().ok(),
            "end" => article.part_end = value.parse().ok(),
            _ => {}
        }
    }
}

/// Encode `data` as a single-part yEnc article body.
pub fn encode(data: &[u8], name: &str, line_length: usize) -> Vec<u8> {
    let mut out = format!(
        "=ybegin line={} size={} name={}\r\n",
        line_length,
        data.len(),
        name
    )
    .into_bytes();
    encode_lines(data, line_length, &mut out);
    out.extend_from_slice(format!("=yend size={}\r\n", data.len()).as_bytes());
    out
}

/// Encode `data` as part `part` of a multi-part post.
///
/// `begin` is the 1-based offset of `data[0]` within a file of `file_size` bytes.
pub fn encode_part(
    data: &[u8],
    name: &str,
    part: u32,
    begin: u64,
    file_size: u64,
    line_length: usize,
) -> Vec<u8> {
    let end = begin + data.len() as u64 - 1;
    let mut out = format!(
        "=ybegin part={} line={} size={} name={}\r\n=ypart begin={} end={}\r\n",
        part, line_length, file_size, name, begin, end
    )
    .into_bytes();
    encode_lines(data, line_length, &mut out);
    out.extend_from_slice(
        format!("=yend size={} part={}\r\n", data.len(), part).as_bytes(),
    );
    out
}

fn encode_lines(data: &[u8], line_length: usize, out: &mut Vec<u8>) {
    let mut column = 0;
    for &byte in data {
        let encoded = byte.wrapping_add(42);
        if matches!(encoded, 0x00 | 0x0A | 0x0D | ESCAPE) {
            out.push(ESCAPE);
            out.push(encoded.wrapping_add(64));
            column += 2;
        } else {
            out.push(encoded);
            column += 1;
        }
        if column >= line_length {
            out.extend_from_slice(b"\r\n");
            column = 0;
        }
    }
    if column > 0 {
        out.extend_from_slice(b"\r\n");
    }
}
