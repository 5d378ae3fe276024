//! NZB and archive fixtures
//!
//! Archives are assembled byte by byte so the tests do not depend on any
//! external archiver.

use nzb_triage::yenc;

const RAR4_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x00";
const SEVENZIP_SIGNATURE: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// One `<file>` of a generated NZB
pub struct NzbEntry {
    /// File name placed in the subject
    pub name: String,
    /// Message-ids, one per segment
    pub message_ids: Vec<String>,
}

impl NzbEntry {
    /// Entry with the given segments
    pub fn new(name: &str, message_ids: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            message_ids: message_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Build an NZB document
pub fn nzb(title: &str, password: Option<&str>, files: &[NzbEntry]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nzb PUBLIC "-//newzBin//DTD NZB 1.1//EN" "http://www.newzbin.com/DTD/nzb/nzb-1.1.dtd">
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
  <head>
"#,
    );
    xml.push_str(&format!("    <meta type=\"title\">{}</meta>\n", title));
    if let Some(password) = password {
        xml.push_str(&format!("    <meta type=\"password\">{}</meta>\n", password));
    }
    xml.push_str("  </head>\n");
    for file in files {
        xml.push_str(&format!(
            "  <file poster=\"test@example.com\" date=\"1234567890\" subject=\"{} yEnc (1/{})\">\n    <groups>\n      <group>alt.binaries.test</group>\n    </groups>\n    <segments>\n",
            file.name,
            file.message_ids.len()
        ));
        for (i, id) in file.message_ids.iter().enumerate() {
            xml.push_str(&format!(
                "      <segment bytes=\"768000\" number=\"{}\">{}</segment>\n",
                i + 1,
                id
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}

/// NZB holding a single one-segment file
pub fn single_file_nzb(name: &str, message_id: &str) -> String {
    nzb("Test Release", None, &[NzbEntry::new(name, &[message_id])])
}

fn rar4_block(kind: u8, flags: u16, body: &[u8]) -> Vec<u8> {
    let size = (7 + body.len()) as u16;
    let mut header = vec![0, 0, kind];
    header.extend_from_slice(&flags.to_le_bytes());
    header.extend_from_slice(&size.to_le_bytes());
    header.extend_from_slice(body);
    let crc = (crc32fast::hash(&header[2..]) & 0xFFFF) as u16;
    header[..2].copy_from_slice(&crc.to_le_bytes());
    header
}

/// Single-volume RAR 4 archive with one entry packed with `method`
/// (0x30 is store)
pub fn rar4_archive(entry: &str, method: u8) -> Vec<u8> {
    let data = b"not really a video";
    let mut out = RAR4_SIGNATURE.to_vec();
    out.extend(rar4_block(0x73, 0, &[0u8; 6]));

    let mut body = Vec::new();
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.push(2);
    body.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(29);
    body.push(method);
    body.extend_from_slice(&(entry.len() as u16).to_le_bytes());
    body.extend_from_slice(&0x20u32.to_le_bytes());
    body.extend_from_slice(entry.as_bytes());
    out.extend(rar4_block(0x74, 0x8000, &body));
    out.extend_from_slice(data);

    out.extend(rar4_block(0x7B, 0x4000, &[]));
    out
}

/// 7z archive with one entry whose folder uses the coder `method_id`
/// (`[0x00]` copy, `[0x21]` LZMA2)
pub fn sevenzip_archive(entry: &str, method_id: &[u8], props: &[u8]) -> Vec<u8> {
    let packed = b"data";
    let size = packed.len() as u8;

    let mut header = vec![0x01, 0x04];
    // PackInfo
    header.extend_from_slice(&[0x06, 0x00, 0x01, 0x09, size, 0x00]);
    // UnpackInfo with one single-coder folder
    header.extend_from_slice(&[0x07, 0x0B, 0x01, 0x00, 0x01]);
    let mut flags = method_id.len() as u8;
    if !props.is_empty() {
        flags |= 0x20;
    }
    header.push(flags);
    header.extend_from_slice(method_id);
    if !props.is_empty() {
        header.push(props.len() as u8);
        header.extend_from_slice(props);
    }
    header.extend_from_slice(&[0x0C, size, 0x00]);
    // SubStreamsInfo
    header.extend_from_slice(&[0x08, 0x0D, 0x01, 0x00]);
    header.push(0x00);

    // FilesInfo with names only
    let mut names = vec![0u8];
    for unit in entry.encode_utf16() {
        names.extend_from_slice(&unit.to_le_bytes());
    }
    names.extend_from_slice(&[0, 0]);
    header.extend_from_slice(&[0x05, 0x01, 0x11, names.len() as u8]);
    header.extend(names);
    header.push(0x00);
    header.push(0x00);

    let mut fields = Vec::new();
    fields.extend_from_slice(&(packed.len() as u64).to_le_bytes());
    fields.extend_from_slice(&(header.len() as u64).to_le_bytes());
    fields.extend_from_slice(&crc32fast::hash(&header).to_le_bytes());

    let mut out = SEVENZIP_SIGNATURE.to_vec();
    out.extend_from_slice(&[0, 4]);
    out.extend_from_slice(&crc32fast::hash(&fields).to_le_bytes());
    out.extend(fields);
    out.extend_from_slice(packed);
    out.extend(header);
    out
}

/// yEnc article body for `data`
pub fn article(data: &[u8], name: &str) -> Vec<u8> {
    yenc::encode(data, name, 128)
}
