//! Content-type probing for file bodies: by file name first, then by the
//! leading magic bytes of the content.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes read from the head of a file for magic-number matching.
const SNIFF_LEN: usize = 16;

/// Guess a MIME type for `path`, preferring the extension and falling back
/// to content sniffing. `Ok(None)` means neither probe recognized the file.
pub fn probe(path: &Path) -> io::Result<Option<String>> {
    if let Some(mime) = from_name(path) {
        return Ok(Some(mime));
    }
    let mut head = [0u8; SNIFF_LEN];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(from_content(&head[..filled]).map(str::to_string))
}

pub fn from_name(path: &Path) -> Option<String> {
    path.extension()?;
    new_mime_guess::from_path(path).first().map(|m| m.essence_str().to_string())
}

pub fn from_content(head: &[u8]) -> Option<&'static str> {
    const TABLE: &[(&[u8], &str)] = &[
        (b"\xCA\xFE\xBA\xBE", "application/java-vm"),
        (b"\xAC\xED", "application/x-java-serialized-object"),
        (b"GIF8", "image/gif"),
        (b"#def", "image/x-bitmap"),
        (b"! XPM2", "image/x-pixmap"),
        (b"\x89PNG\r\n\x1A\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"BM", "image/bmp"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
        (b"%PDF", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b".snd", "audio/basic"),
        (b"<?xml", "application/xml"),
        (b"<!", "text/html"),
    ];

    if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WAVE" {
        return Some("audio/x-wav");
    }
    if let Some((_, mime)) = TABLE.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Some(mime);
    }
    let lower: Vec<u8> = head.iter().map(u8::to_ascii_lowercase).collect();
    if [&b"<html"[..], b"<head", b"<body"]
        .iter()
        .any(|tag| lower.starts_with(tag))
    {
        return Some("text/html");
    }
    None
}
