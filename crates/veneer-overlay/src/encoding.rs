//! Text decoding for transforms.
//!
//! Transforms operate on `&str`. Content is decoded with whatever encoding
//! it appears to use and the transformed text is encoded back the same way,
//! so a UTF-8 file with a byte-order mark keeps its BOM and a Latin-1 file
//! stays Latin-1.

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Encoding detected on read and reused on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// UTF-8 preceded by a byte-order mark.
    Utf8Bom,
    /// Any byte sequence that is not valid UTF-8. Each byte maps to the
    /// code point of the same value, which round-trips losslessly.
    Latin1,
}

impl TextEncoding {
    /// Decode `bytes`, returning the text (without BOM) and the encoding
    /// to write it back with.
    pub fn decode(bytes: &[u8]) -> (String, TextEncoding) {
        if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
            if let Ok(text) = std::str::from_utf8(rest) {
                return (text.to_string(), TextEncoding::Utf8Bom);
            }
        }

        match std::str::from_utf8(bytes) {
            Ok(text) => (text.to_string(), TextEncoding::Utf8),
            Err(_) => (
                bytes.iter().map(|&b| b as char).collect(),
                TextEncoding::Latin1,
            ),
        }
    }

    /// Encode `text` back into bytes.
    ///
    /// In Latin-1 mode, characters outside U+0000..=U+00FF cannot be
    /// represented and are written as `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Utf8Bom => {
                let mut out = Vec::with_capacity(UTF8_BOM.len() + text.len());
                out.extend_from_slice(UTF8_BOM);
                out.extend_from_slice(text.as_bytes());
                out
            }
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}
