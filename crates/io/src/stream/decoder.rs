use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Text encodings understood by [`StringDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    Ascii,
    /// One byte per char, also known as `binary`.
    Latin1,
    Hex,
    Base64,
    Utf16Le,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown encoding: {0}")]
pub struct UnknownEncoding(String);

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Ascii => "ascii",
            Encoding::Latin1 => "latin1",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
            Encoding::Utf16Le => "utf16le",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "ascii" => Ok(Encoding::Ascii),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            "utf16le" | "utf-16le" | "ucs2" | "ucs-2" => Ok(Encoding::Utf16Le),
            _ => Err(UnknownEncoding(name.to_string())),
        }
    }
}

impl TryFrom<&str> for Encoding {
    type Error = UnknownEncoding;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        name.parse()
    }
}

impl TryFrom<String> for Encoding {
    type Error = UnknownEncoding;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Incremental bytes to text decoding.
///
/// Multi-byte units split across writes (UTF-8 sequences, UTF-16 code units and surrogate
/// pairs, base64 input triplets) are held back until the rest arrives or [`end`](Self::end)
/// is called.
#[derive(Debug, Clone)]
pub struct StringDecoder {
    encoding: Encoding,
    pending: Vec<u8>,
}

impl StringDecoder {
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding, pending: Vec::new() }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn write(&mut self, buf: &[u8]) -> String {
        match self.encoding {
            Encoding::Utf8 => self.write_utf8(buf),
            Encoding::Ascii => buf.iter().map(|&b| char::from(b & 0x7f)).collect(),
            Encoding::Latin1 => buf.iter().map(|&b| char::from(b)).collect(),
            Encoding::Hex => hex::encode(buf),
            Encoding::Base64 => self.write_base64(buf),
            Encoding::Utf16Le => self.write_utf16(buf),
        }
    }

    /// Flushes whatever is still buffered, replacing incomplete characters.
    pub fn end(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            return String::new();
        }
        match self.encoding {
            Encoding::Base64 => STANDARD.encode(rest),
            Encoding::Utf16Le => {
                let units = rest.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
                let mut text: String = char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect();
                if rest.len() % 2 == 1 {
                    text.push(char::REPLACEMENT_CHARACTER);
                }
                text
            }
            _ => String::from_utf8_lossy(&rest).into_owned(),
        }
    }

    fn write_utf8(&mut self, buf: &[u8]) -> String {
        self.pending.extend_from_slice(buf);

        let mut text = String::with_capacity(self.pending.len());
        let mut input = self.pending.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    text.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[invalid..];
                        }
                        // incomplete sequence at the tail, keep it for the next write
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = input.to_vec();
        text
    }

    fn write_base64(&mut self, buf: &[u8]) -> String {
        self.pending.extend_from_slice(buf);
        let complete = self.pending.len() - self.pending.len() % 3;
        let rest = self.pending.split_off(complete);
        let text = STANDARD.encode(&self.pending);
        self.pending = rest;
        text
    }

    fn write_utf16(&mut self, buf: &[u8]) -> String {
        self.pending.extend_from_slice(buf);
        let mut usable = self.pending.len() - self.pending.len() % 2;

        // a trailing high surrogate needs its partner from the next write
        if usable >= 2 {
            let last = u16::from_le_bytes([self.pending[usable - 2], self.pending[usable - 1]]);
            if (0xD800..0xDC00).contains(&last) {
                usable -= 2;
            }
        }

        let rest = self.pending.split_off(usable);
        let units = self.pending.chunks_exact(2).map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
        let text = char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect();
        self.pending = rest;
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_names() {
        assert_eq!(Encoding::try_from("UTF-8"), Ok(Encoding::Utf8));
        assert_eq!(Encoding::try_from("binary"), Ok(Encoding::Latin1));
        assert_eq!(Encoding::try_from("ucs2"), Ok(Encoding::Utf16Le));
        assert!(Encoding::try_from("ebcdic").is_err());
        assert_eq!(Encoding::Hex.to_string(), "hex");
    }

    #[test]
    fn utf8_sequence_split_across_writes() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        let euro = "€".as_bytes();

        assert_eq!(decoder.write(&euro[..1]), "");
        assert_eq!(decoder.buffered(), 1);
        assert_eq!(decoder.write(&euro[1..2]), "");
        assert_eq!(decoder.write(&[euro[2], b'!']), "€!");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn utf8_invalid_bytes_are_replaced() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn utf8_end_flushes_incomplete_tail() {
        let mut decoder = StringDecoder::new(Encoding::Utf8);
        assert_eq!(decoder.write(&"é".as_bytes()[..1]), "");
        assert_eq!(decoder.end(), "\u{FFFD}");
        assert_eq!(decoder.end(), "");
    }

    #[test]
    fn base64_keeps_partial_triplets() {
        let mut decoder = StringDecoder::new(Encoding::Base64);
        assert_eq!(decoder.write(b"pi"), "");
        assert_eq!(decoder.write(b"ngs"), "cGlu");
        assert_eq!(decoder.end(), "Z3M=");
    }

    #[test]
    fn hex_ascii_latin1() {
        assert_eq!(StringDecoder::new(Encoding::Hex).write(&[0xde, 0xad]), "dead");
        assert_eq!(StringDecoder::new(Encoding::Ascii).write(&[b'a', 0xe1]), "aa");
        assert_eq!(StringDecoder::new(Encoding::Latin1).write(&[0xe9]), "é");
    }

    #[test]
    fn utf16_surrogate_pair_split() {
        let mut decoder = StringDecoder::new(Encoding::Utf16Le);
        let bytes: Vec<u8> = "a😀".encode_utf16().flat_map(u16::to_le_bytes).collect();

        assert_eq!(decoder.write(&bytes[..3]), "a");
        assert_eq!(decoder.write(&bytes[3..4]), "");
        assert_eq!(decoder.write(&bytes[4..]), "😀");
    }
}
