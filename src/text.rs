// src/text.rs

//! Text layering over binary streams.
//!
//! Character-level concerns stay thin: decoding delegates to the standard
//! library's UTF-8 machinery (plus a Latin-1 byte map), error policies
//! mirror the usual strict/replace/ignore trio, and newline handling
//! translates universally on read when no explicit newline is configured.
//! Line splitting happens on the newline byte before decoding, so multi-byte
//! sequences are never cut by this layer.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Decoding errors are surfaced.
    #[default]
    Strict,
    /// Invalid sequences become U+FFFD.
    Replace,
    /// Invalid sequences are dropped.
    Ignore,
}

/// Text-mode attributes from the `open` call.
#[derive(Debug, Clone, Default)]
pub struct TextConfig {
    pub encoding: Encoding,
    pub errors: ErrorPolicy,
    /// `None` requests universal-newline translation on read and no
    /// translation on write; an explicit value disables read translation
    /// and is substituted for `\n` on write.
    pub newline: Option<String>,
}

impl TextConfig {
    /// Builds a config from the raw `open` attributes.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown encoding or error-policy name.
    pub fn new(
        encoding: Option<&str>,
        errors: Option<&str>,
        newline: Option<&str>,
    ) -> Result<Self> {
        let encoding = match encoding.map(|e| e.to_ascii_lowercase()).as_deref() {
            None | Some("utf-8") | Some("utf8") => Encoding::Utf8,
            Some("latin-1") | Some("latin1") | Some("iso-8859-1") => Encoding::Latin1,
            Some(other) => return Err(Error::io(format!("unsupported encoding '{other}'"))),
        };
        let errors = match errors {
            None | Some("strict") => ErrorPolicy::Strict,
            Some("replace") => ErrorPolicy::Replace,
            Some("ignore") => ErrorPolicy::Ignore,
            Some(other) => return Err(Error::io(format!("unsupported error policy '{other}'"))),
        };
        Ok(Self {
            encoding,
            errors,
            newline: newline.map(str::to_string),
        })
    }

    /// Decodes bytes, applying the error policy and read-side newline
    /// translation.
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let decoded = match self.encoding {
            Encoding::Utf8 => decode_utf8(bytes, self.errors)?,
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        };
        if self.newline.is_none() {
            Ok(translate_newlines(&decoded))
        } else {
            Ok(decoded)
        }
    }

    /// Encodes a string, applying write-side newline substitution.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let substituted = match self.newline.as_deref() {
            Some(nl) if nl != "\n" && !nl.is_empty() => text.replace('\n', nl),
            _ => text.to_string(),
        };
        match self.encoding {
            Encoding::Utf8 => Ok(substituted.into_bytes()),
            Encoding::Latin1 => {
                let mut out = Vec::with_capacity(substituted.len());
                for ch in substituted.chars() {
                    let code = ch as u32;
                    if code <= 0xFF {
                        out.push(code as u8);
                    } else {
                        match self.errors {
                            ErrorPolicy::Strict => {
                                return Err(Error::io(format!(
                                    "character '{ch}' is not representable in latin-1"
                                )))
                            }
                            ErrorPolicy::Replace => out.push(b'?'),
                            ErrorPolicy::Ignore => {}
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}

fn decode_utf8(bytes: &[u8], policy: ErrorPolicy) -> Result<String> {
    match policy {
        ErrorPolicy::Strict => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| Error::io(format!("invalid UTF-8 at byte {}", e.valid_up_to()))),
        ErrorPolicy::Replace => Ok(String::from_utf8_lossy(bytes).into_owned()),
        ErrorPolicy::Ignore => {
            let mut out = String::with_capacity(bytes.len());
            let mut rest = bytes;
            loop {
                match std::str::from_utf8(rest) {
                    Ok(valid) => {
                        out.push_str(valid);
                        break;
                    }
                    Err(e) => {
                        let (valid, after) = rest.split_at(e.valid_up_to());
                        // The prefix up to the error is valid by construction.
                        out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                        let skip = e.error_len().unwrap_or(after.len());
                        rest = &after[skip.min(after.len())..];
                        if rest.is_empty() {
                            break;
                        }
                    }
                }
            }
            Ok(out)
        }
    }
}

/// Universal newlines: `\r\n` and bare `\r` become `\n`.
fn translate_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TextConfig::new(None, None, None).unwrap();
        assert_eq!(config.encoding, Encoding::Utf8);
        assert_eq!(config.errors, ErrorPolicy::Strict);
        assert!(config.newline.is_none());
    }

    #[test]
    fn test_unknown_encoding() {
        assert!(TextConfig::new(Some("utf-17"), None, None).is_err());
        assert!(TextConfig::new(None, Some("panic"), None).is_err());
    }

    #[test]
    fn test_strict_decode_rejects_bad_utf8() {
        let config = TextConfig::new(None, None, None).unwrap();
        assert!(config.decode(&[0x68, 0x69, 0xFF]).is_err());
    }

    #[test]
    fn test_replace_and_ignore_policies() {
        let replace = TextConfig::new(None, Some("replace"), Some("")).unwrap();
        assert_eq!(replace.decode(&[0x68, 0xFF, 0x69]).unwrap(), "h\u{FFFD}i");

        let ignore = TextConfig::new(None, Some("ignore"), Some("")).unwrap();
        assert_eq!(ignore.decode(&[0x68, 0xFF, 0x69]).unwrap(), "hi");
    }

    #[test]
    fn test_latin1_roundtrip() {
        let config = TextConfig::new(Some("latin-1"), None, Some("")).unwrap();
        let decoded = config.decode(&[0x63, 0xE9, 0x64]).unwrap();
        assert_eq!(decoded, "céd");
        assert_eq!(config.encode("céd").unwrap(), vec![0x63, 0xE9, 0x64]);
    }

    #[test]
    fn test_latin1_unrepresentable() {
        let strict = TextConfig::new(Some("latin1"), None, None).unwrap();
        assert!(strict.encode("snowman ☃").is_err());
        let replace = TextConfig::new(Some("latin1"), Some("replace"), None).unwrap();
        assert_eq!(replace.encode("a☃b").unwrap(), b"a?b".to_vec());
    }

    #[test]
    fn test_universal_newlines_on_read() {
        let config = TextConfig::new(None, None, None).unwrap();
        assert_eq!(config.decode(b"a\r\nb\rc\n").unwrap(), "a\nb\nc\n");

        // An explicit newline disables translation.
        let raw = TextConfig::new(None, None, Some("\r\n")).unwrap();
        assert_eq!(raw.decode(b"a\r\nb").unwrap(), "a\r\nb");
    }

    #[test]
    fn test_newline_substitution_on_write() {
        let config = TextConfig::new(None, None, Some("\r\n")).unwrap();
        assert_eq!(config.encode("a\nb\n").unwrap(), b"a\r\nb\r\n".to_vec());

        let untouched = TextConfig::new(None, None, None).unwrap();
        assert_eq!(untouched.encode("a\nb").unwrap(), b"a\nb".to_vec());
    }
}
