//! Byte-level cursor over a buffered JSON document.
//!
//! Nothing in here decodes JSON. The scanner only knows enough about the
//! grammar to find where a value starts and ends (strings, escapes, bracket
//! nesting), which is all that's needed to either copy a value verbatim or
//! skip straight past it.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use memchr::{memchr, memchr2};
use std::io::BufRead;

pub(crate) struct Scanner<R> {
    reader: R,
    offset: u64,
}

impl<R: BufRead> Scanner<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Number of bytes consumed so far.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    fn advance(&mut self, n: usize) {
        self.reader.consume(n);
        self.offset += n as u64;
    }

    /// Skips whitespace and returns the next significant byte without
    /// consuming it. `None` means end of input.
    pub(crate) fn peek(&mut self) -> Result<Option<u8>> {
        loop {
            let buf = self.reader.fill_buf().or_raise(|| ErrorKind::Io)?;
            if buf.is_empty() {
                return Ok(None);
            }
            match buf.iter().position(|b| !is_whitespace(*b)) {
                Some(n) => {
                    let byte = buf[n];
                    self.advance(n);
                    return Ok(Some(byte));
                },
                None => {
                    let n = buf.len();
                    self.advance(n);
                },
            }
        }
    }

    /// Consumes the byte previously returned by [`peek()`](Self::peek).
    pub(crate) fn bump(&mut self) {
        self.advance(1);
    }

    /// Consumes the next significant byte, which must be `expected`.
    pub(crate) fn expect(&mut self, expected: u8, reason: &'static str) -> Result<()> {
        match self.peek()? {
            Some(byte) if byte == expected => {
                self.bump();
                Ok(())
            },
            Some(_) => exn::bail!(ErrorKind::Malformed { offset: self.offset, reason }),
            None => exn::bail!(ErrorKind::UnexpectedEof),
        }
    }

    /// Reads a JSON string (quotes included) into `out`.
    pub(crate) fn string(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self.peek()? {
            Some(b'"') => self.nested(Some(out)),
            Some(_) => exn::bail!(ErrorKind::NonStringKey { offset: self.offset }),
            None => exn::bail!(ErrorKind::UnexpectedEof),
        }
    }

    /// Reads one complete JSON value starting at the next significant byte.
    ///
    /// The exact bytes of the value are appended to `sink` when one is given,
    /// otherwise the value is skipped without being copied anywhere.
    pub(crate) fn value(&mut self, sink: Option<&mut Vec<u8>>) -> Result<()> {
        match self.peek()? {
            Some(b'"' | b'{' | b'[') => self.nested(sink),
            Some(byte) if is_scalar(byte) => self.scalar(sink),
            Some(_) => exn::bail!(ErrorKind::Malformed { offset: self.offset, reason: "expected a value" }),
            None => exn::bail!(ErrorKind::UnexpectedEof),
        }
    }

    /// Strings, objects and arrays. Tracks the expected closing brackets so
    /// that the value ends exactly where its outermost delimiter closes.
    fn nested(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<()> {
        let mut closers: Vec<u8> = Vec::new();
        let mut in_string = false;
        let mut escaped = false;
        loop {
            let buf = self.reader.fill_buf().or_raise(|| ErrorKind::Io)?;
            if buf.is_empty() {
                exn::bail!(ErrorKind::UnexpectedEof);
            }
            let mut i = 0;
            let mut done = false;
            let mut unbalanced = None;
            while i < buf.len() && !done {
                if escaped {
                    escaped = false;
                    i += 1;
                    continue;
                }
                if in_string {
                    match memchr2(b'"', b'\\', &buf[i..]) {
                        Some(n) if buf[i + n] == b'\\' => {
                            escaped = true;
                            i += n + 1;
                        },
                        Some(n) => {
                            in_string = false;
                            done = closers.is_empty();
                            i += n + 1;
                        },
                        None => i = buf.len(),
                    }
                    continue;
                }
                let byte = buf[i];
                i += 1;
                match byte {
                    b'"' => in_string = true,
                    b'{' => closers.push(b'}'),
                    b'[' => closers.push(b']'),
                    b'}' | b']' => {
                        if closers.pop() != Some(byte) {
                            unbalanced = Some(i - 1);
                            break;
                        }
                        done = closers.is_empty();
                    },
                    _ => {},
                }
            }
            if let Some(at) = unbalanced {
                let offset = self.offset + at as u64;
                exn::bail!(ErrorKind::Malformed { offset, reason: "unbalanced brackets" });
            }
            if let Some(out) = sink.as_mut() {
                out.extend_from_slice(&buf[..i]);
            }
            self.advance(i);
            if done {
                return Ok(());
            }
        }
    }

    /// Numbers, booleans and null. Not validated beyond the character class;
    /// whoever decodes the value later will complain about `nul`.
    fn scalar(&mut self, mut sink: Option<&mut Vec<u8>>) -> Result<()> {
        loop {
            let buf = self.reader.fill_buf().or_raise(|| ErrorKind::Io)?;
            if buf.is_empty() {
                return Ok(());
            }
            let n = buf.iter().position(|b| !is_scalar(*b)).unwrap_or(buf.len());
            let finished = n < buf.len();
            if let Some(out) = sink.as_mut() {
                out.extend_from_slice(&buf[..n]);
            }
            self.advance(n);
            if finished {
                return Ok(());
            }
        }
    }
}

/// Decodes the raw bytes of a JSON string (quotes included) into a `String`.
///
/// Most package names don't contain a single escape, so those skip the JSON
/// decoder entirely.
pub(crate) fn decode_string(raw: &[u8], offset: u64) -> Result<String> {
    let inner = &raw[1..raw.len() - 1];
    if memchr(b'\\', inner).is_none() {
        return String::from_utf8(inner.to_vec()).or_raise(|| ErrorKind::InvalidName { offset });
    }
    serde_json::from_slice::<String>(raw).or_raise(|| ErrorKind::InvalidName { offset })
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_scalar(byte: u8) -> bool {
    matches!(byte, b'-' | b'+' | b'.' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::BufReader;

    fn scanner(input: &str, capacity: usize) -> Scanner<BufReader<&[u8]>> {
        Scanner::new(BufReader::with_capacity(capacity, input.as_bytes()))
    }

    #[rstest]
    #[case(r#"{"a": [1, 2, {"b": "}"}]} , rest"#, r#"{"a": [1, 2, {"b": "}"}]}"#)]
    #[case(r#""esc\"aped \\" tail"#, r#""esc\"aped \\""#)]
    #[case("[[], {}] ]", "[[], {}]")]
    #[case("  -12.5e3,", "-12.5e3")]
    #[case("true}", "true")]
    #[case("null", "null")]
    fn test_value_exact_bytes(#[case] input: &str, #[case] expected: &str, #[values(1, 2, 7, 4096)] capacity: usize) {
        let mut scanner = scanner(input, capacity);
        let mut out = Vec::new();
        scanner.value(Some(&mut out)).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_skip_value_advances_cursor() {
        let mut scanner = scanner(r#"{"x": "]"} , 1"#, 3);
        scanner.value(None).unwrap();
        assert_eq!(scanner.peek().unwrap(), Some(b','));
    }

    #[rstest]
    #[case("{]")]
    #[case("[}")]
    #[case("{\"a\": [1}")]
    fn test_unbalanced(#[case] input: &str) {
        let err = scanner(input, 4096).value(None).unwrap_err();
        assert!(matches!(*err, ErrorKind::Malformed { .. }));
    }

    #[test]
    fn test_truncated_value() {
        let err = scanner(r#"{"a": "unterminated"#, 4096).value(None).unwrap_err();
        assert_eq!(*err, ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_string_rejects_non_string() {
        let err = scanner("  42", 4096).string(&mut Vec::new()).unwrap_err();
        assert_eq!(*err, ErrorKind::NonStringKey { offset: 2 });
    }

    #[rstest]
    #[case(r#""plain""#, "plain")]
    #[case(r#""a.\"b\"""#, "a.\"b\"")]
    #[case(r#""back\\slash""#, "back\\slash")]
    #[case(r#""été""#, "été")]
    fn test_decode_string(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(decode_string(raw.as_bytes(), 0).unwrap(), expected);
    }
}
