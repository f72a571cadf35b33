use crate::error::{ErrorKind, Result};
use crate::scanner::{Scanner, decode_string};
use std::io::BufRead;
use std::iter::FusedIterator;

const PACKAGES_FIELD: &str = "packages";

/// A single member of the `"packages"` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Decoded package name (the member key).
    pub name: String,
    /// Exact bytes of the member value, as they appeared in the document.
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Haven't found `"packages"` yet.
    Start,
    /// Inside the `"packages"` object.
    Members { first: bool },
    /// Either the `"packages"` object closed or an error was returned.
    Done,
}

/// Lazy, single-pass iterator over the members of a document's top-level
/// `"packages"` object.
///
/// ```text
/// { "other": ..., "packages": { "pkg1": {...}, "pkg2": {...} }, ... }
///   ^^^^^^^^^^^^               ^^^^^^^^^^^^^^  ^^^^^^^^^^^^^^   ^^^
///   skipped                    yielded         yielded          ignored
/// ```
///
/// Everything outside `"packages"` is skipped without being decoded, and
/// package values are handed out as raw bytes, so a document with hundreds
/// of thousands of entries never has to be held in memory (or parsed twice).
///
/// The iterator stops at the closing bracket of `"packages"`. After the
/// first error it is exhausted.
///
/// # Examples
///
/// ```
/// use pkgdex_extract::Packages;
///
/// let doc = br#"{"version": 2, "packages": {"hello": {"version": "2.12"}}}"#;
/// let entries: Vec<_> = Packages::new(&doc[..]).collect::<Result<_, _>>().unwrap();
/// assert_eq!(entries[0].name, "hello");
/// assert_eq!(entries[0].value, br#"{"version": "2.12"}"#);
/// ```
pub struct Packages<R> {
    scanner: Scanner<R>,
    state: State,
    key: Vec<u8>,
    yielded: u64,
}

impl<R: BufRead> Packages<R> {
    pub fn new(reader: R) -> Self {
        Self {
            scanner: Scanner::new(reader),
            state: State::Start,
            key: Vec::new(),
            yielded: 0,
        }
    }

    /// Bytes of the document consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.scanner.offset()
    }

    fn key(&mut self) -> Result<String> {
        self.key.clear();
        self.scanner.string(&mut self.key)?;
        let offset = self.scanner.offset() - self.key.len() as u64;
        decode_string(&self.key, offset)
    }

    /// Walks the outer object up to (and including) the opening bracket of
    /// the `"packages"` value.
    fn seek_packages(&mut self) -> Result<()> {
        match self.scanner.peek()? {
            Some(b'{') => self.scanner.bump(),
            _ => exn::bail!(ErrorKind::NotAnObject),
        }
        loop {
            if matches!(self.scanner.peek()?, None | Some(b'}')) {
                exn::bail!(ErrorKind::PackagesNotFound);
            }
            let field = self.key()?;
            self.scanner.expect(b':', "expected ':' after field name")?;
            if field == PACKAGES_FIELD {
                return match self.scanner.peek()? {
                    Some(b'{') => {
                        self.scanner.bump();
                        Ok(())
                    },
                    Some(_) => exn::bail!(ErrorKind::Malformed {
                        offset: self.scanner.offset(),
                        reason: "packages is not an object",
                    }),
                    None => exn::bail!(ErrorKind::UnexpectedEof),
                };
            }
            tracing::trace!(%field, "skipping top-level field");
            self.scanner.value(None)?;
            match self.scanner.peek()? {
                Some(b',') => self.scanner.bump(),
                None | Some(b'}') => exn::bail!(ErrorKind::PackagesNotFound),
                Some(_) => exn::bail!(ErrorKind::Malformed {
                    offset: self.scanner.offset(),
                    reason: "expected ',' or '}' after field",
                }),
            }
        }
    }

    fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.state == State::Start {
            self.seek_packages()?;
            self.state = State::Members { first: true };
        }
        let State::Members { first } = self.state else {
            return Ok(None);
        };
        match self.scanner.peek()? {
            Some(b'}') => {
                self.scanner.bump();
                self.state = State::Done;
                tracing::debug!(packages = self.yielded, bytes = self.scanner.offset(), "reached end of packages");
                return Ok(None);
            },
            Some(b',') if !first => self.scanner.bump(),
            Some(_) if first => {},
            Some(_) => exn::bail!(ErrorKind::Malformed {
                offset: self.scanner.offset(),
                reason: "expected ',' or '}' between packages",
            }),
            None => exn::bail!(ErrorKind::UnexpectedEof),
        }
        self.state = State::Members { first: false };
        let name = self.key()?;
        self.scanner.expect(b':', "expected ':' after package name")?;
        let mut value = Vec::new();
        self.scanner.value(Some(&mut value))?;
        self.yielded += 1;
        Ok(Some(Entry { name, value }))
    }
}

impl<R: BufRead> Iterator for Packages<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(entry) => entry.map(Ok),
            Err(err) => {
                self.state = State::Done;
                Some(Err(err))
            },
        }
    }
}

impl<R: BufRead> FusedIterator for Packages<R> {}
