use crate::hash::LimitHasher;
use memchr::memmem::Finder;
use once_cell::sync::Lazy;

/// <https://datatracker.ietf.org/doc/html/rfc6376#section-3.4>
#[derive(PartialEq, Eq, Clone, Debug, Copy)]
pub enum Type {
    Simple,
    Relaxed,
}

impl Type {
    pub fn canon_name(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }

    pub(crate) fn canon_body(&self, body: &[u8], hasher: &mut LimitHasher) {
        match self {
            Self::Simple => body_simple(body, hasher),
            Self::Relaxed => body_relaxed(body, hasher),
        }
    }

    /// Canonicalize one header field into `out`, including the trailing
    /// CRLF. `separator` is the original bytes between the name and the
    /// value (the colon and surrounding whitespace); simple
    /// canonicalization must reproduce them exactly.
    pub(crate) fn canon_header_into(
        &self,
        name: &str,
        separator: &str,
        value: &str,
        out: &mut Vec<u8>,
    ) {
        match self {
            Self::Simple => {
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(separator.as_bytes());
                out.extend_from_slice(value.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Self::Relaxed => canonicalize_header_relaxed(name, value.as_bytes(), out),
        }
    }
}

fn trim_ws_start(mut line: &[u8]) -> &[u8] {
    while let Some(c) = line.first() {
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => line = &line[1..],
            _ => break,
        }
    }
    line
}

fn trim_ws_end(mut line: &[u8]) -> &[u8] {
    while let Some(c) = line.last() {
        match c {
            b' ' | b'\t' | b'\r' | b'\n' => line = &line[..line.len() - 1],
            _ => break,
        }
    }
    line
}

fn strip_trailing_empty_lines(mut body: &[u8]) -> &[u8] {
    while body.ends_with(b"\r\n\r\n") {
        body = &body[..body.len() - 2];
    }
    if body == b"\r\n" {
        return b"";
    }
    body
}

/// https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.3
/// Remove trailing empty lines; the body always ends with exactly one
/// CRLF, even when empty.
fn body_simple(body: &[u8], hasher: &mut LimitHasher) {
    let body = strip_trailing_empty_lines(body);
    hasher.hash(body);
    if !body.ends_with(b"\r\n") {
        hasher.hash(b"\r\n");
    }
}

/// Helper for iterating CRLF terminated lines using memmem
struct IterLines<'haystack> {
    haystack: &'haystack [u8],
    inner: memchr::memmem::FindIter<'haystack, 'static>,
    start: usize,
    done: bool,
}

impl<'haystack> Iterator for IterLines<'haystack> {
    type Item = &'haystack [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.inner.next() {
            Some(idx) => {
                let line = &self.haystack[self.start..idx + 2];
                self.start = idx + 2;
                Some(line)
            }
            None => {
                self.done = true;
                let line = &self.haystack[self.start..];
                if line.is_empty() {
                    None
                } else {
                    Some(line)
                }
            }
        }
    }
}

fn iter_lines(haystack: &[u8]) -> IterLines {
    static CRLF: Lazy<Finder> = Lazy::new(|| memchr::memmem::Finder::new("\r\n"));
    IterLines {
        haystack,
        inner: CRLF.find_iter(haystack),
        start: 0,
        done: false,
    }
}

/// https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.4
fn body_relaxed(body: &[u8], hasher: &mut LimitHasher) {
    let body = strip_trailing_empty_lines(body);
    if body.is_empty() {
        return;
    }

    for mut line in iter_lines(body) {
        // Ignore all whitespace at the end of the line
        line = trim_ws_end(line);

        let mut prior = 0;
        // Reduce all sequences of WSP within a line to a single SP
        for idx in memchr::memchr2_iter(b' ', b'\t', line) {
            if prior > 0 && idx == prior {
                // part of a run; skip
                prior = idx + 1;
                continue;
            }

            hasher.hash(&line[prior..idx]);
            hasher.hash(b" ");
            prior = idx + 1;
        }
        hasher.hash(&line[prior..]);
        hasher.hash(b"\r\n");
    }
}

// https://datatracker.ietf.org/doc/html/rfc6376#section-3.4.2
fn canonicalize_header_relaxed(name: &str, value: &[u8], out: &mut Vec<u8>) {
    let name = name.to_lowercase();
    let name = name.trim_end();

    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b":");

    let value = trim_ws_start(trim_ws_end(value));
    let mut space_run = false;
    for &c in value {
        match c {
            b'\r' | b'\n' => {}
            b' ' | b'\t' => {
                if space_run {
                    continue;
                }
                space_run = true;
                out.push(b' ');
            }
            _ => {
                space_run = false;
                out.push(c);
            }
        }
    }

    out.extend_from_slice(b"\r\n");
}
