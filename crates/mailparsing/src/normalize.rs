/// Report whether data contains a CR or LF that is not part of a CRLF pair.
pub fn has_lone_cr_or_lf(data: &[u8]) -> bool {
    for i in memchr::memchr2_iter(b'\r', b'\n', data) {
        match data[i] {
            b'\r' => {
                if data.get(i + 1).copied() != Some(b'\n') {
                    return true;
                }
            }
            b'\n' => {
                if i == 0 || data[i - 1] != b'\r' {
                    return true;
                }
            }
            _ => unreachable!(),
        }
    }
    false
}

/// Rewrite any lone CR or LF into a CRLF sequence.
pub fn normalize_crlf(data: &str) -> String {
    let bytes = data.as_bytes();
    let mut normalized = Vec::with_capacity(bytes.len());
    let mut last_idx = 0;

    for i in memchr::memchr2_iter(b'\r', b'\n', bytes) {
        match bytes[i] {
            b'\r' => {
                normalized.extend_from_slice(&bytes[last_idx..=i]);
                if bytes.get(i + 1).copied() != Some(b'\n') {
                    normalized.push(b'\n');
                }
            }
            b'\n' => {
                normalized.extend_from_slice(&bytes[last_idx..i]);
                if i == 0 || bytes[i - 1] != b'\r' {
                    normalized.push(b'\r');
                }
                normalized.push(b'\n');
            }
            _ => unreachable!(),
        }
        last_idx = i + 1;
    }

    normalized.extend_from_slice(&bytes[last_idx..]);
    // The scan only ever inserts CR or LF bytes into already valid UTF-8
    String::from_utf8(normalized).expect("normalization preserves UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_detection() {
        assert!(!has_lone_cr_or_lf(b""));
        assert!(!has_lone_cr_or_lf(b"hello\r\nthere\r\n"));
        assert!(has_lone_cr_or_lf(b"hello\n"));
        assert!(has_lone_cr_or_lf(b"hello\r"));
        assert!(has_lone_cr_or_lf(b"hello\nthere\r\n"));
        assert!(has_lone_cr_or_lf(b"hello\r\r\nthere"));
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_crlf("a\nb"), "a\r\nb");
        assert_eq!(normalize_crlf("a\rb"), "a\r\nb");
        assert_eq!(
            normalize_crlf("foo\r\nbar\nwoot\rend"),
            "foo\r\nbar\r\nwoot\r\nend"
        );
    }
}
