use std::ops::Range;
use std::sync::Arc;

/// A string that is either borrowed from the caller, owned, or a slice of
/// an owned string shared with other slices. Message bodies and header
/// values are slices of the original input; no copies are made unless the
/// input needed end-of-line normalization.
pub enum SharedString<'a> {
    Owned(Arc<String>),
    Borrowed(&'a str),
    Sliced { other: Arc<String>, range: Range<usize> },
}

impl SharedString<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Owned(s) => s.as_str(),
            Self::Borrowed(s) => s,
            Self::Sliced { other, range } => &other.as_str()[range.clone()],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Owned(s) => s.len(),
            Self::Borrowed(s) => s.len(),
            Self::Sliced { range, .. } => range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice(&self, slice_range: Range<usize>) -> Self {
        match self {
            Self::Owned(s) => Self::Sliced {
                other: Arc::clone(s),
                range: slice_range,
            },
            Self::Borrowed(s) => Self::Borrowed(&s[slice_range]),
            Self::Sliced { other, range } => {
                let start = range.start + slice_range.start;
                Self::Sliced {
                    other: Arc::clone(other),
                    range: start..start + slice_range.len(),
                }
            }
        }
    }

    pub fn to_owned_string(&self) -> SharedString<'static> {
        SharedString::Owned(Arc::new(self.as_str().to_string()))
    }
}

impl Clone for SharedString<'_> {
    fn clone(&self) -> Self {
        match self {
            Self::Owned(s) => Self::Sliced {
                other: Arc::clone(s),
                range: 0..s.len(),
            },
            Self::Borrowed(s) => Self::Borrowed(s),
            Self::Sliced { other, range } => Self::Sliced {
                other: Arc::clone(other),
                range: range.clone(),
            },
        }
    }
}

impl std::ops::Deref for SharedString<'_> {
    type Target = str;
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl std::cmp::PartialEq<Self> for SharedString<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_str().eq(other.as_str())
    }
}

impl std::cmp::PartialEq<&str> for SharedString<'_> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str().eq(*other)
    }
}

impl std::fmt::Display for SharedString<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl std::fmt::Debug for SharedString<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{:?}", self.as_str())
    }
}

impl From<String> for SharedString<'_> {
    fn from(s: String) -> Self {
        Self::Owned(Arc::new(s))
    }
}

impl<'a> From<&'a str> for SharedString<'a> {
    fn from(s: &'a str) -> Self {
        Self::Borrowed(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slicing_shares_the_owned_buffer() {
        let owned: SharedString = String::from("hello world").into();
        let sliced = owned.slice(6..11);
        assert_eq!(sliced, "world");
        let nested = sliced.slice(1..3);
        assert_eq!(nested, "or");
    }

    #[test]
    fn borrowed_round_trip() {
        let s: SharedString = "one two".into();
        assert_eq!(s.slice(0..3), "one");
        assert_eq!(s.len(), 7);
    }
}
