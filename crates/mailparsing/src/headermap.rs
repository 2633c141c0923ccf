use crate::Header;

/// An ordered list of header fields. Duplicate names are preserved in
/// message order; lookups are case-insensitive on the name only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap<'a> {
    headers: Vec<Header<'a>>,
}

impl<'a> std::ops::Deref for HeaderMap<'a> {
    type Target = Vec<Header<'a>>;
    fn deref(&self) -> &Vec<Header<'a>> {
        &self.headers
    }
}

impl<'a> HeaderMap<'a> {
    pub fn new(headers: Vec<Header<'a>>) -> Self {
        Self { headers }
    }

    pub fn get_first<'b>(&'b self, name: &'b str) -> Option<&'b Header<'a>> {
        self.iter_named(name).next()
    }

    pub fn get_last<'b>(&'b self, name: &'b str) -> Option<&'b Header<'a>> {
        self.iter_named(name).next_back()
    }

    pub fn iter_named<'name>(
        &'name self,
        name: &'name str,
    ) -> impl DoubleEndedIterator<Item = &'name Header<'a>> + 'name {
        self.headers
            .iter()
            .filter(move |header| header.get_name().eq_ignore_ascii_case(name))
    }
}
