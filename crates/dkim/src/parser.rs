use crate::DKIMError;
use indexmap::map::IndexMap;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::satisfy;
use nom::combinator::{all_consuming, opt, recognize};
use nom::multi::fold_many0;
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::IResult;

/// A single `name=value` from a tag list
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub name: String,
    /// Value with folding whitespace removed
    pub value: String,
    /// Value as it appeared in the text, interior FWS intact
    pub raw_value: String,
}

/// Parses a tag list per RFC 6376 §3.2:
/// tag-list = tag-spec *( ";" tag-spec ) [ ";" ]
pub fn tag_list(input: &str) -> IResult<&str, Vec<Tag>> {
    let (input, start) = tag_spec(input)?;

    terminated(
        fold_many0(
            preceded(tag(";"), tag_spec),
            move || vec![start.clone()],
            |mut acc: Vec<Tag>, item| {
                acc.push(item);
                acc
            },
        ),
        opt(pair(tag(";"), opt(fws))),
    )(input)
}

/// tag-spec = [FWS] tag-name [FWS] "=" [FWS] tag-value [FWS]
fn tag_spec(input: &str) -> IResult<&str, Tag> {
    let (input, name) = delimited(opt(fws), tag_name, opt(fws))(input)?;
    let (input, _) = tag("=")(input)?;

    // Parse the value twice to retain the original text
    let value_input = input;
    let (_, raw_value) = delimited(opt(fws), raw_tag_value, opt(fws))(value_input)?;
    let (input, value) = delimited(opt(fws), tag_value, opt(fws))(value_input)?;

    Ok((
        input,
        Tag {
            name: name.to_owned(),
            value,
            raw_value,
        },
    ))
}

/// tag-name = ALPHA *ALNUMPUNC
fn tag_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic()),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn is_valchar(c: char) -> bool {
    ('!'..=':').contains(&c) || ('<'..='~').contains(&c)
}

/// tag-value = [ tval *( 1*(WSP / FWS) tval ) ]
fn tag_value(input: &str) -> IResult<&str, String> {
    match opt(take_while1(is_valchar))(input)? {
        (input, Some(start)) => fold_many0(
            preceded(fws, take_while1(is_valchar)),
            || start.to_owned(),
            |mut acc: String, item| {
                acc += item;
                acc
            },
        )(input),
        (input, None) => Ok((input, String::new())),
    }
}

fn raw_tag_value(input: &str) -> IResult<&str, String> {
    match opt(take_while1(is_valchar))(input)? {
        (input, Some(start)) => fold_many0(
            pair(fws, take_while1(is_valchar)),
            || start.to_owned(),
            |mut acc: String, (ws, item)| {
                acc += ws;
                acc += item;
                acc
            },
        )(input),
        (input, None) => Ok((input, String::new())),
    }
}

/// Folding whitespace: runs of WSP, possibly spanning folded lines
fn fws(input: &str) -> IResult<&str, &str> {
    take_while1(|c| c == ' ' || c == '\t' || c == '\r' || c == '\n')(input)
}

/// A parsed tag list with original ordering, rejecting duplicates.
#[derive(Clone, Debug, Default)]
pub(crate) struct TagMap {
    tags: IndexMap<String, Tag>,
}

impl TagMap {
    /// Parse a DKIM-Signature header value
    pub fn from_signature(value: &str) -> Result<Self, DKIMError> {
        Self::build(value, |err| DKIMError::IllformedTagSpec(err), |name| {
            DKIMError::DuplicateTag(name)
        })
    }

    /// Parse key record TXT RDATA
    pub fn from_key_record(value: &str) -> Result<Self, DKIMError> {
        Self::build(value, |err| DKIMError::KeyIllformedTagSpec(err), |name| {
            DKIMError::KeyDuplicateTag(name)
        })
    }

    fn build(
        value: &str,
        illformed: impl Fn(String) -> DKIMError,
        duplicate: impl Fn(String) -> DKIMError,
    ) -> Result<Self, DKIMError> {
        let (_, tags) =
            all_consuming(tag_list)(value).map_err(|err| illformed(err.to_string()))?;

        let mut map = IndexMap::new();
        for tag in tags {
            if map.insert(tag.name.clone(), tag.clone()).is_some() {
                return Err(duplicate(tag.name));
            }
        }
        Ok(Self { tags: map })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|t| t.value.as_str())
    }

    pub fn get_raw(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(|t| t.raw_value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list() {
        assert_eq!(
            tag_list("a = a/1@.-:= ").unwrap(),
            (
                "",
                vec![Tag {
                    name: "a".to_string(),
                    value: "a/1@.-:=".to_string(),
                    raw_value: "a/1@.-:=".to_string()
                }]
            )
        );
        assert_eq!(
            tag_list("a= a ; b = a\r\n    bc").unwrap(),
            (
                "",
                vec![
                    Tag {
                        name: "a".to_string(),
                        value: "a".to_string(),
                        raw_value: "a".to_string()
                    },
                    Tag {
                        name: "b".to_string(),
                        value: "abc".to_string(),
                        raw_value: "a\r\n    bc".to_string()
                    }
                ]
            )
        );
    }

    #[test]
    fn test_tag_spec() {
        assert_eq!(
            tag_spec("a=b c d e f").unwrap(),
            (
                "",
                Tag {
                    name: "a".to_string(),
                    value: "bcdef".to_string(),
                    raw_value: "b c d e f".to_string()
                }
            )
        );
    }

    #[test]
    fn trailing_semicolon_is_accepted() {
        let (rest, tags) = tag_list("v=1; a=rsa-sha256;").unwrap();
        assert_eq!(rest, "");
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn dns_key_shape() {
        let (_, tags) = tag_list("k=rsa; p=kEy+/").unwrap();
        assert_eq!(tags[1].value, "kEy+/");
    }

    #[test]
    fn duplicates_are_rejected() {
        assert_eq!(
            TagMap::from_signature("a=1; b=2; a=3").unwrap_err(),
            DKIMError::DuplicateTag("a".to_string())
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            TagMap::from_signature("==="),
            Err(DKIMError::IllformedTagSpec(_))
        ));
        assert!(matches!(
            TagMap::from_signature("a=b; ; c=d"),
            Err(DKIMError::IllformedTagSpec(_))
        ));
    }

    #[test]
    fn round_trip_preserves_structure() {
        let input = "v=1; a=rsa-sha256; d=example.net; s=brisbane";
        let map = TagMap::from_signature(input).unwrap();
        assert_eq!(map.get("v"), Some("1"));
        assert_eq!(map.get("a"), Some("rsa-sha256"));
        assert_eq!(map.get("d"), Some("example.net"));
        assert_eq!(map.get("s"), Some("brisbane"));
        assert_eq!(map.get("missing"), None);
    }
}
