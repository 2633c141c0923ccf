//! The subset of the RFC 5322 address grammar needed to extract mailboxes
//! from From headers: display names, comments, quoted strings, angle-addr
//! and bare addr-spec forms.

use crate::nom_utils::{explain_nom, make_span, IResult, Span};
use crate::{MailParsingError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize};
use nom::error::context;
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, pair, preceded, separated_pair, tuple};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrSpec {
    pub local_part: String,
    pub domain: String,
}

impl AddrSpec {
    pub fn new(local_part: &str, domain: &str) -> Self {
        Self {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        }
    }

    pub fn parse(email: &str) -> Result<Self> {
        parse_with(email, addr_spec)
    }
}

impl std::fmt::Display for AddrSpec {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}@{}", self.local_part, self.domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: AddrSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxList(pub Vec<Mailbox>);

pub(crate) fn parse_mailbox_list(text: &str) -> Result<MailboxList> {
    parse_with(text, mailbox_list)
}

fn parse_with<'a, R, F>(text: &'a str, parser: F) -> Result<R>
where
    F: Fn(Span<'a>) -> IResult<'a, Span<'a>, R>,
{
    let input = make_span(text);
    match all_consuming(parser)(input) {
        Ok((_, result)) => Ok(result),
        Err(err) => Err(MailParsingError::HeaderParse(explain_nom(err))),
    }
}

fn is_utf8_non_ascii(c: char) -> bool {
    c as u32 >= 0x80
}

// vchar = %x21-7E, plus non-ASCII per RFC 6532
fn is_vchar(c: char) -> bool {
    let u = c as u32;
    (0x21..=0x7e).contains(&u) || is_utf8_non_ascii(c)
}

fn is_atext(c: char) -> bool {
    match c {
        '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
        | '`' | '{' | '|' | '}' | '~' => true,
        c => c.is_ascii_alphanumeric() || is_utf8_non_ascii(c),
    }
}

fn is_qtext(c: char) -> bool {
    match c {
        '\u{21}' | '\u{23}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_utf8_non_ascii(c),
    }
}

fn is_ctext(c: char) -> bool {
    match c {
        '\u{21}'..='\u{27}' | '\u{2a}'..='\u{5b}' | '\u{5d}'..='\u{7e}' => true,
        c => is_utf8_non_ascii(c),
    }
}

fn is_dtext(c: char) -> bool {
    matches!(c, '\u{21}'..='\u{5a}' | '\u{5e}'..='\u{7e}')
}

fn wsp(input: Span) -> IResult<Span, Span> {
    context("wsp", take_while1(|c| c == ' ' || c == '\t'))(input)
}

fn newline(input: Span) -> IResult<Span, Span> {
    context("newline", recognize(preceded(opt(char('\r')), char('\n'))))(input)
}

// fws = ([*wsp crlf] 1*wsp), folded forms included
fn fws(input: Span) -> IResult<Span, Span> {
    context(
        "fws",
        recognize(preceded(many0(preceded(many0(wsp), newline)), many1(wsp))),
    )(input)
}

fn quoted_pair(input: Span) -> IResult<Span, char> {
    context(
        "quoted_pair",
        preceded(char('\\'), satisfy(|c| is_vchar(c) || c == ' ' || c == '\t')),
    )(input)
}

// comment = "(" *([fws] ccontent) [fws] ")", comments may nest
fn comment(input: Span) -> IResult<Span, Span> {
    context(
        "comment",
        recognize(tuple((
            char('('),
            many0(preceded(
                opt(fws),
                alt((
                    recognize(take_while1(is_ctext)),
                    recognize(quoted_pair),
                    comment,
                )),
            )),
            opt(fws),
            char(')'),
        ))),
    )(input)
}

pub(crate) fn cfws(input: Span) -> IResult<Span, Span> {
    context(
        "cfws",
        alt((
            recognize(tuple((many1(preceded(opt(fws), comment)), opt(fws)))),
            fws,
        )),
    )(input)
}

fn atom(input: Span) -> IResult<Span, String> {
    context(
        "atom",
        map(
            delimited(opt(cfws), take_while1(is_atext), opt(cfws)),
            |s: Span| s.to_string(),
        ),
    )(input)
}

fn dot_atom_text(input: Span) -> IResult<Span, String> {
    context(
        "dot_atom_text",
        map(
            recognize(separated_list1(char('.'), take_while1(is_atext))),
            |s: Span| s.to_string(),
        ),
    )(input)
}

fn dot_atom(input: Span) -> IResult<Span, String> {
    context("dot_atom", delimited(opt(cfws), dot_atom_text, opt(cfws)))(input)
}

pub(crate) fn quoted_string(input: Span) -> IResult<Span, String> {
    let (loc, contents) = context(
        "quoted_string",
        delimited(
            preceded(opt(cfws), char('"')),
            many0(pair(
                opt(fws),
                alt((
                    map(take_while1(is_qtext), |s: Span| s.to_string()),
                    map(quoted_pair, |c| c.to_string()),
                )),
            )),
            preceded(opt(fws), preceded(char('"'), opt(cfws))),
        ),
    )(input)?;

    // folding whitespace inside the quotes is semantically a single space
    let mut result = String::new();
    for (fws, piece) in contents {
        if fws.is_some() {
            result.push(' ');
        }
        result.push_str(&piece);
    }
    Ok((loc, result))
}

fn word(input: Span) -> IResult<Span, String> {
    context("word", alt((atom, quoted_string)))(input)
}

fn phrase(input: Span) -> IResult<Span, String> {
    let (loc, words) = context("phrase", many1(word))(input)?;
    Ok((loc, words.join(" ")))
}

fn local_part(input: Span) -> IResult<Span, String> {
    context("local_part", alt((dot_atom, quoted_string)))(input)
}

fn domain_literal(input: Span) -> IResult<Span, String> {
    context(
        "domain_literal",
        map(
            delimited(
                opt(cfws),
                recognize(tuple((
                    char('['),
                    take_while(|c| is_dtext(c) || c == ' ' || c == '\t'),
                    char(']'),
                ))),
                opt(cfws),
            ),
            |s: Span| s.to_string(),
        ),
    )(input)
}

fn domain(input: Span) -> IResult<Span, String> {
    context("domain", alt((dot_atom, domain_literal)))(input)
}

pub(crate) fn addr_spec(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "addr_spec",
        map(
            separated_pair(local_part, char('@'), domain),
            |(local_part, domain)| AddrSpec {
                local_part,
                domain,
            },
        ),
    )(input)
}

fn angle_addr(input: Span) -> IResult<Span, AddrSpec> {
    context(
        "angle_addr",
        delimited(
            preceded(opt(cfws), tag("<")),
            addr_spec,
            preceded(tag(">"), opt(cfws)),
        ),
    )(input)
}

fn name_addr(input: Span) -> IResult<Span, Mailbox> {
    context(
        "name_addr",
        map(tuple((opt(phrase), angle_addr)), |(name, address)| {
            Mailbox { name, address }
        }),
    )(input)
}

fn mailbox(input: Span) -> IResult<Span, Mailbox> {
    context(
        "mailbox",
        alt((
            name_addr,
            map(addr_spec, |address| Mailbox {
                name: None,
                address,
            }),
        )),
    )(input)
}

fn mailbox_list(input: Span) -> IResult<Span, MailboxList> {
    context(
        "mailbox_list",
        map(separated_list1(char(','), mailbox), MailboxList),
    )(input)
}
