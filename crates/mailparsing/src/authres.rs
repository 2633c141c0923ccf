//! Parser and printer for Authentication-Results header values per
//! RFC 8601, with an optional relaxed mode that tolerates common
//! real-world deviations: non-ASCII property values, unquoted values
//! containing `/`, and a trailing `;`.

use crate::nom_utils::{explain_nom, make_span, IResult, Span};
use crate::rfc5322::{cfws, quoted_string};
use crate::{MailParsingError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::char;
use nom::combinator::{all_consuming, map, opt};
use nom::error::context;
use nom::multi::many1;
use nom::sequence::{preceded, tuple};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseMode {
    Strict,
    Relaxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResults {
    pub serv_id: String,
    pub version: Option<u32>,
    pub results: Vec<AuthenticationResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub method: String,
    pub method_version: Option<u32>,
    pub result: String,
    pub reason: Option<String>,
    pub props: BTreeMap<String, String>,
}

pub(crate) fn parse_header_value<'a>(
    text: &'a str,
    mode: ParseMode,
) -> Result<AuthenticationResults> {
    let input = make_span(text);
    match all_consuming(move |i: Span<'a>| authentication_results(i, mode))(input) {
        Ok((_, result)) => Ok(result),
        Err(err) => Err(MailParsingError::HeaderParse(explain_nom(err))),
    }
}

fn is_tspecial(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']' | '?' | '='
    )
}

fn is_token(c: char) -> bool {
    c.is_ascii_graphic() && !is_tspecial(c)
}

// In relaxed mode a bare value may contain '/' (seen in the wild for
// method versions spelled into values) and non-ASCII text.
fn is_relaxed_token(c: char) -> bool {
    (c.is_ascii_graphic() && (!is_tspecial(c) || c == '/')) || (c as u32) >= 0x80
}

fn value(input: Span, mode: ParseMode) -> IResult<Span, String> {
    let token = match mode {
        ParseMode::Strict => is_token as fn(char) -> bool,
        ParseMode::Relaxed => is_relaxed_token as fn(char) -> bool,
    };
    context(
        "value",
        alt((map(take_while1(token), |s: Span| s.to_string()), quoted_string)),
    )(input)
}

fn keyword(input: Span) -> IResult<Span, String> {
    context(
        "keyword",
        map(
            take_while1(|c: char| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_')),
            |s: Span| s.to_string(),
        ),
    )(input)
}

fn methodversion(input: Span) -> IResult<Span, u32> {
    context(
        "methodversion",
        preceded(
            tuple((opt(cfws), char('/'), opt(cfws))),
            nom::character::complete::u32,
        ),
    )(input)
}

fn methodspec(input: Span) -> IResult<Span, (String, Option<u32>, String)> {
    context(
        "methodspec",
        map(
            tuple((
                opt(cfws),
                tuple((keyword, opt(methodversion))),
                opt(cfws),
                char('='),
                opt(cfws),
                keyword,
            )),
            |(_, (method, method_version), _, _, _, result)| (method, method_version, result),
        ),
    )(input)
}

// RFC 8601 allows a pvalue to be a bare domain, `local@domain` or
// `@domain` in addition to a plain value; covering those shapes means
// admitting '@' into the token set.
fn pvalue(input: Span, mode: ParseMode) -> IResult<Span, String> {
    let token = match mode {
        ParseMode::Strict => (|c| is_token(c) || c == '@') as fn(char) -> bool,
        ParseMode::Relaxed => (|c| is_relaxed_token(c) || c == '@') as fn(char) -> bool,
    };
    context(
        "pvalue",
        alt((map(take_while1(token), |s: Span| s.to_string()), quoted_string)),
    )(input)
}

fn reasonspec(input: Span, mode: ParseMode) -> IResult<Span, String> {
    context(
        "reasonspec",
        map(
            tuple((
                tag("reason"),
                opt(cfws),
                char('='),
                opt(cfws),
                move |i| value(i, mode),
            )),
            |(_, _, _, _, value)| value,
        ),
    )(input)
}

fn propspec(input: Span, mode: ParseMode) -> IResult<Span, (String, String)> {
    context(
        "propspec",
        map(
            tuple((
                opt(cfws),
                keyword,
                opt(cfws),
                char('.'),
                opt(cfws),
                keyword,
                opt(cfws),
                char('='),
                opt(cfws),
                move |i| pvalue(i, mode),
                opt(cfws),
            )),
            |(_, ptype, _, _, _, property, _, _, _, value, _)| {
                (format!("{ptype}.{property}"), value)
            },
        ),
    )(input)
}

fn resinfo(input: Span, mode: ParseMode) -> IResult<Span, AuthenticationResult> {
    context(
        "resinfo",
        map(
            tuple((
                opt(cfws),
                char(';'),
                methodspec,
                opt(preceded(cfws, move |i| reasonspec(i, mode))),
                opt(many1(move |i| propspec(i, mode))),
            )),
            |(_, _, (method, method_version, result), reason, props)| AuthenticationResult {
                method,
                method_version,
                result,
                reason,
                props: props.unwrap_or_default().into_iter().collect(),
            },
        ),
    )(input)
}

fn no_result(input: Span) -> IResult<Span, Vec<AuthenticationResult>> {
    context(
        "no_result",
        map(
            tuple((opt(cfws), char(';'), opt(cfws), tag("none"))),
            |_| vec![],
        ),
    )(input)
}

fn authentication_results(input: Span, mode: ParseMode) -> IResult<Span, AuthenticationResults> {
    let (input, (_, serv_id, version, results, _)) = context(
        "authentication_results",
        tuple((
            opt(cfws),
            move |i| value(i, mode),
            opt(preceded(cfws, nom::character::complete::u32)),
            alt((no_result, many1(move |i| resinfo(i, mode)))),
            opt(cfws),
        )),
    )(input)?;

    // a trailing semicolon is not grammatical but widely emitted
    let (input, _) = match mode {
        ParseMode::Relaxed => opt(tuple((char(';'), opt(cfws))))(input)?,
        ParseMode::Strict => (input, None),
    };

    Ok((
        input,
        AuthenticationResults {
            serv_id,
            version,
            results,
        },
    ))
}

/// Emit a value, quoting it when it contains bytes a bare token cannot carry
fn emit_value_token(value: &str, target: &mut String) {
    let needs_quoting = value.is_empty() || !value.chars().all(|c| is_token(c) || c == '@');
    if needs_quoting {
        target.push('"');
        for c in value.chars() {
            if c == '"' || c == '\\' {
                target.push('\\');
            }
            target.push(c);
        }
        target.push('"');
    } else {
        target.push_str(value);
    }
}

impl AuthenticationResults {
    /// Render as a normalized header value. Parsing the output yields the
    /// same structure that produced it.
    pub fn encode_value(&self) -> String {
        let mut result = match self.version {
            Some(v) => format!("{} {v}", self.serv_id),
            None => self.serv_id.clone(),
        };
        if self.results.is_empty() {
            result.push_str("; none");
        } else {
            for res in &self.results {
                result.push_str(";\r\n\t");
                emit_value_token(&res.method, &mut result);
                if let Some(v) = res.method_version {
                    result.push_str(&format!("/{v}"));
                }
                result.push('=');
                emit_value_token(&res.result, &mut result);
                if let Some(reason) = &res.reason {
                    result.push_str(" reason=");
                    emit_value_token(reason, &mut result);
                }
                for (k, v) in &res.props {
                    result.push_str(&format!("\r\n\t{k}="));
                    emit_value_token(v, &mut result);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> AuthenticationResults {
        parse_header_value(text, ParseMode::Strict).unwrap()
    }

    #[test]
    fn rfc8601_b2_nearly_trivial() {
        let ar = parse("example.org 1; none");
        k9::assert_equal!(ar.serv_id, "example.org");
        k9::assert_equal!(ar.version, Some(1));
        assert!(ar.results.is_empty());
    }

    #[test]
    fn rfc8601_b3_spf() {
        let ar = parse(
            "example.com;\r\n\t spf=pass smtp.mailfrom=example.net",
        );
        assert_eq!(ar.serv_id, "example.com");
        assert_eq!(ar.results.len(), 1);
        assert_eq!(ar.results[0].method, "spf");
        assert_eq!(ar.results[0].result, "pass");
        assert_eq!(
            ar.results[0].props.get("smtp.mailfrom").map(|s| s.as_str()),
            Some("example.net")
        );
    }

    #[test]
    fn rfc8601_b5_multiple_resinfos() {
        let ar = parse(
            "example.com;\r\n\
             \t auth=pass (cram-md5) smtp.auth=sender@example.net;\r\n\
             \t spf=pass smtp.mailfrom=example.net",
        );
        assert_eq!(ar.results.len(), 2);
        assert_eq!(ar.results[0].method, "auth");
        assert_eq!(
            ar.results[0].props.get("smtp.auth").map(|s| s.as_str()),
            Some("sender@example.net")
        );
        assert_eq!(ar.results[1].method, "spf");
    }

    #[test]
    fn dkim_with_header_props() {
        let ar = parse(
            "mx.example.com;\r\n\
             \t dkim=pass header.d=example.com header.i=@example.com header.b=FcZJy0BB",
        );
        let dkim = &ar.results[0];
        assert_eq!(dkim.method, "dkim");
        assert_eq!(dkim.result, "pass");
        assert_eq!(
            dkim.props.get("header.i").map(|s| s.as_str()),
            Some("@example.com")
        );
    }

    #[test]
    fn reason_is_captured() {
        let ar = parse("example.com; dkim=fail reason=\"signature verification failed\" header.d=example.com");
        assert_eq!(
            ar.results[0].reason.as_deref(),
            Some("signature verification failed")
        );
    }

    #[test]
    fn method_version() {
        let ar = parse("example.com; dkim/1=pass header.d=example.com");
        assert_eq!(ar.results[0].method_version, Some(1));
    }

    #[test]
    fn comments_anywhere() {
        let ar = parse("example.com (the mta); dkim = (verified) pass header.d=example.com (good)");
        assert_eq!(ar.results[0].result, "pass");
    }

    #[test]
    fn strict_rejects_trailing_semicolon() {
        assert!(parse_header_value("example.com; dkim=pass header.d=x.com;", ParseMode::Strict)
            .is_err());
        assert!(parse_header_value("example.com; dkim=pass header.d=x.com;", ParseMode::Relaxed)
            .is_ok());
    }

    #[test]
    fn relaxed_allows_slash_in_value() {
        let relaxed = parse_header_value(
            "example.com; dkim=pass header.b=ab/cd header.d=example.com",
            ParseMode::Relaxed,
        )
        .unwrap();
        assert_eq!(
            relaxed.results[0].props.get("header.b").map(|s| s.as_str()),
            Some("ab/cd")
        );
    }

    #[test]
    fn print_parse_fixpoint() {
        let inputs = [
            "example.org 1; none",
            "example.com; spf=pass smtp.mailfrom=example.net",
            "mx.example.com; dkim=pass reason=\"looks good\" header.d=example.com header.i=@example.com",
            "example.com; auth=pass smtp.auth=sender@example.net; spf=softfail smtp.mailfrom=example.org",
        ];
        for input in inputs {
            let once = parse(input);
            let again = parse(&once.encode_value());
            assert_eq!(once, again, "fixpoint for {input}");
        }
    }
}
