use nom::error::{ContextError, ErrorKind};
use nom_locate::LocatedSpan;
use std::fmt::{Debug, Write};

pub(crate) type Span<'a> = LocatedSpan<&'a str>;
pub(crate) type IResult<'a, A, B> = nom::IResult<A, B, ParseError<Span<'a>>>;

pub(crate) fn make_span(s: &str) -> Span {
    Span::new(s)
}

#[derive(Debug)]
pub enum ParseErrorKind {
    Context(&'static str),
    Char(char),
    Nom(ErrorKind),
}

#[derive(Debug)]
pub struct ParseError<I: Debug> {
    pub errors: Vec<(I, ParseErrorKind)>,
}

impl<I: Debug> ContextError<I> for ParseError<I> {
    fn add_context(input: I, ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ParseErrorKind::Context(ctx)));
        other
    }
}

impl<I: Debug> nom::error::ParseError<I> for ParseError<I> {
    fn from_error_kind(input: I, kind: ErrorKind) -> Self {
        Self {
            errors: vec![(input, ParseErrorKind::Nom(kind))],
        }
    }

    fn append(input: I, kind: ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, ParseErrorKind::Nom(kind)));
        other
    }

    fn from_char(input: I, c: char) -> Self {
        Self {
            errors: vec![(input, ParseErrorKind::Char(c))],
        }
    }
}

/// Render a nom error chain as a human readable summary naming the
/// line/column and the context stack that was active at that point.
pub(crate) fn explain_nom(err: nom::Err<ParseError<Span<'_>>>) -> String {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let mut result = String::new();
            for (i, (span, kind)) in e.errors.iter().enumerate() {
                let line = span.location_line();
                let col = span.get_utf8_column();
                let what = match kind {
                    ParseErrorKind::Char(c) => format!("expected '{c}'"),
                    ParseErrorKind::Context(ctx) => format!("in {ctx}"),
                    ParseErrorKind::Nom(k) => format!("in {k:?}"),
                };
                write!(&mut result, "{i}: {what} at line {line} column {col}; ").ok();
            }
            result
        }
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
    }
}
