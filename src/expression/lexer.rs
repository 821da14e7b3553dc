//! Tokenizer for `$filter` and `$orderby` text.

use chumsky::prelude::*;
use std::fmt;
use std::ops::Range;

/// Byte range of a token in the source text.
pub type Span = Range<usize>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    /// Property names, function names and keywords (`and`, `eq`, `asc`, ...).
    Ident(String),
    /// Numeric and temporal literals, kept as text until parsing.
    Literal(String),
    /// Quoted string, with `''` already unescaped.
    Str(String),
    /// Typed literal such as `duration'P1D'` or `geography'POINT (1 2)'`.
    Typed(String, String),

    LParen, // (
    RParen, // )
    Comma,  // ,
    Slash,  // /
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Literal(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "'{}'", s),
            Token::Typed(prefix, s) => write!(f, "{}'{}'", prefix, s),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Slash => write!(f, "/"),
        }
    }
}

fn is_literal_body(c: &char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | ':' | '.' | 'T' | 'Z' | '+' | '/' | 'e' | 'E')
}

fn is_literal_suffix(c: &char) -> bool {
    matches!(c, 'm' | 'M' | 'd' | 'D' | 'f' | 'F' | 'l' | 'L')
}

pub fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = Simple<char>> {
    let quoted = just('\'')
        .ignore_then(
            choice((just("''").to('\''), filter(|c: &char| *c != '\'')))
                .repeated()
                .collect::<String>(),
        )
        .then_ignore(just('\''));

    // Numbers, dates, times, datetimes and start/end intervals share one
    // character class; the parser tells them apart.
    let literal = just('-')
        .or_not()
        .then(filter(|c: &char| c.is_ascii_digit()))
        .then(filter(is_literal_body).repeated())
        .then(filter(is_literal_suffix).or_not())
        .map(|(((sign, first), body), suffix)| {
            let mut text = String::new();
            text.extend(sign);
            text.push(first);
            text.extend(body);
            text.extend(suffix);
            Token::Literal(text)
        });

    let word = filter(|c: &char| c.is_ascii_alphabetic() || matches!(c, '_' | '@' | '$'))
        .then(filter(|c: &char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.')).repeated())
        .map(|(first, rest)| std::iter::once(first).chain(rest).collect::<String>())
        .then(quoted.clone().or_not())
        .map(|(word, text)| match text {
            Some(text) => Token::Typed(word, text),
            None => Token::Ident(word),
        });

    let punctuation = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just(',').to(Token::Comma),
        just('/').to(Token::Slash),
    ));

    choice((literal, word, quoted.map(Token::Str), punctuation))
        .map_with_span(|token, span| (token, span))
        .padded()
        .repeated()
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        lexer()
            .parse(input)
            .unwrap()
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn test_lex_comparison() {
        assert_eq!(
            tokens("result gt 5.5"),
            vec![
                Token::Ident("result".into()),
                Token::Ident("gt".into()),
                Token::Literal("5.5".into()),
            ]
        );
    }

    #[test]
    fn test_lex_strings_and_typed_literals() {
        assert_eq!(
            tokens("name eq 'it''s' or geo.intersects(location, geography'POINT (1 2)')"),
            vec![
                Token::Ident("name".into()),
                Token::Ident("eq".into()),
                Token::Str("it's".into()),
                Token::Ident("or".into()),
                Token::Ident("geo.intersects".into()),
                Token::LParen,
                Token::Ident("location".into()),
                Token::Comma,
                Token::Typed("geography".into(), "POINT (1 2)".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_lex_temporal_literals() {
        assert_eq!(
            tokens("2020-01-01T00:00:00+01:00/2020-01-02T00:00:00Z -3 1.5M"),
            vec![
                Token::Literal("2020-01-01T00:00:00+01:00/2020-01-02T00:00:00Z".into()),
                Token::Literal("-3".into()),
                Token::Literal("1.5M".into()),
            ]
        );
    }

    #[test]
    fn test_lex_path() {
        assert_eq!(
            tokens("Datastream/Thing/@iot.id"),
            vec![
                Token::Ident("Datastream".into()),
                Token::Slash,
                Token::Ident("Thing".into()),
                Token::Slash,
                Token::Ident("@iot.id".into()),
            ]
        );
    }

    #[test]
    fn test_lex_rejects_unterminated_string() {
        assert!(lexer().parse("name eq 'open").is_err());
    }
}
