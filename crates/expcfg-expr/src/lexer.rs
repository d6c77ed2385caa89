//! Tokenizer.

use crate::ExprError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    /// Identifier or dotted path (`max`, `trainer.max_epochs`, `a.0.b`).
    Ident(String),
    /// Body of a nested `${...}`.
    Interpolation(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Int(i) => i.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Ident(s) => s.clone(),
            Token::Interpolation(s) => format!("${{{}}}", s),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::StarStar => "**".into(),
            Token::Slash => "/".into(),
            Token::SlashSlash => "//".into(),
            Token::Percent => "%".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
        }
    }
}

/// Split `src` into tokens paired with their byte offsets.
pub fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            let (token, consumed) = lex_number(&chars[i..])?;
            tokens.push((token, pos));
            i += consumed;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() {
                let ch = chars[i].1;
                let continues_path = ch == '.'
                    && chars
                        .get(i + 1)
                        .is_some_and(|&(_, n)| n.is_ascii_alphanumeric() || n == '_');
                if ch.is_ascii_alphanumeric() || ch == '_' || continues_path {
                    i += 1;
                } else {
                    break;
                }
            }
            let ident: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            tokens.push((Token::Ident(ident), pos));
            continue;
        }

        if c == '$' {
            if next != Some('{') {
                return Err(ExprError::UnexpectedChar { ch: c, pos });
            }
            let (body, consumed) = lex_interpolation(&chars[i..], pos)?;
            tokens.push((Token::Interpolation(body), pos));
            i += consumed;
            continue;
        }

        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::StarStar, 2),
            ('/', Some('/')) => (Token::SlashSlash, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => return Err(ExprError::UnexpectedChar { ch: c, pos }),
        };
        tokens.push((token, pos));
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[(usize, char)]) -> Result<(Token, usize), ExprError> {
    let mut i = 0;
    let mut is_float = false;

    let digits = |i: &mut usize| {
        while *i < chars.len() && (chars[*i].1.is_ascii_digit() || chars[*i].1 == '_') {
            *i += 1;
        }
    };

    digits(&mut i);
    if i < chars.len() && chars[i].1 == '.' {
        is_float = true;
        i += 1;
        digits(&mut i);
    }
    if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j].1, '+' | '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].1.is_ascii_digit() {
            is_float = true;
            i = j;
            digits(&mut i);
        }
    }

    let raw: String = chars[..i].iter().map(|&(_, c)| c).collect();
    let cleaned = raw.replace('_', "");

    let token = if is_float {
        let value: f64 = cleaned
            .parse()
            .map_err(|_| ExprError::InvalidNumber(raw.clone()))?;
        Token::Float(value)
    } else {
        match cleaned.parse::<i64>() {
            Ok(v) => Token::Int(v),
            Err(_) if cleaned.chars().all(|c| c.is_ascii_digit()) && !cleaned.is_empty() => {
                return Err(ExprError::Overflow)
            }
            Err(_) => return Err(ExprError::InvalidNumber(raw)),
        }
    };
    Ok((token, i))
}

/// Scan `${ ... }` honouring nesting and quoted text; returns the body and
/// the number of chars consumed.
fn lex_interpolation(chars: &[(usize, char)], pos: usize) -> Result<(String, usize), ExprError> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = 1;

    while i < chars.len() {
        let c = chars[i].1;
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let body: String = chars[2..i].iter().map(|&(_, c)| c).collect();
                        return Ok((body, i + 1));
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }

    Err(ExprError::UnterminatedInterpolation { pos })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("1 + 2 ** 3 // 4 % 5"),
            vec![
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::StarStar,
                Token::Int(3),
                Token::SlashSlash,
                Token::Int(4),
                Token::Percent,
                Token::Int(5),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1_000"), vec![Token::Int(1000)]);
        assert_eq!(kinds("1e3"), vec![Token::Float(1000.0)]);
        assert_eq!(kinds(".5"), vec![Token::Float(0.5)]);
        assert_eq!(kinds("2."), vec![Token::Float(2.0)]);
    }

    #[test]
    fn test_dotted_identifier() {
        assert_eq!(
            kinds("trainer.max_epochs*2"),
            vec![
                Token::Ident("trainer.max_epochs".into()),
                Token::Star,
                Token::Int(2)
            ]
        );
        assert_eq!(kinds("callbacks.0.patience"), vec![Token::Ident("callbacks.0.patience".into())]);
    }

    #[test]
    fn test_nested_interpolation() {
        assert_eq!(
            kinds("${a.b} + ${oc.env:X,'}'}"),
            vec![
                Token::Interpolation("a.b".into()),
                Token::Plus,
                Token::Interpolation("oc.env:X,'}'".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_interpolation() {
        assert_eq!(
            tokenize("1 + ${a").unwrap_err(),
            ExprError::UnterminatedInterpolation { pos: 4 }
        );
    }

    #[test]
    fn test_rejects_unknown_characters() {
        assert!(matches!(
            tokenize("__import__('os')").unwrap_err(),
            ExprError::UnexpectedChar { ch: '\'', .. }
        ));
        assert!(matches!(
            tokenize("a; b").unwrap_err(),
            ExprError::UnexpectedChar { ch: ';', .. }
        ));
    }

    #[test]
    fn test_integer_overflow() {
        assert_eq!(tokenize("99999999999999999999").unwrap_err(), ExprError::Overflow);
    }
}
