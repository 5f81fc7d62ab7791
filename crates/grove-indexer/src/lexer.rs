//! Tokenizer for `.foo` sources

use std::sync::LazyLock;

use regex::Regex;

/// Kinds of tokens in a `.foo` source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Var,
    Def,
    Ident,
    Semicolon,
    LParen,
    RParen,
    Comma,
    LBrace,
    RBrace,
    /// Any character the grammar does not know
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub offset: usize,
}

impl Token<'_> {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<skip>\s+|//[^\n]*|/\*(?s:.)*?\*/)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|(?P<punct>[;(),{}]))",
    )
    .expect("token pattern is valid")
});

/// Splits `source` into tokens, dropping whitespace and comments.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut offset = 0;
    while offset < source.len() {
        let rest = &source[offset..];
        let Some(captures) = TOKEN.captures(rest) else {
            // Unknown character; emit it whole so multi-byte text stays intact.
            let width = rest.chars().next().map_or(1, char::len_utf8);
            tokens.push(Token {
                kind: TokenKind::Unknown,
                text: &rest[..width],
                offset,
            });
            offset += width;
            continue;
        };
        let Some(matched) = captures.get(0) else {
            break;
        };
        let text = matched.as_str();
        if captures.name("skip").is_none() {
            let kind = if captures.name("ident").is_some() {
                match text {
                    "var" => TokenKind::Var,
                    "def" => TokenKind::Def,
                    _ => TokenKind::Ident,
                }
            } else {
                match text {
                    ";" => TokenKind::Semicolon,
                    "(" => TokenKind::LParen,
                    ")" => TokenKind::RParen,
                    "," => TokenKind::Comma,
                    "{" => TokenKind::LBrace,
                    _ => TokenKind::RBrace,
                }
            };
            tokens.push(Token { kind, text, offset });
        }
        offset += text.len();
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_and_punctuation() {
        assert_eq!(
            kinds("var x; def f(a, b) {}"),
            vec![
                TokenKind::Var,
                TokenKind::Ident,
                TokenKind::Semicolon,
                TokenKind::Def,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::Comma,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = tokenize("// var a;\n/* def g() {} */ var b;");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].text, "b");
        assert_eq!(tokens[1].offset, 31);
    }

    #[test]
    fn test_unknown_characters() {
        assert_eq!(
            kinds("var é;"),
            vec![TokenKind::Var, TokenKind::Unknown, TokenKind::Semicolon]
        );
    }
}
