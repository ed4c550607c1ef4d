//! Converts Aml source text into a stream of [`Token`]s.
//!
//! Grounded on the reference `aml/lexer.py`: single-codepoint lookahead with an
//! extra `peek_n` for the handful of multi-character operators, line comments,
//! and the escape-preservation rule that keeps unknown `\x` escapes intact so
//! path-like string literals stay readable without doubled backslashes.

use crate::error::{AmlError, LexResult};
use crate::token::{lookup_keyword, Token, TokenKind};

pub struct Lexer<'a> {
    chars: Vec<char>,
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { chars: src.chars().collect(), src, pos: 0, line: 1, column: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_n(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn at(&self, line: u32, column: u32) -> Token {
        Token::new(TokenKind::Eof, line, column)
    }

    /// Lexes the whole source into a token stream terminated by a single [`TokenKind::Eof`].
    ///
    /// Round-trip idempotence (spec §8): re-concatenating the non-comment,
    /// non-whitespace source spans of the returned tokens and re-tokenizing
    /// yields the same stream, because every branch below consumes exactly the
    /// characters it classifies and nothing is normalized away except
    /// whitespace/comments.
    pub fn tokenize(mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token::new(TokenKind::Eof, line, column));
                break;
            };
            let tok = if c == '\n' {
                self.advance();
                Token::new(TokenKind::Newline, line, column)
            } else if c.is_ascii_digit() {
                self.lex_number(line, column)?
            } else if c == '-' && self.peek_n(1).is_some_and(|d| d.is_ascii_digit()) && self.unary_minus_position(&tokens) {
                self.lex_number(line, column)?
            } else if c == '\'' || c == '"' {
                self.lex_string(c, line, column)?
            } else if c.is_alphabetic() || c == '_' {
                self.lex_identifier(line, column)
            } else {
                self.lex_operator(line, column)?
            };
            tokens.push(tok);
        }
        Ok(tokens)
    }

    /// A leading `-` is only folded into a numeric literal when it cannot be a
    /// binary operator, i.e. at the very start of input or right after a token
    /// that can't end an expression (operators, `(`, `[`, `,`, keywords, newline).
    fn unary_minus_position(&self, tokens: &[Token]) -> bool {
        match tokens.last().map(|t| &t.kind) {
            None => true,
            Some(
                TokenKind::Newline
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Comma
                | TokenKind::Colon
                | TokenKind::Assign
                | TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::SlashSlash
                | TokenKind::StarStar
                | TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::Le
                | TokenKind::Ge
                | TokenKind::AndAnd
                | TokenKind::OrOr
                | TokenKind::Bang
                | TokenKind::Return
                | TokenKind::Raise
                | TokenKind::If
                | TokenKind::While
                | TokenKind::DotDot,
            ) => true,
            _ => false,
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c == ' ' || c == '\t' || c == '\r' => {
                    self.advance();
                }
                Some('/') if self.peek_n(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_number(&mut self, line: u32, column: u32) -> LexResult<Token> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push(self.advance().unwrap());
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let mut is_float = false;
        // A `.` only extends the number when followed by a digit; `..` (range)
        // always wins, per spec §4.1.
        if self.peek() == Some('.') && self.peek_n(1).is_some_and(|d| d.is_ascii_digit()) {
            is_float = true;
            text.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        if is_float {
            let v: f64 = text.parse().map_err(|_| AmlError::syntax(line, column, "invalid float literal"))?;
            Ok(Token::new(TokenKind::Float(v), line, column))
        } else {
            let v: i64 = text.parse().map_err(|_| AmlError::syntax(line, column, "invalid integer literal"))?;
            Ok(Token::new(TokenKind::Integer(v), line, column))
        }
    }

    fn lex_string(&mut self, quote: char, line: u32, column: u32) -> LexResult<Token> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(AmlError::syntax(line, column, "unterminated string literal")),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        None => return Err(AmlError::syntax(line, column, "unterminated string literal")),
                        Some('n') => {
                            value.push('\n');
                            self.advance();
                        }
                        Some('t') => {
                            value.push('\t');
                            self.advance();
                        }
                        Some('r') => {
                            value.push('\r');
                            self.advance();
                        }
                        Some('\\') => {
                            value.push('\\');
                            self.advance();
                        }
                        Some('\'') => {
                            value.push('\'');
                            self.advance();
                        }
                        Some('"') => {
                            value.push('"');
                            self.advance();
                        }
                        Some(other) if other.is_alphanumeric() || other == '.' || other == '_' || other == '/' => {
                            // Unknown escape: keep it verbatim (path-literal ergonomics, §4.1).
                            value.push('\\');
                            value.push(other);
                            self.advance();
                        }
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                            self.advance();
                        }
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::new(TokenKind::Str(value), line, column))
    }

    fn lex_identifier(&mut self, line: u32, column: u32) -> Token {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = lookup_keyword(&text).unwrap_or(TokenKind::Identifier(text));
        Token::new(kind, line, column)
    }

    fn lex_operator(&mut self, line: u32, column: u32) -> LexResult<Token> {
        use TokenKind::*;
        let c = self.advance().unwrap();
        let kind = match c {
            '+' => {
                if self.peek() == Some('=') {
                    self.advance();
                    PlusEq
                } else {
                    Plus
                }
            }
            '-' => {
                if self.peek() == Some('=') {
                    self.advance();
                    MinusEq
                } else {
                    Minus
                }
            }
            '*' => {
                if self.peek() == Some('*') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        StarStarEq
                    } else {
                        StarStar
                    }
                } else if self.peek() == Some('=') {
                    self.advance();
                    StarEq
                } else {
                    Star
                }
            }
            '/' => {
                if self.peek() == Some('/') {
                    self.advance();
                    // `//=` is lexed as SlashSlash then Assign, per spec §4.1 — do
                    // NOT merge the trailing `=` here.
                    SlashSlash
                } else if self.peek() == Some('=') {
                    self.advance();
                    SlashEq
                } else {
                    Slash
                }
            }
            '%' => {
                if self.peek() == Some('=') {
                    self.advance();
                    PercentEq
                } else {
                    Percent
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    EqEq
                } else {
                    Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    NotEq
                } else {
                    Bang
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Le
                } else {
                    Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    Ge
                } else {
                    Gt
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        AndAndEq
                    } else {
                        AndAnd
                    }
                } else {
                    return Err(AmlError::syntax(line, column, "unexpected character '&'"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        OrOrEq
                    } else {
                        OrOr
                    }
                } else {
                    return Err(AmlError::syntax(line, column, "unexpected character '|'"));
                }
            }
            '.' => {
                if self.peek() == Some('.') {
                    self.advance();
                    DotDot
                } else {
                    Dot
                }
            }
            '@' => At,
            ':' => Colon,
            ',' => Comma,
            '(' => LParen,
            ')' => RParen,
            '{' => LBrace,
            '}' => RBrace,
            '[' => LBracket,
            ']' => RBracket,
            other => return Err(AmlError::syntax(line, column, format!("unexpected character '{other}'"))),
        };
        Ok(Token::new(kind, line, column))
    }
}

/// Convenience entry point used by the parser and by `run_source`.
pub fn tokenize(src: &str) -> LexResult<Vec<Token>> {
    Lexer::new(src).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("x").unwrap();
        for t in &tokens {
            assert!(t.line >= 1 && t.column >= 1);
        }
    }

    #[test]
    fn floor_divide_assign_splits_into_two_tokens() {
        let tokens = tokenize("a //= b").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::SlashSlash);
        assert_eq!(tokens[2].kind, TokenKind::Assign);
    }

    #[test]
    fn range_wins_over_trailing_dot() {
        let tokens = tokenize("1..5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Integer(1));
        assert_eq!(tokens[1].kind, TokenKind::DotDot);
        assert_eq!(tokens[2].kind, TokenKind::Integer(5));
    }

    #[test]
    fn unknown_escape_is_preserved_verbatim() {
        let tokens = tokenize(r#""C:\data""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str("C:\\data".to_owned()));
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        assert!(tokenize("\"abc").is_err());
    }

    #[test]
    fn boolean_spellings_unify() {
        let tokens = tokenize("true False").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Boolean(true));
        assert_eq!(tokens[1].kind, TokenKind::Boolean(false));
    }
}
