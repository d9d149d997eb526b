pub mod dump;

use logos::Logos;

/// Raw lexemes recognised by logos. Line tracking, keyword mapping and error
/// tokens are layered on top by [`Scanner`].
#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
enum Raw {
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("+")]
    Plus,
    #[token(";")]
    Semicolon,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,

    #[token("!")]
    Bang,
    #[token("!=")]
    BangEqual,
    #[token("=")]
    Equal,
    #[token("==")]
    EqualEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,

    #[token("and")]
    And,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("fun")]
    Fun,
    #[token("if")]
    If,
    #[token("nil")]
    Nil,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("var")]
    Var,
    #[token("while")]
    While,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,
    #[regex(r#""[^"]*""#)]
    String,
    // Longest match means this only wins when the closing quote is missing.
    #[regex(r#""[^"]*"#)]
    UnterminatedString,
    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,

    #[token("\n")]
    Newline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("Unexpected character.")]
    UnexpectedCharacter,
    #[error("Unterminated string.")]
    UnterminatedString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    Identifier,
    String,
    Number,

    And,
    Class,
    Else,
    False,
    Fun,
    For,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    Error(ScanError),
    Eof,
}

impl From<Raw> for TokenKind {
    fn from(raw: Raw) -> Self {
        match raw {
            Raw::LeftParen => TokenKind::LeftParen,
            Raw::RightParen => TokenKind::RightParen,
            Raw::LeftBrace => TokenKind::LeftBrace,
            Raw::RightBrace => TokenKind::RightBrace,
            Raw::Comma => TokenKind::Comma,
            Raw::Dot => TokenKind::Dot,
            Raw::Minus => TokenKind::Minus,
            Raw::Plus => TokenKind::Plus,
            Raw::Semicolon => TokenKind::Semicolon,
            Raw::Slash => TokenKind::Slash,
            Raw::Star => TokenKind::Star,
            Raw::Bang => TokenKind::Bang,
            Raw::BangEqual => TokenKind::BangEqual,
            Raw::Equal => TokenKind::Equal,
            Raw::EqualEqual => TokenKind::EqualEqual,
            Raw::Greater => TokenKind::Greater,
            Raw::GreaterEqual => TokenKind::GreaterEqual,
            Raw::Less => TokenKind::Less,
            Raw::LessEqual => TokenKind::LessEqual,
            Raw::And => TokenKind::And,
            Raw::Class => TokenKind::Class,
            Raw::Else => TokenKind::Else,
            Raw::False => TokenKind::False,
            Raw::For => TokenKind::For,
            Raw::Fun => TokenKind::Fun,
            Raw::If => TokenKind::If,
            Raw::Nil => TokenKind::Nil,
            Raw::Or => TokenKind::Or,
            Raw::Print => TokenKind::Print,
            Raw::Return => TokenKind::Return,
            Raw::Super => TokenKind::Super,
            Raw::This => TokenKind::This,
            Raw::True => TokenKind::True,
            Raw::Var => TokenKind::Var,
            Raw::While => TokenKind::While,
            Raw::Identifier => TokenKind::Identifier,
            Raw::String => TokenKind::String,
            Raw::UnterminatedString => TokenKind::Error(ScanError::UnterminatedString),
            Raw::Number => TokenKind::Number,
            // Filtered out by the scanner before conversion.
            Raw::Newline => TokenKind::Eof,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
}

impl<'src> Token<'src> {
    /// Placeholder used by the compiler before the first token is read.
    pub fn synthetic(lexeme: &'src str) -> Self {
        Token { kind: TokenKind::Eof, lexeme, line: 0 }
    }
}

/// Lazy token stream over one source text. Yields exactly one `Eof` token and
/// then `None`; clone it (or build a new one) to scan again from the start.
#[derive(Clone)]
pub struct Scanner<'src> {
    lexer: logos::Lexer<'src, Raw>,
    line: u32,
    finished: bool,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Scanner { lexer: Raw::lexer(source), line: 1, finished: false }
    }

    /// Next token, or `Eof` forever once the source is exhausted.
    pub fn scan_token(&mut self) -> Token<'src> {
        loop {
            let Some(result) = self.lexer.next() else {
                self.finished = true;
                return Token { kind: TokenKind::Eof, lexeme: "", line: self.line };
            };
            let lexeme = self.lexer.slice();
            let kind = match result {
                Ok(Raw::Newline) => {
                    self.line += 1;
                    continue;
                }
                Ok(raw) => TokenKind::from(raw),
                Err(()) => TokenKind::Error(ScanError::UnexpectedCharacter),
            };
            // Strings may span lines; the token reports the line it ends on.
            self.line += lexeme.bytes().filter(|b| *b == b'\n').count() as u32;
            return Token { kind, lexeme, line: self.line };
        }
    }
}

impl<'src> Iterator for Scanner<'src> {
    type Item = Token<'src>;

    fn next(&mut self) -> Option<Token<'src>> {
        if self.finished {
            return None;
        }
        Some(self.scan_token())
    }
}

/// Scan the whole source eagerly.
pub fn scan(source: &str) -> Vec<Token<'_>> {
    Scanner::new(source).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scan_punctuation_and_operators() {
        assert_eq!(
            kinds("(){};,+-*/ != == <= >= ! = < >"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Star,
                TokenKind::Slash,
                TokenKind::BangEqual,
                TokenKind::EqualEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Bang,
                TokenKind::Equal,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_need_exact_match() {
        assert_eq!(
            kinds("and andy classy class _or"),
            vec![
                TokenKind::And,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Class,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn number_does_not_swallow_trailing_dot() {
        let tokens = scan("123. .5 4.25");
        let got: Vec<(TokenKind, &str)> = tokens.iter().map(|t| (t.kind, t.lexeme)).collect();
        assert_eq!(
            got,
            vec![
                (TokenKind::Number, "123"),
                (TokenKind::Dot, "."),
                (TokenKind::Dot, "."),
                (TokenKind::Number, "5"),
                (TokenKind::Number, "4.25"),
                (TokenKind::Eof, ""),
            ]
        );
    }

    #[test]
    fn comments_and_newlines_advance_lines() {
        let tokens = scan("// header\nvar a;\n\nprint a;");
        assert_eq!(tokens[0].kind, TokenKind::Var);
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[3].kind, TokenKind::Print);
        assert_eq!(tokens[3].line, 4);
    }

    #[test]
    fn multiline_string_reports_closing_line() {
        let tokens = scan("\"a\nb\" x");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "\"a\nb\"");
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn unterminated_string_becomes_error_token() {
        let tokens = scan("print \"oops");
        assert_eq!(tokens[1].kind, TokenKind::Error(ScanError::UnterminatedString));
        assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
    }

    #[test]
    fn unexpected_character_does_not_stop_scanning() {
        let tokens = scan("a | b");
        assert_eq!(tokens[1].kind, TokenKind::Error(ScanError::UnexpectedCharacter));
        assert_eq!(tokens[1].lexeme, "|");
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].lexeme, "b");
    }

    #[test]
    fn scanner_is_restartable() {
        let scanner = Scanner::new("var x = 1;");
        let first: Vec<_> = scanner.clone().collect();
        let second: Vec<_> = scanner.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn eof_repeats_after_end() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
        assert_eq!(scanner.next(), None);
    }
}
