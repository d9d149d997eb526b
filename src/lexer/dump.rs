use super::{Token, TokenKind};

/// Upper-snake name used by the token dump.
pub fn kind_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::LeftParen => "LEFT_PAREN",
        TokenKind::RightParen => "RIGHT_PAREN",
        TokenKind::LeftBrace => "LEFT_BRACE",
        TokenKind::RightBrace => "RIGHT_BRACE",
        TokenKind::Comma => "COMMA",
        TokenKind::Dot => "DOT",
        TokenKind::Minus => "MINUS",
        TokenKind::Plus => "PLUS",
        TokenKind::Semicolon => "SEMICOLON",
        TokenKind::Slash => "SLASH",
        TokenKind::Star => "STAR",
        TokenKind::Bang => "BANG",
        TokenKind::BangEqual => "BANG_EQUAL",
        TokenKind::Equal => "EQUAL",
        TokenKind::EqualEqual => "EQUAL_EQUAL",
        TokenKind::Greater => "GREATER",
        TokenKind::GreaterEqual => "GREATER_EQUAL",
        TokenKind::Less => "LESS",
        TokenKind::LessEqual => "LESS_EQUAL",
        TokenKind::Identifier => "IDENTIFIER",
        TokenKind::String => "STRING",
        TokenKind::Number => "NUMBER",
        TokenKind::And => "AND",
        TokenKind::Class => "CLASS",
        TokenKind::Else => "ELSE",
        TokenKind::False => "FALSE",
        TokenKind::Fun => "FUN",
        TokenKind::For => "FOR",
        TokenKind::If => "IF",
        TokenKind::Nil => "NIL",
        TokenKind::Or => "OR",
        TokenKind::Print => "PRINT",
        TokenKind::Return => "RETURN",
        TokenKind::Super => "SUPER",
        TokenKind::This => "THIS",
        TokenKind::True => "TRUE",
        TokenKind::Var => "VAR",
        TokenKind::While => "WHILE",
        TokenKind::Error(_) => "ERROR",
        TokenKind::Eof => "EOF",
    }
}

/// Render one token as `<TYPE> <lexeme> <literal>`.
///
/// Every field is separated by exactly one space even when empty, so the end
/// token renders as `EOF  null` and an empty string as `STRING "" `. Golden
/// files depend on that spacing.
pub fn format_token(token: &Token<'_>) -> String {
    let literal = match token.kind {
        TokenKind::String => token.lexeme[1..token.lexeme.len() - 1].to_string(),
        TokenKind::Number => java_double(token.lexeme.parse::<f64>().unwrap_or(0.0)),
        _ => "null".to_string(),
    };
    let lexeme = if token.kind == TokenKind::Eof { "" } else { token.lexeme };
    format!("{} {} {}", kind_name(token.kind), lexeme, literal)
}

/// Format a double the way the reference token printer does: always at least
/// one fractional digit, scientific notation outside `[1e-3, 1e7)`.
pub fn java_double(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    let abs = n.abs();
    if n == 0.0 || (1e-3..1e7).contains(&abs) {
        let s = format!("{}", n);
        return if s.contains('.') { s } else { format!("{s}.0") };
    }
    // `{:e}` gives the shortest round-trip mantissa, e.g. `1.5e7` or `1e-5`.
    let sci = format!("{:e}", n);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let mantissa = if mantissa.contains('.') { mantissa.to_string() } else { format!("{mantissa}.0") };
    format!("{mantissa}E{exponent}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::scan;

    fn dump(source: &str) -> Vec<String> {
        scan(source).iter().map(format_token).collect()
    }

    #[test]
    fn identifiers_render_with_null_literal() {
        assert_eq!(
            dump("andy formless _under"),
            vec![
                "IDENTIFIER andy null",
                "IDENTIFIER formless null",
                "IDENTIFIER _under null",
                "EOF  null",
            ]
        );
    }

    #[test]
    fn strings_render_contents_as_literal() {
        assert_eq!(dump("\"\"\n\"string\""), vec!["STRING \"\" ", "STRING \"string\" string", "EOF  null"]);
    }

    #[test]
    fn numbers_render_java_style() {
        assert_eq!(
            dump("123\n123.456\n.456\n123."),
            vec![
                "NUMBER 123 123.0",
                "NUMBER 123.456 123.456",
                "DOT . null",
                "NUMBER 456 456.0",
                "NUMBER 123 123.0",
                "DOT . null",
                "EOF  null",
            ]
        );
    }

    #[test]
    fn keywords_render_upper_snake() {
        assert_eq!(dump("while"), vec!["WHILE while null", "EOF  null"]);
        assert_eq!(dump(">="), vec!["GREATER_EQUAL >= null", "EOF  null"]);
    }

    #[test]
    fn java_double_switches_to_scientific() {
        assert_eq!(java_double(10_000_000.0), "1.0E7");
        assert_eq!(java_double(12_345_678.0), "1.2345678E7");
        assert_eq!(java_double(0.0001), "1.0E-4");
        assert_eq!(java_double(0.5), "0.5");
        assert_eq!(java_double(9_999_999.0), "9999999.0");
    }
}
