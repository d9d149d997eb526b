use crate::lexer::TokenKind;

use super::Compiler;

/// Binding power, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    pub(crate) fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

pub(crate) type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

pub(crate) struct ParseRule<'src> {
    pub prefix: Option<ParseFn<'src>>,
    pub infix: Option<ParseFn<'src>>,
    pub precedence: Precedence,
}

impl<'src> ParseRule<'src> {
    fn new(prefix: Option<ParseFn<'src>>, infix: Option<ParseFn<'src>>, precedence: Precedence) -> Self {
        ParseRule { prefix, infix, precedence }
    }
}

/// Pratt table entry for `kind`.
pub(crate) fn rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use Precedence as P;
    match kind {
        TokenKind::LeftParen => ParseRule::new(Some(Compiler::grouping), Some(Compiler::call), P::Call),
        TokenKind::Dot => ParseRule::new(None, Some(Compiler::dot), P::Call),
        TokenKind::Minus => ParseRule::new(Some(Compiler::unary), Some(Compiler::binary), P::Term),
        TokenKind::Plus => ParseRule::new(None, Some(Compiler::binary), P::Term),
        TokenKind::Slash | TokenKind::Star => ParseRule::new(None, Some(Compiler::binary), P::Factor),
        TokenKind::Bang => ParseRule::new(Some(Compiler::unary), None, P::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => {
            ParseRule::new(None, Some(Compiler::binary), P::Equality)
        }
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            ParseRule::new(None, Some(Compiler::binary), P::Comparison)
        }
        TokenKind::Identifier => ParseRule::new(Some(Compiler::variable), None, P::None),
        TokenKind::String => ParseRule::new(Some(Compiler::string), None, P::None),
        TokenKind::Number => ParseRule::new(Some(Compiler::number), None, P::None),
        TokenKind::And => ParseRule::new(None, Some(Compiler::and), P::And),
        TokenKind::Or => ParseRule::new(None, Some(Compiler::or), P::Or),
        TokenKind::False | TokenKind::Nil | TokenKind::True => {
            ParseRule::new(Some(Compiler::literal), None, P::None)
        }
        TokenKind::Super => ParseRule::new(Some(Compiler::super_), None, P::None),
        TokenKind::This => ParseRule::new(Some(Compiler::this), None, P::None),
        _ => ParseRule::new(None, None, P::None),
    }
}
