use std::fmt::{Debug, Display};
use std::rc::Rc;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Newline,
    Dollar,
    At,

    // One, two or three character tokens.
    Minus,
    MinusEqual,
    Plus,
    PlusEqual,
    Slash,
    SlashEqual,
    SlashSlash,
    SlashSlashEqual,
    Star,
    StarEqual,
    Mod,
    ModEqual,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    QuestionQuestion,
    QuestionQuestionEqual,

    // Produced by the parser when it folds two keywords into one operator.
    IsNot,
    NotIn,

    // Literals.
    Identifier,
    Str,
    Number,

    // Keywords.
    And,
    Break,
    Class,
    Continue,
    Def,
    Elsif,
    Else,
    End,
    False,
    For,
    If,
    Import,
    In,
    Is,
    Native,
    Nil,
    Not,
    Or,
    Pass,
    Print,
    Raise,
    Rescue,
    Return,
    SelfKw,
    Super,
    True,
    When,
    While,
    Yield,

    Eof,
}

/// Literal payload attached to number and string tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    Str(String),
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Integer(i) => write!(f, "{i}"),
            Literal::Float(n) => write!(f, "{n:?}"),
            Literal::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub line: u32,
    pub file: Rc<str>,
    /// Indentation of the source line this token sits on.
    pub indent: usize,
    pub has_breakpoint: bool,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: &str, literal: Option<Literal>, line: u32) -> Self {
        Self {
            token_type,
            lexeme: lexeme.to_owned(),
            literal,
            line,
            file: Rc::from(""),
            indent: 0,
            has_breakpoint: false,
        }
    }

    /// A token the parser invents while desugaring, positioned at `origin`.
    pub fn synthetic(token_type: TokenType, lexeme: &str, origin: &Token) -> Self {
        Self {
            token_type,
            lexeme: lexeme.to_owned(),
            literal: None,
            line: origin.line,
            file: origin.file.clone(),
            indent: origin.indent,
            has_breakpoint: false,
        }
    }

    pub fn identifier(name: &str, origin: &Token) -> Self {
        Self::synthetic(TokenType::Identifier, name, origin)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {} {:?}", self.token_type, self.lexeme, self.literal)
    }
}
