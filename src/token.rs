// ABOUTME: Token kinds and the token record produced by the lexer

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Every lexical kind the language knows about. The keyword and operator
/// partitions are closed sets: 45 keywords, 42 operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // ===== Keywords (45) =====
    // Declarations
    Let,
    Const,
    Func,
    Class,
    Enum,
    Struct,
    Interface,
    // Control flow
    If,
    Else,
    While,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Try,
    Catch,
    Finally,
    Throw,
    Defer,
    // Async (reserved; a parse error when used)
    Async,
    Await,
    // Modules
    Import,
    From,
    Export,
    As,
    // Values
    True,
    False,
    Null,
    Void,
    // OOP
    This,
    Super,
    Static,
    Public,
    Private,
    Protected,
    Extends,
    Implements,
    Abstract,
    // Checks
    In,
    Is,
    Typeof,
    Native,

    // ===== Literals =====
    Identifier,
    Number,
    Str,

    // ===== Operators (42) =====
    // Arithmetic (6)
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    // Comparison (6)
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    // Logical (3)
    And,
    Or,
    Bang,
    // Bitwise (6)
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Lshift,
    Rshift,
    // Assignment (12)
    Assign,
    PlusAssign,
    MinusAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    PowAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    LshiftAssign,
    RshiftAssign,
    // Special (4)
    Dot,
    QDot,
    Arrow,
    Range,
    // Ternary / null (3)
    QQ,
    Question,
    Colon,
    // Increment / decrement (2)
    Inc,
    Dec,

    // ===== Delimiters =====
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Literal payload carried by number tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    Int(i64),
    Float(f64),
    Text(String),
}

/// A single token: kind, source text / literal payload, and 1-based position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: TokenValue,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, value: TokenValue, line: u32, column: u32) -> Self {
        Token {
            kind,
            value,
            line,
            column,
        }
    }

    /// Source text of an identifier, keyword, or string token.
    pub fn text(&self) -> &str {
        match &self.value {
            TokenValue::Text(s) => s,
            _ => "",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            TokenValue::None => write!(f, "{}", self.kind),
            TokenValue::Int(n) => write!(f, "{}({})", self.kind, n),
            TokenValue::Float(n) => write!(f, "{}({})", self.kind, n),
            TokenValue::Text(s) => write!(f, "{}({})", self.kind, s),
        }
    }
}

/// Exactly 45 keywords.
pub const KEYWORDS: [(&str, TokenKind); 45] = [
    ("let", TokenKind::Let),
    ("const", TokenKind::Const),
    ("func", TokenKind::Func),
    ("class", TokenKind::Class),
    ("enum", TokenKind::Enum),
    ("struct", TokenKind::Struct),
    ("interface", TokenKind::Interface),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("for", TokenKind::For),
    ("switch", TokenKind::Switch),
    ("case", TokenKind::Case),
    ("default", TokenKind::Default),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
    ("try", TokenKind::Try),
    ("catch", TokenKind::Catch),
    ("finally", TokenKind::Finally),
    ("throw", TokenKind::Throw),
    ("defer", TokenKind::Defer),
    ("async", TokenKind::Async),
    ("await", TokenKind::Await),
    ("import", TokenKind::Import),
    ("from", TokenKind::From),
    ("export", TokenKind::Export),
    ("as", TokenKind::As),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("null", TokenKind::Null),
    ("void", TokenKind::Void),
    ("this", TokenKind::This),
    ("super", TokenKind::Super),
    ("static", TokenKind::Static),
    ("public", TokenKind::Public),
    ("private", TokenKind::Private),
    ("protected", TokenKind::Protected),
    ("extends", TokenKind::Extends),
    ("implements", TokenKind::Implements),
    ("abstract", TokenKind::Abstract),
    ("in", TokenKind::In),
    ("is", TokenKind::Is),
    ("typeof", TokenKind::Typeof),
    ("native", TokenKind::Native),
];

/// Exactly 42 operators, for documentation and count checks.
pub const OPERATORS: [TokenKind; 42] = [
    TokenKind::Plus,
    TokenKind::Minus,
    TokenKind::Star,
    TokenKind::Slash,
    TokenKind::Percent,
    TokenKind::Power,
    TokenKind::Eq,
    TokenKind::Neq,
    TokenKind::Lt,
    TokenKind::Gt,
    TokenKind::Lte,
    TokenKind::Gte,
    TokenKind::And,
    TokenKind::Or,
    TokenKind::Bang,
    TokenKind::BitAnd,
    TokenKind::BitOr,
    TokenKind::BitXor,
    TokenKind::BitNot,
    TokenKind::Lshift,
    TokenKind::Rshift,
    TokenKind::Assign,
    TokenKind::PlusAssign,
    TokenKind::MinusAssign,
    TokenKind::MulAssign,
    TokenKind::DivAssign,
    TokenKind::ModAssign,
    TokenKind::PowAssign,
    TokenKind::AndAssign,
    TokenKind::OrAssign,
    TokenKind::XorAssign,
    TokenKind::LshiftAssign,
    TokenKind::RshiftAssign,
    TokenKind::Dot,
    TokenKind::QDot,
    TokenKind::Arrow,
    TokenKind::Range,
    TokenKind::QQ,
    TokenKind::Question,
    TokenKind::Colon,
    TokenKind::Inc,
    TokenKind::Dec,
];

/// Keyword lookup used by the lexer's identifier scan.
pub fn keyword_kind(word: &str) -> Option<TokenKind> {
    static TABLE: OnceLock<HashMap<&'static str, TokenKind>> = OnceLock::new();
    TABLE
        .get_or_init(|| KEYWORDS.iter().copied().collect())
        .get(word)
        .copied()
}
