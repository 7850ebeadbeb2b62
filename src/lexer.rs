use lazy_static::lazy_static;
use regex::Regex;
use tracing::trace;

pub const MAX_TOKENS: usize = 128;
pub const MAX_TOKEN_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Register,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Pos,
    Neg,
    Deref,
    LParen,
    RParen,
}

impl TokenKind {
    /// Binding priority when this token is an operator. Smaller binds looser.
    pub fn priority(self) -> Option<u8> {
        use TokenKind::*;
        match self {
            Or => Some(1),
            And => Some(2),
            Eq | Ne => Some(3),
            Lt | Le | Gt | Ge => Some(4),
            Add | Sub => Some(5),
            Mul | Div => Some(6),
            Pos | Neg | Deref => Some(7),
            Number | Register | LParen | RParen => None,
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, TokenKind::Pos | TokenKind::Neg | TokenKind::Deref)
    }

    /// The unary operator this token acts as when it has no left operand.
    pub fn unary_form(self) -> Option<TokenKind> {
        match self {
            TokenKind::Add | TokenKind::Pos => Some(TokenKind::Pos),
            TokenKind::Sub | TokenKind::Neg => Some(TokenKind::Neg),
            TokenKind::Mul | TokenKind::Deref => Some(TokenKind::Deref),
            _ => None,
        }
    }

    // A `+`, `-` or `*` following one of these is binary
    fn produces_value(self) -> bool {
        matches!(self, TokenKind::Number | TokenKind::Register | TokenKind::RParen)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    NoMatch { position: usize },
    TokenTooLong { position: usize, len: usize },
    TooManyTokens { limit: usize },
}

impl LexError {
    /// Byte range of the input the error points at, if it points anywhere.
    pub fn span(&self, input: &str) -> Option<(usize, usize)> {
        match *self {
            LexError::NoMatch { position } => {
                let len = input[position..].chars().next().map_or(0, |c| c.len_utf8());
                Some((position, position + len))
            }
            LexError::TokenTooLong { position, len } => Some((position, position + len)),
            LexError::TooManyTokens { .. } => None,
        }
    }
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexError::NoMatch { position } => write!(f, "no match at position {position}"),
            LexError::TokenTooLong { position, len } => {
                write!(f, "token at position {position} is {len} bytes long (max {MAX_TOKEN_LEN})")
            }
            LexError::TooManyTokens { limit } => write!(f, "expression has more than {limit} tokens"),
        }
    }
}

impl std::error::Error for LexError {}

enum Rule {
    Skip,
    Glyph(TokenKind),
    // `+`, `-` and `*`: binary kind, unary kind
    Ambiguous(TokenKind, TokenKind),
}

lazy_static! {
    // Tried in order; the first pattern matching at the scan position wins.
    static ref RULES: Vec<(Regex, Rule)> = {
        let table = [
            (r"\s+", Rule::Skip),
            (r"0[xX][0-9a-fA-F]+", Rule::Glyph(TokenKind::Number)),
            (r"[0-9]+", Rule::Glyph(TokenKind::Number)),
            (r"\$[a-zA-Z0-9]+", Rule::Glyph(TokenKind::Register)),
            (r"==", Rule::Glyph(TokenKind::Eq)),
            (r"!=", Rule::Glyph(TokenKind::Ne)),
            (r"<=", Rule::Glyph(TokenKind::Le)),
            (r">=", Rule::Glyph(TokenKind::Ge)),
            (r"&&", Rule::Glyph(TokenKind::And)),
            (r"\|\|", Rule::Glyph(TokenKind::Or)),
            (r"<", Rule::Glyph(TokenKind::Lt)),
            (r">", Rule::Glyph(TokenKind::Gt)),
            (r"\+", Rule::Ambiguous(TokenKind::Add, TokenKind::Pos)),
            (r"-", Rule::Ambiguous(TokenKind::Sub, TokenKind::Neg)),
            (r"\*", Rule::Ambiguous(TokenKind::Mul, TokenKind::Deref)),
            (r"/", Rule::Glyph(TokenKind::Div)),
            (r"\(", Rule::Glyph(TokenKind::LParen)),
            (r"\)", Rule::Glyph(TokenKind::RParen)),
        ];
        table
            .into_iter()
            .map(|(pattern, rule)| {
                let anchored = format!("^(?:{pattern})");
                let re = Regex::new(&anchored)
                    .unwrap_or_else(|e| panic!("regex compilation failed: {e}\n{pattern}"));
                (re, rule)
            })
            .collect()
    };
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut position = 0;

    while position < input.len() {
        let rest = &input[position..];
        let (index, (re, rule), len) = RULES
            .iter()
            .enumerate()
            .find_map(|(index, entry)| {
                entry
                    .0
                    .find(rest)
                    .filter(|m| m.end() > 0)
                    .map(|m| (index, entry, m.end()))
            })
            .ok_or(LexError::NoMatch { position })?;

        let text = &rest[..len];
        trace!(rule = index, pattern = re.as_str(), position, len, text, "lexer match");

        let kind = match *rule {
            Rule::Skip => None,
            Rule::Glyph(kind) => Some(kind),
            Rule::Ambiguous(binary, unary) => {
                let after_value = tokens.last().map_or(false, |t| t.kind.produces_value());
                Some(if after_value { binary } else { unary })
            }
        };

        if let Some(kind) = kind {
            if len > MAX_TOKEN_LEN {
                return Err(LexError::TokenTooLong { position, len });
            }
            if tokens.len() == MAX_TOKENS {
                return Err(LexError::TooManyTokens { limit: MAX_TOKENS });
            }
            tokens.push(Token { kind, text: text.to_string() });
        }

        position += len;
    }

    Ok(tokens)
}
