use num_traits::Num;

use crate::{
    lexer::{self, LexError, Token, TokenKind},
    memory::MemorySource,
    registers::RegisterSource,
    SWord, Word,
};

pub const DEREF_WIDTH: usize = 4;

pub struct EvalContext<'a> {
    pub registers: &'a dyn RegisterSource,
    pub memory: &'a dyn MemorySource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnbalancedParentheses,
    EmptyRange,
    NoOperator,
    UnexpectedToken(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    UnknownRegister(String),
    InvalidNumber(String),
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    Lex(LexError),
    Parse(ParseError),
    Eval(EvalError),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnbalancedParentheses => f.write_str("unbalanced parentheses"),
            ParseError::EmptyRange => f.write_str("missing operand"),
            ParseError::NoOperator => f.write_str("no operator joins the operands"),
            ParseError::UnexpectedToken(text) => write!(f, "unexpected token \"{text}\""),
        }
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::UnknownRegister(name) => write!(f, "unknown register \"{name}\""),
            EvalError::InvalidNumber(text) => write!(f, "\"{text}\" does not fit in a machine word"),
            EvalError::DivisionByZero => f.write_str("division by zero"),
        }
    }
}

impl std::fmt::Display for ExprError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExprError::Lex(e) => write!(f, "Invalid expression: {e}"),
            ExprError::Parse(e) => write!(f, "Invalid expression: {e}"),
            ExprError::Eval(e) => write!(f, "Invalid expression: {e}"),
        }
    }
}

impl std::error::Error for ParseError {}
impl std::error::Error for EvalError {}
impl std::error::Error for ExprError {}

impl From<LexError> for ExprError {
    fn from(value: LexError) -> Self {
        ExprError::Lex(value)
    }
}

impl From<ParseError> for ExprError {
    fn from(value: ParseError) -> Self {
        ExprError::Parse(value)
    }
}

impl From<EvalError> for ExprError {
    fn from(value: EvalError) -> Self {
        ExprError::Eval(value)
    }
}

enum Parens {
    // The first and last tokens are a matching pair around the whole range
    Wrapped,
    NotWrapped,
}

struct Evaluator<'a> {
    tokens: &'a [Token],
    context: &'a EvalContext<'a>,
}

pub fn evaluate_expression(text: &str, context: &EvalContext) -> Result<Word, ExprError> {
    let tokens = lexer::tokenize(text)?;
    if tokens.is_empty() {
        return Err(ParseError::EmptyRange.into());
    }
    evaluate(&tokens, 0, tokens.len() - 1, context)
}

/// Evaluates the inclusive token range `[p, q]`.
pub fn evaluate(tokens: &[Token], p: usize, q: usize, context: &EvalContext) -> Result<Word, ExprError> {
    Evaluator { tokens, context }.eval(p, q)
}

fn parse_number(text: &str) -> Result<Word, EvalError> {
    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    <Word as Num>::from_str_radix(digits, radix).map_err(|_| EvalError::InvalidNumber(text.to_string()))
}

fn truth(cond: bool) -> Word {
    cond as Word
}

impl<'a> Evaluator<'a> {
    fn eval(&self, p: usize, q: usize) -> Result<Word, ExprError> {
        if p > q || q >= self.tokens.len() {
            return Err(ParseError::EmptyRange.into());
        }
        if p == q {
            return self.eval_operand(&self.tokens[p]);
        }
        if let Parens::Wrapped = self.check_parentheses(p, q)? {
            return self.eval(p + 1, q - 1);
        }

        let op = self.dominant_operator(p, q)?;
        let kind = self.tokens[op].kind;
        let left = if op > p {
            self.eval(p, op - 1)
        } else {
            Err(ParseError::EmptyRange.into())
        };
        let right = self.eval(op + 1, q)?;

        match left {
            Ok(left) => self.apply_binary(op, left, right),
            // Any failure on the left is dropped and the operator acts on the right operand alone
            Err(err) => match kind.unary_form() {
                Some(unary) => Ok(self.apply_unary(unary, right)),
                None => Err(err),
            },
        }
    }

    fn eval_operand(&self, token: &Token) -> Result<Word, ExprError> {
        match token.kind {
            TokenKind::Number => Ok(parse_number(&token.text)?),
            TokenKind::Register => {
                let name = token.text.trim_start_matches('$');
                self.context
                    .registers
                    .lookup_register(name)
                    .ok_or_else(|| EvalError::UnknownRegister(name.to_string()).into())
            }
            _ => Err(ParseError::UnexpectedToken(token.text.clone()).into()),
        }
    }

    fn check_parentheses(&self, p: usize, q: usize) -> Result<Parens, ParseError> {
        if self.tokens[p].kind != TokenKind::LParen || self.tokens[q].kind != TokenKind::RParen {
            return Ok(Parens::NotWrapped);
        }
        let mut depth: isize = 0;
        let mut closed_early = false;
        for i in p..=q {
            match self.tokens[i].kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                _ => {}
            }
            if depth == 0 && i < q {
                closed_early = true;
            }
        }
        match (depth, closed_early) {
            (0, false) => Ok(Parens::Wrapped),
            (0, true) => Ok(Parens::NotWrapped),
            _ => Err(ParseError::UnbalancedParentheses),
        }
    }

    // Lowest priority at paren depth zero wins. Binary ties go to the rightmost
    // operator, unary ties to the leftmost. A rightmost unary pick would discard
    // the operators before it along with the failed left range, so `--1` must
    // split at the first `-` to nest as `-(-1)`.
    fn dominant_operator(&self, p: usize, q: usize) -> Result<usize, ParseError> {
        let mut depth = 0usize;
        let mut dominant: Option<(usize, u8)> = None;
        for i in p..=q {
            let kind = self.tokens[i].kind;
            match kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    if depth == 0 {
                        return Err(ParseError::UnbalancedParentheses);
                    }
                    depth -= 1;
                }
                _ if depth > 0 => {}
                _ => {
                    let Some(priority) = kind.priority() else {
                        continue;
                    };
                    let replace = match dominant {
                        None => true,
                        Some((_, best)) if priority < best => true,
                        Some((_, best)) if priority == best => !kind.is_unary(),
                        Some(_) => false,
                    };
                    if replace {
                        dominant = Some((i, priority));
                    }
                }
            }
        }
        if depth != 0 {
            return Err(ParseError::UnbalancedParentheses);
        }
        dominant.map(|(i, _)| i).ok_or(ParseError::NoOperator)
    }

    fn apply_binary(&self, op: usize, left: Word, right: Word) -> Result<Word, ExprError> {
        let value = match self.tokens[op].kind {
            TokenKind::Add => left.wrapping_add(right),
            TokenKind::Sub => left.wrapping_sub(right),
            TokenKind::Mul => left.wrapping_mul(right),
            TokenKind::Div => {
                if right == 0 {
                    return Err(EvalError::DivisionByZero.into());
                }
                (left as SWord).wrapping_div(right as SWord) as Word
            }
            TokenKind::Eq => truth(left == right),
            TokenKind::Ne => truth(left != right),
            TokenKind::Lt => truth((left as SWord) < (right as SWord)),
            TokenKind::Le => truth((left as SWord) <= (right as SWord)),
            TokenKind::Gt => truth((left as SWord) > (right as SWord)),
            TokenKind::Ge => truth((left as SWord) >= (right as SWord)),
            TokenKind::And => truth(left != 0 && right != 0),
            TokenKind::Or => truth(left != 0 || right != 0),
            // A unary operator with a complete operand on its left
            _ => return Err(ParseError::UnexpectedToken(self.tokens[op].text.clone()).into()),
        };
        Ok(value)
    }

    fn apply_unary(&self, kind: TokenKind, operand: Word) -> Word {
        match kind {
            TokenKind::Neg => operand.wrapping_neg(),
            TokenKind::Deref => self.context.memory.read_memory(operand, DEREF_WIDTH),
            _ => operand,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{GuestMemory, MBASE};
    use crate::registers::RegisterFile;

    struct Target {
        regs: RegisterFile,
        mem: GuestMemory,
    }

    impl Target {
        fn new() -> Target {
            let mut regs = RegisterFile::new(MBASE);
            regs.write(2, MBASE + 0x10); // sp
            regs.write(10, 5); // a0
            let mut mem = GuestMemory::new(MBASE, 0x100);
            mem.write(MBASE + 0x10, 4, 0x1234).unwrap();
            mem.write(MBASE + 0x14, 4, MBASE + 0x10).unwrap();
            Target { regs, mem }
        }

        fn eval(&self, text: &str) -> Result<Word, ExprError> {
            let context = EvalContext { registers: &self.regs, memory: &self.mem };
            evaluate_expression(text, &context)
        }
    }

    fn eval(text: &str) -> Result<Word, ExprError> {
        Target::new().eval(text)
    }

    #[test]
    fn literals() {
        assert_eq!(eval("42"), Ok(42));
        assert_eq!(eval("0x10"), Ok(16));
        assert_eq!(eval("0XfF"), Ok(255));
        assert_eq!(eval("4294967295"), Ok(Word::MAX));
        assert_eq!(
            eval("4294967296"),
            Err(ExprError::Eval(EvalError::InvalidNumber("4294967296".to_string())))
        );
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("1+2*3"), Ok(7));
        assert_eq!(eval("(1+2)*3"), Ok(9));
        assert_eq!(eval("1 + 2 == 3 && 4 < 5"), Ok(1));
        assert_eq!(eval("0 || 2 > 1"), Ok(1));
        assert_eq!(eval("1 == 1 != 0"), Ok(1));
    }

    #[test]
    fn same_priority_associates_left() {
        assert_eq!(eval("8-3-2"), Ok(3));
        assert_eq!(eval("64/4/2"), Ok(8));
        assert_eq!(eval("2*3/4"), Ok(1));
    }

    #[test]
    fn unary_binds_tightest() {
        assert_eq!(eval("-1+2"), Ok(1));
        assert_eq!(eval("2*-1"), Ok(-2i32 as Word));
        assert_eq!(eval("1 - -1"), Ok(2));
        assert_eq!(eval("--1"), Ok(1));
        assert_eq!(eval("+-3"), Ok(-3i32 as Word));
        assert_eq!(eval("-(2+3)"), Ok(-5i32 as Word));
    }

    #[test]
    fn outer_parentheses_can_be_stripped() {
        for text in ["1+2*3", "8-3-2", "-1+2", "$a0*2", "(1)+(2)"] {
            let wrapped = format!("({text})");
            assert_eq!(eval(&wrapped), eval(text), "{text}");
        }
        assert_eq!(eval("((((7))))"), Ok(7));
        assert_eq!(eval("(1)+(2)"), Ok(3));
    }

    #[test]
    fn signed_division_and_comparison() {
        assert_eq!(eval("-7/2"), Ok(-3i32 as Word));
        assert_eq!(eval("-1 < 0"), Ok(1));
        assert_eq!(eval("0xffffffff > 1"), Ok(0));
        assert_eq!(eval("-2147483648/-1"), Ok(0x8000_0000));
        assert_eq!(eval("3 <= 3"), Ok(1));
        assert_eq!(eval("3 >= 4"), Ok(0));
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(eval("0xffffffff+2"), Ok(1));
        assert_eq!(eval("0-1"), Ok(Word::MAX));
        assert_eq!(eval("0x10000*0x10000"), Ok(0));
    }

    #[test]
    fn division_by_zero_fails() {
        assert_eq!(eval("5/0"), Err(ExprError::Eval(EvalError::DivisionByZero)));
        assert_eq!(eval("5/(1-1)"), Err(ExprError::Eval(EvalError::DivisionByZero)));
    }

    #[test]
    fn parenthesis_imbalance_fails() {
        let unbalanced = Err(ExprError::Parse(ParseError::UnbalancedParentheses));
        assert_eq!(eval("(1+2"), unbalanced);
        assert_eq!(eval("(1))"), unbalanced);
        assert_eq!(eval("1+2)"), unbalanced);
        assert_eq!(eval("(1))+((2)"), unbalanced);
        assert_eq!(eval("(1"), unbalanced);
    }

    #[test]
    fn malformed_ranges_fail() {
        assert_eq!(eval(""), Err(ExprError::Parse(ParseError::EmptyRange)));
        assert_eq!(eval("()"), Err(ExprError::Parse(ParseError::EmptyRange)));
        assert_eq!(eval("1 2"), Err(ExprError::Parse(ParseError::NoOperator)));
        assert_eq!(eval("1+"), Err(ExprError::Parse(ParseError::EmptyRange)));
        assert_eq!(eval("/2"), Err(ExprError::Parse(ParseError::EmptyRange)));
        assert_eq!(eval("+"), Err(ExprError::Parse(ParseError::UnexpectedToken("+".to_string()))));
        assert!(matches!(eval("1 # 2"), Err(ExprError::Lex(LexError::NoMatch { position: 2 }))));
    }

    #[test]
    fn empty_left_operand_falls_back_to_unary() {
        // The left range "()" fails, so the binary `-` acts as negation.
        assert_eq!(eval("()-1"), Ok(Word::MAX));
        assert_eq!(eval("()*$sp"), Ok(0x1234));
        assert!(eval("()/1").is_err());
    }

    #[test]
    fn registers() {
        assert_eq!(eval("$a0"), Ok(5));
        assert_eq!(eval("$a0 * 2 + $0"), Ok(10));
        assert_eq!(eval("$pc == 0x80000000"), Ok(1));
        let unknown = Err(ExprError::Eval(EvalError::UnknownRegister("rax".to_string())));
        assert_eq!(eval("$rax"), unknown);
        assert_eq!(eval("1 + $rax"), unknown);
        assert_eq!(eval("$rax / 1"), unknown);
    }

    #[test]
    fn failed_left_operand_is_dropped_for_unary_capable_operators() {
        assert_eq!(eval("$bogus-1"), Ok(Word::MAX));
        assert_eq!(eval("$rax - 1"), Ok(Word::MAX));
        assert_eq!(eval("(5/0) - 1"), Ok(-1i32 as Word));
        assert_eq!(eval("4294967296 * $sp"), Ok(0x1234));
        assert_eq!(eval("1 2 + 3"), Ok(3));
        // Operators without a unary form still report the left failure
        assert_eq!(eval("(5/0) / 1"), Err(ExprError::Eval(EvalError::DivisionByZero)));
        assert_eq!(eval("$rax == 1"), Err(ExprError::Eval(EvalError::UnknownRegister("rax".to_string()))));
    }

    #[test]
    fn dereference_reads_a_word() {
        assert_eq!(eval("*$sp"), Ok(0x1234));
        assert_eq!(eval("*($sp + 4)"), Ok(MBASE + 0x10));
        assert_eq!(eval("**($sp + 4)"), Ok(0x1234));
        assert_eq!(eval("-*$sp"), Ok(0x1234u32.wrapping_neg()));
        assert_eq!(eval("*$sp * 2"), Ok(0x2468));
    }

    #[test]
    fn sub_ranges_evaluate_independently() {
        let target = Target::new();
        let context = EvalContext { registers: &target.regs, memory: &target.mem };
        let tokens = lexer::tokenize("(1+2)*(3+4)").unwrap();
        assert_eq!(evaluate(&tokens, 0, 4, &context), Ok(3));
        assert_eq!(evaluate(&tokens, 6, 10, &context), Ok(7));
        assert_eq!(evaluate(&tokens, 0, 10, &context), Ok(21));
        assert_eq!(
            evaluate(&tokens, 5, 4, &context),
            Err(ExprError::Parse(ParseError::EmptyRange))
        );
    }
}
