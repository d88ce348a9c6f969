//! `calculate`: arithmetic over a restricted expression grammar.
//!
//! The grammar accepts numeric literals, `+ - * / // % **`, unary signs and
//! parentheses. Nothing else is evaluated; names, calls and attribute access
//! are rejected by the tokenizer.
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/' | '//' | '%') unary)*
//! unary  := ('+' | '-') unary | power
//! power  := atom ('**' unary)?
//! atom   := NUMBER | '(' expr ')'
//! ```

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{ToolError, TypedTool, format_float};

/// Longest expression accepted.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest nesting of parentheses and unary operators.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculateArgs {
    /// Arithmetic expression, for example `90 * 68.6`.
    pub expression: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CalculateTool;

#[async_trait]
impl TypedTool for CalculateTool {
    type Args = CalculateArgs;

    const NAME: &'static str = "calculate";
    const DESCRIPTION: &'static str = "Calculate the result of a mathematical expression.";

    async fn run(&self, args: CalculateArgs) -> Result<String, ToolError> {
        evaluate(&args.expression)
            .map(|n| n.to_string())
            .map_err(|e| ToolError::Failed(format!("Error calculating expression: {e}")))
    }
}

/// Result of an evaluation. Integer arithmetic stays integral.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            // Precision loss above 2^53 matches float promotion semantics.
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
        }
    }
}

/// Evaluation failures, rendered into the tool's error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,
    #[error("expression exceeds {MAX_EXPRESSION_LEN} characters")]
    TooLong,
    #[error("expression nests deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("result is not a finite real number")]
    NotFinite,
}

/// Evaluate `expression`.
pub fn evaluate(expression: &str) -> Result<Number, CalcError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong);
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Empty);
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(CalcError::UnexpectedToken(token.describe()));
    }
    match value {
        Number::Float(f) if !f.is_finite() => Err(CalcError::NotFinite),
        other => Ok(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    LParen,
    RParen,
}

impl Token {
    fn describe(self) -> String {
        let text = match self {
            Self::Num(n) => return format!("number {n}"),
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::DoubleSlash => "//",
            Self::Percent => "%",
            Self::DoubleStar => "**",
            Self::LParen => "(",
            Self::RParen => ")",
        };
        format!("'{text}'")
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let (number, end) = scan_number(&chars, i)?;
                i = end;
                tokens.push(Token::Num(number));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' if next == Some('*') => {
                i += 1;
                Token::DoubleStar
            }
            '*' => Token::Star,
            '/' if next == Some('/') => {
                i += 1;
                Token::DoubleSlash
            }
            '/' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(CalcError::UnexpectedChar(other, i)),
        };
        tokens.push(token);
        i += 1;
    }
    Ok(tokens)
}

fn scan_number(chars: &[char], start: usize) -> Result<(Number, usize), CalcError> {
    let mut end = start;
    let mut is_float = false;
    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
        is_float |= chars[end] == '.';
        end += 1;
    }
    if end < chars.len() && matches!(chars[end], 'e' | 'E') {
        let mut exp_end = end + 1;
        if exp_end < chars.len() && matches!(chars[exp_end], '+' | '-') {
            exp_end += 1;
        }
        if exp_end < chars.len() && chars[exp_end].is_ascii_digit() {
            while exp_end < chars.len() && chars[exp_end].is_ascii_digit() {
                exp_end += 1;
            }
            end = exp_end;
            is_float = true;
        }
    }
    let text: String = chars[start..end].iter().collect();
    let number = if is_float {
        text.parse::<f64>()
            .map(Number::Float)
            .map_err(|_| CalcError::InvalidNumber(text.clone()))?
    } else {
        text.parse::<i64>()
            .map(Number::Int)
            .map_err(|_| CalcError::Overflow)?
    };
    Ok((number, end))
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Number, CalcError> {
        let mut lhs = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Number, CalcError> {
        let mut lhs = self.unary()?;
        while let Some(
            op @ (Token::Star | Token::Slash | Token::DoubleSlash | Token::Percent),
        ) = self.peek()
        {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Number, CalcError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(value)
            }
            Some(Token::Minus) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                negate(value)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Number, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(Token::DoubleStar) {
            self.pos += 1;
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return pow(base, exponent);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, CalcError> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                self.descend()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(CalcError::UnexpectedToken(other.describe())),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(other) => Err(CalcError::UnexpectedToken(other.describe())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

fn negate(value: Number) -> Result<Number, CalcError> {
    match value {
        Number::Int(i) => i.checked_neg().map(Number::Int).ok_or(CalcError::Overflow),
        Number::Float(f) => Ok(Number::Float(-f)),
    }
}

fn binary(op: Token, lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    let result = match (lhs, rhs) {
        (Number::Int(a), Number::Int(b)) => int_binary(op, a, b)?,
        _ => float_binary(op, lhs.as_f64(), rhs.as_f64())?,
    };
    match result {
        Number::Float(f) if !f.is_finite() => Err(CalcError::NotFinite),
        other => Ok(other),
    }
}

fn int_binary(op: Token, a: i64, b: i64) -> Result<Number, CalcError> {
    let value = match op {
        Token::Plus => a.checked_add(b),
        Token::Minus => a.checked_sub(b),
        Token::Star => a.checked_mul(b),
        Token::Slash => {
            return float_binary(op, Number::Int(a).as_f64(), Number::Int(b).as_f64());
        }
        Token::DoubleSlash => {
            if b == 0 {
                return Err(CalcError::DivisionByZero);
            }
            // Floor toward negative infinity.
            a.checked_div(b).map(|q| {
                if a % b != 0 && ((a < 0) != (b < 0)) {
                    q - 1
                } else {
                    q
                }
            })
        }
        Token::Percent => {
            if b == 0 {
                return Err(CalcError::DivisionByZero);
            }
            // Result takes the sign of the divisor.
            a.checked_rem(b).map(|r| {
                if r != 0 && ((r < 0) != (b < 0)) {
                    r + b
                } else {
                    r
                }
            })
        }
        _ => return Err(CalcError::UnexpectedToken(op.describe())),
    };
    value.map(Number::Int).ok_or(CalcError::Overflow)
}

fn float_binary(op: Token, a: f64, b: f64) -> Result<Number, CalcError> {
    let value = match op {
        Token::Plus => a + b,
        Token::Minus => a - b,
        Token::Star => a * b,
        Token::Slash | Token::DoubleSlash | Token::Percent if b == 0.0 => {
            return Err(CalcError::DivisionByZero);
        }
        Token::Slash => a / b,
        Token::DoubleSlash => (a / b).floor(),
        Token::Percent => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        _ => return Err(CalcError::UnexpectedToken(op.describe())),
    };
    Ok(Number::Float(value))
}

fn pow(base: Number, exponent: Number) -> Result<Number, CalcError> {
    if let (Number::Int(b), Number::Int(e)) = (base, exponent) {
        if e >= 0 {
            let e = u32::try_from(e).map_err(|_| CalcError::Overflow)?;
            return b.checked_pow(e).map(Number::Int).ok_or(CalcError::Overflow);
        }
    }
    let (b, e) = (base.as_f64(), exponent.as_f64());
    if b == 0.0 && e < 0.0 {
        return Err(CalcError::DivisionByZero);
    }
    let value = b.powf(e);
    if value.is_finite() {
        Ok(Number::Float(value))
    } else {
        Err(CalcError::NotFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::tools::Tool;

    fn eval(expr: &str) -> String {
        evaluate(expr).unwrap().to_string()
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(eval("2+3"), "5");
        assert_eq!(eval("2 + 3 * 4"), "14");
        assert_eq!(eval("(2 + 3) * 4"), "20");
        assert_eq!(eval("2 ** 10"), "1024");
        assert_eq!(eval("7 // 2"), "3");
        assert_eq!(eval("-7 // 2"), "-4");
        assert_eq!(eval("-7 % 3"), "2");
        assert_eq!(eval("7 % -3"), "-2");
    }

    #[test]
    fn float_results_render_with_a_decimal() {
        assert_eq!(eval("90 * 68.6"), "6174.0");
        assert_eq!(eval("90*68.6"), "6174.0");
        assert_eq!(eval("7 / 2"), "3.5");
        assert_eq!(eval("4 / 2"), "2.0");
        assert_eq!(eval("2 ** -1"), "0.5");
        assert_eq!(eval("1.5e3 + 1"), "1501.0");
    }

    #[test]
    fn unary_and_power_precedence() {
        assert_eq!(eval("-2 ** 2"), "-4");
        assert_eq!(eval("2 ** 3 ** 2"), "512");
        assert_eq!(eval("--3"), "3");
        assert_eq!(eval("+-+4"), "-4");
    }

    #[test]
    fn rejects_anything_but_arithmetic() {
        assert_eq!(
            evaluate("__import__('os')"),
            Err(CalcError::UnexpectedChar('_', 0))
        );
        assert!(matches!(evaluate("2 +"), Err(CalcError::UnexpectedEnd)));
        assert!(matches!(evaluate("(1"), Err(CalcError::UnexpectedEnd)));
        assert!(matches!(evaluate("1 2"), Err(CalcError::UnexpectedToken(_))));
        assert_eq!(evaluate("   "), Err(CalcError::Empty));
    }

    #[test]
    fn arithmetic_faults_are_errors() {
        assert_eq!(evaluate("1/0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("1 // 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("5 % 0.0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("2 ** 64"), Err(CalcError::Overflow));
        assert_eq!(evaluate("10.0 ** 400"), Err(CalcError::NotFinite));
        assert_eq!(evaluate("(-8) ** 0.5"), Err(CalcError::NotFinite));
    }

    #[test]
    fn input_limits_are_enforced() {
        let long = "1+".repeat(MAX_EXPRESSION_LEN) + "1";
        assert_eq!(evaluate(&long), Err(CalcError::TooLong));

        let deep = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(evaluate(&deep), Err(CalcError::TooDeep));

        let ok = format!("{}1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(eval(&ok), "1");
    }

    #[tokio::test]
    async fn tool_reports_failures_as_text() {
        let tool = CalculateTool;
        assert_eq!(
            tool.call(json!({"expression": "90 * 68.6"})).await.unwrap(),
            "6174.0"
        );
        let err = tool.call(json!({"expression": "1/0"})).await.unwrap_err();
        assert_eq!(
            err,
            ToolError::Failed("Error calculating expression: division by zero".into())
        );
    }

    #[tokio::test]
    async fn missing_expression_is_an_argument_error() {
        let err = CalculateTool.call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
