//! Calculate tool: evaluates arithmetic with a restricted grammar.
//!
//! The expression is tokenized, parsed into a small tree by recursive
//! descent, then interpreted. Only numeric literals, `+ - * / // % **`,
//! unary sign, parentheses and an allow-list of functions and constants
//! are accepted. Integers stay exact until they overflow; `/` always
//! yields a float, `//` and `%` floor toward negative infinity.

use async_trait::async_trait;
use serde::Deserialize;

use scarlett_core::error::ToolError;
use scarlett_core::tool::{Tool, ToolOutput};

/// Largest exponent magnitude `**` will evaluate.
pub const MAX_EXPONENT: f64 = 10_000.0;

/// Longest expression accepted, in characters.
pub const MAX_EXPRESSION_LEN: usize = 1_000;

/// Deepest nesting of parentheses, signs and exponents the parser follows.
const MAX_DEPTH: usize = 100;

/// Largest argument `factorial` accepts.
const MAX_FACTORIAL: i128 = 170;

pub struct CalculateTool;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CalculateArgs {
    expression: String,
}

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression safely. Use when the user asks for calculations."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Math expression to evaluate, e.g. '1024 * 768', 'sqrt(144)', '2**10'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: CalculateArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(ToolOutput::Text(calculate(&args.expression)))
    }
}

/// Evaluate and render the way the model sees it: `"<expr> = <value>"`.
pub fn calculate(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return "Error: Empty expression.".into();
    }

    match evaluate(trimmed) {
        Ok(value) => format!("{trimmed} = {value}"),
        Err(e) => format!("Error evaluating '{expression}': {e}"),
    }
}

/// Parse and evaluate an expression.
pub fn evaluate(expression: &str) -> Result<Number, EvalError> {
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(EvalError::Syntax(format!(
            "expression longer than {MAX_EXPRESSION_LEN} characters"
        )));
    }
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let tree = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(EvalError::Syntax(format!("unexpected {tok}")));
    }

    let value = tree.eval()?;
    match value {
        Number::Float(f) if f.is_nan() => Err(EvalError::Domain),
        Number::Float(f) if f.is_infinite() => Err(EvalError::Overflow),
        v => Ok(v),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("invalid syntax: {0}")]
    Syntax(String),

    #[error("Unsupported name: {0}")]
    UnsupportedName(String),

    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    #[error("Exponent too large")]
    ExponentTooLarge,

    #[error("division by zero")]
    DivisionByZero,

    #[error("math domain error")]
    Domain,

    #[error("result too large")]
    Overflow,

    #[error("{0}")]
    BadArguments(String),
}

// ── Values ────────────────────────────────────────────────────────────────

/// A numeric value: exact integer or IEEE double.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i128),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integral float back to an exact integer when it fits.
    fn integral(f: f64) -> Number {
        if f.is_finite() && f.abs() < 1.0e38 {
            Number::Int(f as i128)
        } else {
            Number::Float(f)
        }
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => f.write_str(&format_float(x)),
        }
    }
}

/// Whole floats keep a `.0`, very large or small ones use exponent form: `12.0`, `0.1`, `1e+20`.
fn format_float(x: f64) -> String {
    let abs = x.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let sci = format!("{x:e}");
        let Some((mantissa, exponent)) = sci.split_once('e') else {
            return sci;
        };
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(d) => ('-', d),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

// ── Tokens ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Name(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    Comma,
    /// Anything else. Reported when the parser reaches it, so a disallowed
    /// name ahead of it is reported first.
    Invalid(char),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Name(n) => write!(f, "name '{n}'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::DoubleStar => f.write_str("'**'"),
            Token::Slash => f.write_str("'/'"),
            Token::DoubleSlash => f.write_str("'//'"),
            Token::Percent => f.write_str("'%'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::Invalid(c) => write!(f, "character '{c}'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let (token, width) = match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' if next == Some('*') => (Token::DoubleStar, 2),
            '*' => (Token::Star, 1),
            '/' if next == Some('/') => (Token::DoubleSlash, 2),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            ',' => (Token::Comma, 1),
            c if c.is_ascii_digit() || c == '.' => {
                let (number, width) = scan_number(&chars[i..])?;
                (Token::Number(number), width)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                    .count();
                (Token::Name(chars[i..i + width].iter().collect()), width)
            }
            c => (Token::Invalid(c), 1),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

/// Scan a numeric literal: `12`, `1.5`, `.5`, `2e10`, `1.5E-3`.
fn scan_number(chars: &[char]) -> Result<(Number, usize), EvalError> {
    let mut len = chars.iter().take_while(|c| c.is_ascii_digit()).count();
    let mut is_float = false;

    if chars.get(len) == Some(&'.') {
        is_float = true;
        len += 1;
        len += chars[len..].iter().take_while(|c| c.is_ascii_digit()).count();
    }

    if matches!(chars.get(len), Some('e' | 'E')) {
        let mut exp_len = 1;
        if matches!(chars.get(len + exp_len), Some('+' | '-')) {
            exp_len += 1;
        }
        let digits = chars[(len + exp_len).min(chars.len())..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .count();
        if digits > 0 {
            is_float = true;
            len += exp_len + digits;
        }
    }

    let text: String = chars[..len].iter().collect();
    if text == "." {
        return Err(EvalError::Syntax("lone '.'".into()));
    }

    let number = if is_float {
        Number::Float(
            text.parse()
                .map_err(|_| EvalError::Syntax(format!("invalid number '{text}'")))?,
        )
    } else {
        match text.parse::<i128>() {
            Ok(i) => Number::Int(i),
            Err(_) => Number::Float(
                text.parse()
                    .map_err(|_| EvalError::Syntax(format!("invalid number '{text}'")))?,
            ),
        }
    };

    Ok((number, len))
}

// ── Tree ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Round,
    Min,
    Max,
    Sqrt,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Ceil,
    Floor,
    Factorial,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Func::Abs,
            "round" => Func::Round,
            "min" => Func::Min,
            "max" => Func::Max,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "log2" => Func::Log2,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "ceil" => Func::Ceil,
            "floor" => Func::Floor,
            "factorial" => Func::Factorial,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Func::Abs => "abs",
            Func::Round => "round",
            Func::Min => "min",
            Func::Max => "max",
            Func::Sqrt => "sqrt",
            Func::Log => "log",
            Func::Log10 => "log10",
            Func::Log2 => "log2",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Ceil => "ceil",
            Func::Floor => "floor",
            Func::Factorial => "factorial",
        }
    }
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(Number),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

// ── Parser ────────────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_term()?));
        }
    }

    // term = unary (('*' | '/' | '//' | '%') unary)*
    fn parse_term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::DoubleSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.parse_unary()?));
        }
    }

    // unary = ('-' | '+') unary | power
    //
    // Every nested paren, sign and exponent passes through here, so this is
    // where recursion depth is bounded.
    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::Syntax("expression nested too deeply".into()));
        }
        self.depth += 1;
        let expr = self.parse_signed();
        self.depth -= 1;
        expr
    }

    fn parse_signed(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_power()
    }

    // power = primary ('**' unary)?
    fn parse_power(&mut self) -> Result<Expr, EvalError> {
        let base = self.parse_primary()?;
        if self.eat(&Token::DoubleStar) {
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    // primary = NUMBER | NAME | NAME '(' args ')' | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Num(n)),
            Some(Token::Name(name)) => {
                if self.eat(&Token::LParen) {
                    let func = Func::from_name(&name).ok_or(EvalError::UnsupportedFunction(name))?;
                    let args = self.parse_args()?;
                    return Ok(Expr::Call(func, args));
                }
                constant(&name)
                    .map(|c| Expr::Num(Number::Float(c)))
                    .ok_or(EvalError::UnsupportedName(name))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(EvalError::Syntax("expected ')'".into()))
                }
            }
            Some(tok) => Err(EvalError::Syntax(format!("unexpected {tok}"))),
            None => Err(EvalError::Syntax("unexpected end of expression".into())),
        }
    }

    // args = (expr (',' expr)*)? ')'
    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            if !self.eat(&Token::Comma) {
                return Err(EvalError::Syntax("expected ',' or ')'".into()));
            }
        }
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────

impl Expr {
    fn eval(&self) -> Result<Number, EvalError> {
        match self {
            Expr::Num(n) => Ok(*n),
            Expr::Neg(inner) => Ok(match inner.eval()? {
                Number::Int(i) => i.checked_neg().map_or(Number::Float(-(i as f64)), Number::Int),
                Number::Float(f) => Number::Float(-f),
            }),
            Expr::Binary(op, left, right) => binary(*op, left.eval()?, right.eval()?),
            Expr::Call(func, args) => {
                let values = args.iter().map(Expr::eval).collect::<Result<Vec<_>, _>>()?;
                call(*func, &values)
            }
        }
    }
}

fn binary(op: BinOp, a: Number, b: Number) -> Result<Number, EvalError> {
    use Number::{Float, Int};

    match op {
        BinOp::Add => Ok(match (a, b) {
            (Int(x), Int(y)) => x.checked_add(y).map_or(Float(x as f64 + y as f64), Int),
            _ => Float(a.as_f64() + b.as_f64()),
        }),
        BinOp::Sub => Ok(match (a, b) {
            (Int(x), Int(y)) => x.checked_sub(y).map_or(Float(x as f64 - y as f64), Int),
            _ => Float(a.as_f64() - b.as_f64()),
        }),
        BinOp::Mul => Ok(match (a, b) {
            (Int(x), Int(y)) => x.checked_mul(y).map_or(Float(x as f64 * y as f64), Int),
            _ => Float(a.as_f64() * b.as_f64()),
        }),
        BinOp::Div => {
            if b.as_f64() == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(Float(a.as_f64() / b.as_f64()))
        }
        BinOp::FloorDiv => match (a, b) {
            (_, Int(0)) => Err(EvalError::DivisionByZero),
            (Int(x), Int(y)) => {
                let q = x.wrapping_div(y);
                let adjust = x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0));
                Ok(Int(if adjust { q - 1 } else { q }))
            }
            _ if b.as_f64() == 0.0 => Err(EvalError::DivisionByZero),
            _ => Ok(Float((a.as_f64() / b.as_f64()).floor())),
        },
        BinOp::Mod => match (a, b) {
            (_, Int(0)) => Err(EvalError::DivisionByZero),
            (Int(x), Int(y)) => {
                let r = x.wrapping_rem(y);
                Ok(Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }))
            }
            _ if b.as_f64() == 0.0 => Err(EvalError::DivisionByZero),
            _ => {
                let (x, y) = (a.as_f64(), b.as_f64());
                let r = x % y;
                Ok(Float(if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }))
            }
        },
        BinOp::Pow => power(a, b),
    }
}

fn power(base: Number, exponent: Number) -> Result<Number, EvalError> {
    if exponent.as_f64().abs() > MAX_EXPONENT {
        return Err(EvalError::ExponentTooLarge);
    }

    match (base, exponent) {
        (Number::Int(b), Number::Int(e)) if e >= 0 => {
            // |e| <= MAX_EXPONENT, so the cast is lossless
            Ok(b.checked_pow(e as u32)
                .map_or_else(|| Number::Float((b as f64).powf(e as f64)), Number::Int))
        }
        _ => {
            let (b, e) = (base.as_f64(), exponent.as_f64());
            if b == 0.0 && e < 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            if b < 0.0 && e.fract() != 0.0 {
                return Err(EvalError::BadArguments("complex results are not supported".into()));
            }
            Ok(Number::Float(b.powf(e)))
        }
    }
}

fn call(func: Func, args: &[Number]) -> Result<Number, EvalError> {
    let name = func.name();
    let one = || match args {
        [x] => Ok(*x),
        _ => Err(EvalError::BadArguments(format!(
            "{name}() takes exactly one argument ({} given)",
            args.len()
        ))),
    };
    let float_fn = |f: fn(f64) -> f64| -> Result<Number, EvalError> { Ok(Number::Float(f(one()?.as_f64()))) };

    match func {
        Func::Abs => Ok(match one()? {
            Number::Int(i) => i.checked_abs().map_or(Number::Float((i as f64).abs()), Number::Int),
            Number::Float(f) => Number::Float(f.abs()),
        }),
        Func::Round => round(args),
        Func::Min | Func::Max => {
            let Some((first, rest)) = args.split_first() else {
                return Err(EvalError::BadArguments(format!("{name}() expected at least 1 argument, got 0")));
            };
            Ok(rest.iter().fold(*first, |best, x| {
                let better = if func == Func::Min {
                    x.as_f64() < best.as_f64()
                } else {
                    x.as_f64() > best.as_f64()
                };
                if better { *x } else { best }
            }))
        }
        Func::Sqrt => {
            let x = one()?.as_f64();
            if x < 0.0 {
                return Err(EvalError::Domain);
            }
            Ok(Number::Float(x.sqrt()))
        }
        Func::Log => {
            let (x, base) = match args {
                [x] => (x.as_f64(), None),
                [x, b] => (x.as_f64(), Some(b.as_f64())),
                _ => {
                    return Err(EvalError::BadArguments(format!(
                        "log() takes 1 or 2 arguments ({} given)",
                        args.len()
                    )));
                }
            };
            if x <= 0.0 || base.is_some_and(|b| b <= 0.0) {
                return Err(EvalError::Domain);
            }
            match base {
                Some(b) if b == 1.0 => Err(EvalError::DivisionByZero),
                Some(b) => Ok(Number::Float(x.ln() / b.ln())),
                None => Ok(Number::Float(x.ln())),
            }
        }
        Func::Log10 | Func::Log2 => {
            let x = one()?.as_f64();
            if x <= 0.0 {
                return Err(EvalError::Domain);
            }
            Ok(Number::Float(if func == Func::Log10 { x.log10() } else { x.log2() }))
        }
        Func::Sin => float_fn(f64::sin),
        Func::Cos => float_fn(f64::cos),
        Func::Tan => float_fn(f64::tan),
        Func::Ceil | Func::Floor => Ok(match one()? {
            Number::Int(i) => Number::Int(i),
            Number::Float(f) if !f.is_finite() => return Err(EvalError::Overflow),
            Number::Float(f) => Number::integral(if func == Func::Ceil { f.ceil() } else { f.floor() }),
        }),
        Func::Factorial => match one()? {
            Number::Int(n) if n < 0 => Err(EvalError::BadArguments(
                "factorial() not defined for negative values".into(),
            )),
            Number::Int(n) if n > MAX_FACTORIAL => Err(EvalError::Overflow),
            Number::Int(n) => Ok(factorial(n)),
            Number::Float(_) => Err(EvalError::BadArguments(
                "factorial() only accepts integral values".into(),
            )),
        },
    }
}

/// Exact while it fits in i128, then continues in floating point.
fn factorial(n: i128) -> Number {
    let mut acc = Number::Int(1);
    for k in 2..=n {
        acc = match acc {
            Number::Int(a) => a.checked_mul(k).map_or(Number::Float(a as f64 * k as f64), Number::Int),
            Number::Float(f) => Number::Float(f * k as f64),
        };
    }
    acc
}

/// `round(x)` rounds half to even and yields an integer;
/// `round(x, n)` keeps the input's type.
fn round(args: &[Number]) -> Result<Number, EvalError> {
    match args {
        [Number::Int(i)] => Ok(Number::Int(*i)),
        [Number::Float(f)] if !f.is_finite() => Err(EvalError::Overflow),
        [Number::Float(f)] => Ok(Number::integral(f.round_ties_even())),
        [x, Number::Int(digits)] => {
            let digits = (*digits).clamp(-300, 300) as i32;
            let scale = 10f64.powi(digits.abs());
            match *x {
                Number::Int(i) if digits >= 0 => Ok(Number::Int(i)),
                Number::Int(i) => Ok(Number::integral((i as f64 / scale).round_ties_even() * scale)),
                Number::Float(f) if digits >= 0 => Ok(Number::Float((f * scale).round_ties_even() / scale)),
                Number::Float(f) => Ok(Number::Float((f / scale).round_ties_even() * scale)),
            }
        }
        [_, Number::Float(_)] => Err(EvalError::BadArguments(
            "round() ndigits must be an integer".into(),
        )),
        _ => Err(EvalError::BadArguments(format!(
            "round() takes 1 or 2 arguments ({} given)",
            args.len()
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
