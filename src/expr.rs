//! Sandboxed expression engine
//!
//! Widget `if` conditions and playback-rate formulas are author-supplied
//! strings. They are parsed into a small AST and evaluated directly; no
//! general-purpose evaluator ever sees layout content. The grammar covers
//! numbers, quoted strings, unary `-`/`!`, `* /`, `+ -`, comparisons,
//! equality, and `&& ||`. Sensor tokens are substituted by the variable
//! resolver before the text reaches this module.

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ExprError {
    #[error("unexpected character '{0}' in expression")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token at '{0}'")]
    UnexpectedToken(String),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    fn as_number(&self) -> Result<f64, ExprError> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ExprError::NotANumber(s.clone())),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Not,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::NotANumber(text.clone()))?;
                tokens.push(Token::Number(n));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(d) if d == quote => break,
                        Some(d) => text.push(d),
                        None => return Err(ExprError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(text));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    // tolerate the === spelling layouts inherit from JS
                    if chars.peek() == Some(&'=') {
                        chars.next();
                    }
                    tokens.push(Token::EqEq);
                } else {
                    return Err(ExprError::UnexpectedChar('='));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    if chars.peek() == Some(&'=') {
                        chars.next();
                    }
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(ExprError::UnexpectedChar('&'));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(ExprError::UnexpectedChar('|'));
                }
            }
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinOp::Eq,
                Some(Token::NotEq) => BinOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Ge) => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(ExprError::UnexpectedEnd);
                }
                Ok(inner)
            }
            Some(other) => Err(ExprError::UnexpectedToken(format!("{:?}", other))),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn eval_node(expr: &Expr) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Unary(op, inner) => {
            let value = eval_node(inner)?;
            match op {
                UnaryOp::Neg => Ok(Value::Num(-value.as_number()?)),
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            // short-circuit before evaluating the right side
            match op {
                BinOp::And => {
                    let left = eval_node(lhs)?;
                    if !left.truthy() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval_node(rhs)?.truthy()));
                }
                BinOp::Or => {
                    let left = eval_node(lhs)?;
                    if left.truthy() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval_node(rhs)?.truthy()));
                }
                _ => {}
            }

            let left = eval_node(lhs)?;
            let right = eval_node(rhs)?;
            match op {
                BinOp::Add => Ok(Value::Num(left.as_number()? + right.as_number()?)),
                BinOp::Sub => Ok(Value::Num(left.as_number()? - right.as_number()?)),
                BinOp::Mul => Ok(Value::Num(left.as_number()? * right.as_number()?)),
                BinOp::Div => {
                    let divisor = right.as_number()?;
                    if divisor == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    Ok(Value::Num(left.as_number()? / divisor))
                }
                BinOp::Lt => Ok(Value::Bool(left.as_number()? < right.as_number()?)),
                BinOp::Gt => Ok(Value::Bool(left.as_number()? > right.as_number()?)),
                BinOp::Le => Ok(Value::Bool(left.as_number()? <= right.as_number()?)),
                BinOp::Ge => Ok(Value::Bool(left.as_number()? >= right.as_number()?)),
                BinOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
                BinOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
                BinOp::And | BinOp::Or => unreachable!("handled above"),
            }
        }
    }
}

/// String-to-string compares textually; any numeric operand coerces the
/// other side to a number, and an operand that cannot coerce is unequal
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (left.as_number(), right.as_number()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
    }
}

/// Parse and evaluate an expression
pub fn eval(src: &str) -> Result<Value, ExprError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expr()?;
    if let Some(trailing) = parser.peek() {
        return Err(ExprError::UnexpectedToken(format!("{:?}", trailing)));
    }
    eval_node(&ast)
}

/// Evaluate an expression as a visibility condition
pub fn eval_bool(src: &str) -> Result<bool, ExprError> {
    Ok(eval(src)?.truthy())
}

/// Evaluate an expression as a number (playback-rate formulas)
pub fn eval_number(src: &str) -> Result<f64, ExprError> {
    eval(src)?.as_number()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval_number("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(eval_number("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(eval_number("100.0 / 25").unwrap(), 4.0);
        assert_eq!(eval_number("-5 + 3").unwrap(), -2.0);
    }

    #[test]
    fn test_comparisons() {
        assert!(eval_bool("42 > 10").unwrap());
        assert!(eval_bool("10 <= 10").unwrap());
        assert!(!eval_bool("3 >= 4").unwrap());
    }

    #[test]
    fn test_logical_operators() {
        assert!(eval_bool("1 && 2 > 1").unwrap());
        assert!(eval_bool("0 || 5 > 4").unwrap());
        assert!(!eval_bool("0 && 1").unwrap());
        assert!(eval_bool("!0").unwrap());
    }

    #[test]
    fn test_string_equality() {
        assert!(eval_bool("'doom.exe' == 'doom.exe'").unwrap());
        assert!(eval_bool("'doom.exe' != 'hl2.exe'").unwrap());
        // empty string is falsy, like the process sensor when no game runs
        assert!(!eval_bool("''").unwrap());
    }

    #[test]
    fn test_js_spelling_tolerated() {
        assert!(eval_bool("'a' === 'a'").unwrap());
        assert!(eval_bool("1 !== 2").unwrap());
    }

    #[test]
    fn test_numeric_string_coercion() {
        assert!(eval_bool("'42' == 42").unwrap());
        assert!(eval_bool("'42.5' > 40").unwrap());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(eval("2 +"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(eval("foo > 1"), Err(ExprError::UnexpectedChar('f'))));
        assert!(matches!(eval("1 / 0"), Err(ExprError::DivisionByZero)));
        assert!(matches!(
            eval("'abc' > 1"),
            Err(ExprError::NotANumber(_))
        ));
    }
}
