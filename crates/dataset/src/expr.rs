//! Column-expression evaluator for interaction features.
//!
//! Supports `+`, `-`, `*`, `/`, parentheses, unary negation, numeric
//! literals, and column references by name (e.g. `area / rooms`). Uses a
//! recursive-descent parser. Evaluation is elementwise: a null in any
//! input cell, or a division by zero, yields a null output cell.

use crate::frame::DataFrame;

/// Evaluate an expression against a frame, producing one nullable value
/// per row.
pub fn evaluate(frame: &DataFrame, expr: &str) -> Result<Vec<Option<f64>>, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(&tokens, frame);
    let result = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "Unexpected token at position {}: {:?}",
            parser.pos, parser.tokens[parser.pos]
        ));
    }
    Ok(result.into_rows(frame.n_rows()))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num_str: String = chars[start..i].iter().collect();
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| format!("Invalid number: {}", num_str))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            c => return Err(format!("Unexpected character: '{}'", c)),
        }
    }

    Ok(tokens)
}

/// Either a broadcastable scalar or a full column of nullable values.
enum Operand {
    Scalar(Option<f64>),
    Column(Vec<Option<f64>>),
}

impl Operand {
    fn into_rows(self, n_rows: usize) -> Vec<Option<f64>> {
        match self {
            Operand::Scalar(s) => vec![s; n_rows],
            Operand::Column(c) => c,
        }
    }

    fn apply<F>(self, other: Operand, op: F) -> Operand
    where
        F: Fn(f64, f64) -> Option<f64>,
    {
        let combine = |x: Option<f64>, y: Option<f64>| match (x, y) {
            (Some(x), Some(y)) => op(x, y),
            _ => None,
        };
        match (self, other) {
            (Operand::Scalar(a), Operand::Scalar(b)) => Operand::Scalar(combine(a, b)),
            (Operand::Scalar(a), Operand::Column(b)) => {
                Operand::Column(b.into_iter().map(|y| combine(a, y)).collect())
            }
            (Operand::Column(a), Operand::Scalar(b)) => {
                Operand::Column(a.into_iter().map(|x| combine(x, b)).collect())
            }
            (Operand::Column(a), Operand::Column(b)) => Operand::Column(
                a.into_iter()
                    .zip(b)
                    .map(|(x, y)| combine(x, y))
                    .collect(),
            ),
        }
    }

    fn negate(self) -> Operand {
        match self {
            Operand::Scalar(s) => Operand::Scalar(s.map(|x| -x)),
            Operand::Column(c) => Operand::Column(c.into_iter().map(|v| v.map(|x| -x)).collect()),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    frame: &'a DataFrame,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], frame: &'a DataFrame) -> Self {
        Self {
            tokens,
            pos: 0,
            frame,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Operand, String> {
        let mut left = self.parse_term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left.apply(right, |a, b| Some(a + b));
                }
                Token::Minus => {
                    self.consume();
                    let right = self.parse_term()?;
                    left = left.apply(right, |a, b| Some(a - b));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // term = unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<Operand, String> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.consume();
                    let right = self.parse_unary()?;
                    left = left.apply(right, |a, b| Some(a * b));
                }
                Token::Slash => {
                    self.consume();
                    let right = self.parse_unary()?;
                    // Elementwise division by zero nulls that row only.
                    left = left.apply(right, |a, b| if b == 0.0 { None } else { Some(a / b) });
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // unary = '-' unary | primary
    fn parse_unary(&mut self) -> Result<Operand, String> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let val = self.parse_unary()?;
            return Ok(val.negate());
        }
        self.parse_primary()
    }

    // primary = NUMBER | IDENT | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Operand, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Operand::Scalar(Some(*n))),
            Some(Token::Ident(name)) => {
                let name = name.clone();
                if !self.frame.dtype(&name).map(|d| d.is_numeric()).unwrap_or(false) {
                    if !self.frame.has_column(&name) {
                        return Err(format!("Unknown column: '{}'", name));
                    }
                    return Err(format!("Column '{}' is not numeric", name));
                }
                let col = self
                    .frame
                    .column(&name)
                    .map_err(|e| e.to_string())?
                    .iter()
                    .map(|v| v.as_f64())
                    .collect();
                Ok(Operand::Column(col))
            }
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("Expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("Unexpected token: {:?}", tok)),
            None => Err("Unexpected end of expression".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DType, Value};

    fn frame() -> DataFrame {
        DataFrame::from_columns(
            vec!["area".into(), "rooms".into(), "city".into()],
            vec![DType::Float, DType::Int, DType::Str],
            vec![
                vec![Value::Float(60.0), Value::Float(90.0), Value::Null],
                vec![Value::Int(2), Value::Int(3), Value::Int(4)],
                vec![
                    Value::Str("a".into()),
                    Value::Str("b".into()),
                    Value::Str("c".into()),
                ],
            ],
        )
        .unwrap()
    }

    #[test]
    fn column_division() {
        let out = evaluate(&frame(), "area / rooms").unwrap();
        assert_eq!(out, vec![Some(30.0), Some(30.0), None]);
    }

    #[test]
    fn scalar_broadcast() {
        let out = evaluate(&frame(), "rooms * 10").unwrap();
        assert_eq!(out, vec![Some(20.0), Some(30.0), Some(40.0)]);
    }

    #[test]
    fn pure_scalar_expression_broadcasts() {
        let out = evaluate(&frame(), "(2 + 3) * 4").unwrap();
        assert_eq!(out, vec![Some(20.0), Some(20.0), Some(20.0)]);
    }

    #[test]
    fn null_propagates() {
        let out = evaluate(&frame(), "area + rooms").unwrap();
        assert_eq!(out[2], None);
    }

    #[test]
    fn division_by_zero_nulls_the_row() {
        let df = DataFrame::from_columns(
            vec!["x".into(), "d".into()],
            vec![DType::Float, DType::Float],
            vec![
                vec![Value::Float(1.0), Value::Float(2.0)],
                vec![Value::Float(0.0), Value::Float(2.0)],
            ],
        )
        .unwrap();
        let out = evaluate(&df, "x / d").unwrap();
        assert_eq!(out, vec![None, Some(1.0)]);
    }

    #[test]
    fn scalar_division_by_zero_is_all_null() {
        let out = evaluate(&frame(), "1 / 0").unwrap();
        assert_eq!(out, vec![None, None, None]);
    }

    #[test]
    fn unary_negation() {
        let out = evaluate(&frame(), "-rooms").unwrap();
        assert_eq!(out[0], Some(-2.0));
    }

    #[test]
    fn operator_precedence() {
        let out = evaluate(&frame(), "rooms + rooms * 2").unwrap();
        assert_eq!(out[0], Some(6.0));
    }

    #[test]
    fn unknown_column_rejected() {
        let err = evaluate(&frame(), "area / bedrooms").unwrap_err();
        assert!(err.contains("bedrooms"));
    }

    #[test]
    fn non_numeric_column_rejected() {
        let err = evaluate(&frame(), "city + 1").unwrap_err();
        assert!(err.contains("not numeric"));
    }

    #[test]
    fn trailing_garbage_rejected() {
        assert!(evaluate(&frame(), "area area").is_err());
    }

    #[test]
    fn empty_expression_rejected() {
        assert!(evaluate(&frame(), "").is_err());
    }
}
