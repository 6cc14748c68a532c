//! Interpreter for the restricted WHERE-clause grammar that predicate
//! compilation emits.
//!
//! ```text
//! expr       := term ("OR" term)*
//! term       := factor ("AND" factor)*
//! factor     := "NOT" factor | "(" expr ")" | comparison
//! comparison := ident op param | ident "IS" ["NOT"] "NULL"
//! ident      := '"' name '"'
//! op         := "=" | "<>" | ">" | "<" | ">=" | "<="
//! param      := "?" | "$" digits
//! ```
//!
//! Evaluation follows SQL three-valued logic: a comparison against NULL is
//! unknown, and only rows whose clause is definitely true are selected.
//! [`crate::MemoryStore`] uses this to honor `sql` fragments the way a SQL
//! backend would.

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::StorageError;
use crate::plan::SqlFragment;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Op(&'static str),
    Param(Option<usize>),
    And,
    Or,
    Not,
    Is,
    Null,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
enum Node {
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare {
        column: String,
        op: &'static str,
        param: usize,
    },
    IsNull {
        column: String,
        negated: bool,
    },
}

/// Evaluate `fragment` against one row. `true` means the row is selected.
pub fn fragment_matches(fragment: &SqlFragment, record: &Record) -> Result<bool, StorageError> {
    let node = parse_fragment(fragment)?;
    Ok(eval(&node, record, &fragment.params) == Some(true))
}

fn invalid(fragment: &SqlFragment, message: impl Into<String>) -> StorageError {
    StorageError::InvalidSql {
        clause: fragment.clause.clone(),
        message: message.into(),
    }
}

fn parse_fragment(fragment: &SqlFragment) -> Result<Node, StorageError> {
    let tokens = tokenize(&fragment.clause).map_err(|m| invalid(fragment, m))?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        next_positional: 0,
    };
    let node = parser.expr().map_err(|m| invalid(fragment, m))?;
    if parser.pos != parser.tokens.len() {
        return Err(invalid(fragment, "trailing tokens"));
    }
    if parser.max_param() > fragment.params.len() {
        return Err(invalid(fragment, "not enough parameters"));
    }
    Ok(node)
}

fn tokenize(clause: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = clause.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            name.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            name.push(*ch);
                            i += 1;
                        }
                        None => return Err("unterminated identifier".to_string()),
                    }
                }
                tokens.push(Token::Ident(name));
            }
            '?' => {
                tokens.push(Token::Param(None));
                i += 1;
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| "bad numbered parameter".to_string())?;
                if index == 0 {
                    return Err("parameters are 1-based".to_string());
                }
                tokens.push(Token::Param(Some(index - 1)));
            }
            '=' => {
                tokens.push(Token::Op("="));
                i += 1;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let op = match (c, next) {
                    ('<', Some('>')) => "<>",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                i += op.len();
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IS" => Token::Is,
                    "NULL" => Token::Null,
                    _ => return Err(format!("unexpected keyword '{}'", word)),
                };
                tokens.push(token);
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    next_positional: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn max_param(&self) -> usize {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Param(Some(i)) => Some(i + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
            .max(self.next_positional)
    }

    fn expr(&mut self) -> Result<Node, String> {
        let mut left = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let right = self.term()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Node, String> {
        let mut left = self.factor()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let right = self.factor()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Node, String> {
        match self.bump() {
            Some(Token::Not) => Ok(Node::Not(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(Token::Ident(column)) => self.comparison(column),
            other => Err(format!("unexpected token {:?}", other)),
        }
    }

    fn comparison(&mut self, column: String) -> Result<Node, String> {
        match self.bump() {
            Some(Token::Op(op)) => match self.bump() {
                Some(Token::Param(Some(index))) => Ok(Node::Compare {
                    column,
                    op,
                    param: index,
                }),
                Some(Token::Param(None)) => {
                    let index = self.next_positional;
                    self.next_positional += 1;
                    Ok(Node::Compare {
                        column,
                        op,
                        param: index,
                    })
                }
                other => Err(format!("expected parameter, got {:?}", other)),
            },
            Some(Token::Is) => {
                let negated = if self.peek() == Some(&Token::Not) {
                    self.bump();
                    true
                } else {
                    false
                };
                match self.bump() {
                    Some(Token::Null) => Ok(Node::IsNull { column, negated }),
                    other => Err(format!("expected NULL, got {:?}", other)),
                }
            }
            other => Err(format!("expected operator, got {:?}", other)),
        }
    }
}

fn eval(node: &Node, record: &Record, params: &[serde_json::Value]) -> Option<bool> {
    match node {
        Node::And(l, r) => match (eval(l, record, params), eval(r, record, params)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Node::Or(l, r) => match (eval(l, record, params), eval(r, record, params)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        Node::Not(inner) => eval(inner, record, params).map(|b| !b),
        Node::IsNull { column, negated } => {
            let is_null = matches!(record.get(column), None | Some(serde_json::Value::Null));
            Some(is_null != *negated)
        }
        Node::Compare { column, op, param } => {
            let left = record.get(column)?;
            let right = params.get(*param)?;
            compare(left, op, right)
        }
    }
}

fn compare(left: &serde_json::Value, op: &str, right: &serde_json::Value) -> Option<bool> {
    use serde_json::Value as J;
    let ordering = match (left, right) {
        (J::Null, _) | (_, J::Null) => return None,
        (J::Number(a), J::Number(b)) => compare_numbers(a, b)?,
        (J::String(a), J::String(b)) => a.cmp(b),
        (J::Bool(a), J::Bool(b)) => a.cmp(b),
        _ => {
            return match op {
                "=" => Some(false),
                "<>" => Some(true),
                _ => None,
            }
        }
    };
    Some(match op {
        "=" => ordering == Ordering::Equal,
        "<>" => ordering != Ordering::Equal,
        ">" => ordering == Ordering::Greater,
        "<" => ordering == Ordering::Less,
        ">=" => ordering != Ordering::Less,
        "<=" => ordering != Ordering::Greater,
        _ => return None,
    })
}

/// Exact when both sides fit a decimal, as the closure path compares them;
/// `f64` only beyond that range.
fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Option<Ordering> {
    match (exact(a), exact(b)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn exact(n: &serde_json::Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
