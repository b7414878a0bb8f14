//! Storage-side predicates: a conjunction of equality tests on top-level fields.
//!
//! Grammar: `cond (AND cond)*`, `cond := field ('=' | '!=') value`, where value is a single-quoted
//! string (`''` escapes a quote) or a bare literal such as `42` or `true`.

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Predicate {
    pub conditions: Vec<Condition>,
}

#[derive(Debug, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Eq,
    Ne,
    And,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '=' {
            chars.next();
            tokens.push(Token::Eq);
        } else if c == '!' {
            chars.next();
            if chars.next() != Some('=') {
                return Err("expected '=' after '!'".into());
            }
            tokens.push(Token::Ne);
        } else if c == '\'' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        s.push('\'');
                    }
                    Some('\'') => break,
                    Some(ch) => s.push(ch),
                    None => return Err("unterminated string".into()),
                }
            }
            tokens.push(Token::Literal(s));
        } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
            let mut word = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' || ch == '.' {
                    word.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if word.eq_ignore_ascii_case("and") {
                tokens.push(Token::And);
            } else if word.starts_with(|ch: char| ch.is_ascii_alphabetic() || ch == '_')
                && word.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            {
                tokens.push(Token::Ident(word));
            } else {
                tokens.push(Token::Literal(word));
            }
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
    Ok(tokens)
}

impl Predicate {
    pub fn parse(input: &str) -> Result<Self, String> {
        let mut tokens = tokenize(input)?.into_iter();
        let mut conditions = Vec::new();
        loop {
            let field = match tokens.next() {
                Some(Token::Ident(f)) => f,
                other => return Err(format!("expected field name, got {:?}", other)),
            };
            let op = match tokens.next() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::Ne) => CompareOp::Ne,
                other => return Err(format!("expected '=' or '!=', got {:?}", other)),
            };
            let value = match tokens.next() {
                Some(Token::Literal(v)) | Some(Token::Ident(v)) => v,
                other => return Err(format!("expected value, got {:?}", other)),
            };
            conditions.push(Condition { field, op, value });
            match tokens.next() {
                None => break,
                Some(Token::And) => continue,
                Some(other) => return Err(format!("expected AND, got {:?}", other)),
            }
        }
        Ok(Predicate { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a JSON document. Missing fields never equal anything.
    pub fn matches(&self, doc: &Value) -> bool {
        self.conditions.iter().all(|c| {
            let actual = doc.get(&c.field).and_then(scalar_text);
            match c.op {
                CompareOp::Eq => actual.as_deref() == Some(c.value.as_str()),
                CompareOp::Ne => actual.as_deref() != Some(c.value.as_str()),
            }
        })
    }
}

/// Text form of a scalar, matching PostgreSQL's `->>` operator.
fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
