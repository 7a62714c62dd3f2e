//! The `edit` post-transform: a tiny s-expression language applied to a
//! field's raw value. Expressions are parsed at config load (syntax errors
//! are fatal there) and evaluated after the handler runs (evaluation errors
//! are per-field data).
//!
//! Forms: `(index N)`, `(get KEY)`, `(first)`, `(last)`, `(count)`,
//! `(add N)`, `(sub N)`, `(mul N)`, `(div N)`, `(pick I J ...)`, and
//! `(dot F G ...)` for left-to-right composition. Numeric atoms accept
//! decimal, `0x`, `#x` and `#b` forms.

use crate::utils::hex;
use crate::value::ContractValue;
use alloy::primitives::U256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Atom(String),
    List(Vec<Expr>),
}

pub fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let expr = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err("trailing tokens after expression".to_string());
    }
    match &expr {
        Expr::List(_) => {
            check_form(&expr)?;
            Ok(expr)
        }
        Expr::Atom(_) => Err("expected a form like (index 0)".to_string()),
    }
}

/// Operator check at parse time, so bad expressions die at config load
/// instead of surfacing as per-field errors on every run.
fn check_form(expr: &Expr) -> Result<(), String> {
    let Expr::List(items) = expr else {
        return Ok(());
    };
    let Some(Expr::Atom(op)) = items.first() else {
        return Err("form head must be an operator".to_string());
    };
    match op.as_str() {
        "index" | "get" | "first" | "last" | "count" | "pick" | "add" | "sub" | "mul" | "div" => {
            Ok(())
        }
        "dot" => {
            for step in &items[1..] {
                check_form(step)?;
            }
            Ok(())
        }
        other => Err(format!("unknown operator `{other}`")),
    }
}

fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => tokens.push("(".to_string()),
            ')' => tokens.push(")".to_string()),
            '"' => {
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => literal.push(c),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(literal);
            }
            c if c.is_whitespace() => {}
            c => {
                let mut atom = String::new();
                atom.push(c);
                while let Some(&next) = chars.peek() {
                    if next == '(' || next == ')' || next.is_whitespace() {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                tokens.push(atom);
            }
        }
    }
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    Ok(tokens)
}

fn parse_expr(tokens: &[String], pos: &mut usize) -> Result<Expr, String> {
    let token = tokens.get(*pos).ok_or("unexpected end of expression")?;
    *pos += 1;
    if token == "(" {
        let mut items = Vec::new();
        loop {
            match tokens.get(*pos) {
                Some(t) if t == ")" => {
                    *pos += 1;
                    return Ok(Expr::List(items));
                }
                Some(_) => items.push(parse_expr(tokens, pos)?),
                None => return Err("unbalanced parentheses".to_string()),
            }
        }
    } else if token == ")" {
        Err("unexpected `)`".to_string())
    } else {
        Ok(Expr::Atom(token.clone()))
    }
}

pub fn apply(expr: &Expr, value: &ContractValue) -> Result<ContractValue, String> {
    let Expr::List(items) = expr else {
        return Err("expected a form".to_string());
    };
    let (head, args) = items
        .split_first()
        .ok_or("empty form")?;
    let Expr::Atom(op) = head else {
        return Err("form head must be an operator".to_string());
    };

    match op.as_str() {
        "dot" => {
            let mut current = value.clone();
            for step in args {
                current = apply(step, &current)?;
            }
            Ok(current)
        }
        "index" => {
            let i = atom_usize(args, 0)?;
            let items = as_array(value)?;
            items
                .get(i)
                .cloned()
                .ok_or_else(|| format!("index {i} out of bounds ({})", items.len()))
        }
        "get" => {
            let key = atom_text(args, 0)?;
            match value {
                ContractValue::Object(entries) => entries
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| format!("no key `{key}`")),
                _ => Err("get expects an object".to_string()),
            }
        }
        "first" => as_array(value)?.first().cloned().ok_or_else(|| "empty array".to_string()),
        "last" => as_array(value)?.last().cloned().ok_or_else(|| "empty array".to_string()),
        "count" => match value {
            ContractValue::Array(items) => Ok(ContractValue::Uint(U256::from(items.len()))),
            ContractValue::Object(entries) => Ok(ContractValue::Uint(U256::from(entries.len()))),
            _ => Err("count expects an array or object".to_string()),
        },
        "pick" => {
            let items = as_array(value)?;
            let mut picked = Vec::with_capacity(args.len());
            for (slot, _) in args.iter().enumerate() {
                let i = atom_usize(args, slot)?;
                picked.push(
                    items
                        .get(i)
                        .cloned()
                        .ok_or_else(|| format!("index {i} out of bounds ({})", items.len()))?,
                );
            }
            Ok(ContractValue::Array(picked))
        }
        "add" | "sub" | "mul" | "div" => {
            let lhs = value
                .as_uint()
                .ok_or_else(|| format!("{op} expects an integer value"))?;
            let rhs = atom_uint(args, 0)?;
            let result = match op.as_str() {
                "add" => lhs.checked_add(rhs),
                "sub" => lhs.checked_sub(rhs),
                "mul" => lhs.checked_mul(rhs),
                _ => {
                    if rhs.is_zero() {
                        None
                    } else {
                        lhs.checked_div(rhs)
                    }
                }
            };
            result
                .map(ContractValue::Uint)
                .ok_or_else(|| format!("{op} out of range"))
        }
        other => Err(format!("unknown operator `{other}`")),
    }
}

fn as_array(value: &ContractValue) -> Result<&Vec<ContractValue>, String> {
    match value {
        ContractValue::Array(items) => Ok(items),
        _ => Err("expected an array".to_string()),
    }
}

fn atom_uint(args: &[Expr], i: usize) -> Result<U256, String> {
    match args.get(i) {
        Some(Expr::Atom(raw)) => {
            hex::to_u256(raw).ok_or_else(|| format!("expected a number, got `{raw}`"))
        }
        Some(Expr::List(_)) => Err("expected a number, got a form".to_string()),
        None => Err(format!("missing argument {i}")),
    }
}

fn atom_usize(args: &[Expr], i: usize) -> Result<usize, String> {
    usize::try_from(atom_uint(args, i)?).map_err(|_| "index too large".to_string())
}

fn atom_text(args: &[Expr], i: usize) -> Result<String, String> {
    match args.get(i) {
        Some(Expr::Atom(raw)) => Ok(raw.clone()),
        Some(Expr::List(_)) => Err("expected a key, got a form".to_string()),
        None => Err(format!("missing argument {i}")),
    }
}
