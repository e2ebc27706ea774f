//! Comparison semantics of `If` events.
//!
//! The variable is compared through its text form (`Display` of
//! [`VarValue`]) except for `%`, which works on integers.

use crate::events::Comparison;

use super::variables::VarValue;

/// Evaluate `variable <op> value`. Never fails: operands that cannot be
/// compared make the condition false (or, for `==`, fall back to comparing
/// text).
pub fn evaluate(op: Comparison, variable: &VarValue, value: &str) -> bool {
    let lhs = variable.to_string();
    match op {
        Comparison::Eq => {
            let expr = format!("{lhs}=={value}");
            eval_equality(&expr).unwrap_or_else(|| lhs == value)
        }
        Comparison::Gt => numeric(&lhs, value).is_some_and(|(a, b)| a > b),
        Comparison::Lt => numeric(&lhs, value).is_some_and(|(a, b)| a < b),
        Comparison::Ge => numeric(&lhs, value).is_some_and(|(a, b)| a >= b),
        Comparison::Le => numeric(&lhs, value).is_some_and(|(a, b)| a <= b),
        Comparison::Ne => lhs != value,
        Comparison::Contains => normalize(&lhs).contains(&normalize(value)),
        Comparison::Modulo => divisible(variable, value),
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Both operands as numbers, if both are plain decimals.
fn numeric(lhs: &str, rhs: &str) -> Option<(f64, f64)> {
    if !is_plain_decimal(lhs) || !is_plain_decimal(rhs) {
        return None;
    }
    Some((lhs.parse().ok()?, rhs.parse().ok()?))
}

/// Digits with at most one `.` and nothing else (no sign, no exponent).
fn is_plain_decimal(s: &str) -> bool {
    let mut digits = 0;
    let mut dots = 0;
    for c in s.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

fn divisible(variable: &VarValue, value: &str) -> bool {
    let dividend = match variable {
        VarValue::Int(n) => Some(*n),
        VarValue::Float(x) if x.is_finite() => Some(x.trunc() as i64),
        VarValue::Float(_) => None,
        VarValue::Text(s) => s.trim().parse().ok(),
    };
    let divisor = value.trim().parse::<i64>().ok();
    match (dividend, divisor) {
        (Some(n), Some(d)) => n.checked_rem(d).map_or(d == -1, |r| r == 0),
        _ => false,
    }
}

/// Evaluate a chain `term == term == ...` where each term is a number or
/// `number % number % ...`. `None` when the text is anything else.
fn eval_equality(expr: &str) -> Option<bool> {
    let terms = expr
        .split("==")
        .map(eval_term)
        .collect::<Option<Vec<f64>>>()?;
    if terms.len() < 2 {
        return None;
    }
    Some(terms.windows(2).all(|pair| pair[0] == pair[1]))
}

fn eval_term(term: &str) -> Option<f64> {
    let mut operands = term.split('%').map(parse_number);
    let mut acc = operands.next()??;
    for operand in operands {
        let divisor = operand?;
        if divisor == 0.0 {
            return None;
        }
        // Result takes the sign of the divisor.
        acc -= divisor * (acc / divisor).floor();
    }
    Some(acc)
}

/// A decimal literal with optional sign. Integers with leading zeros are
/// rejected, as are exponents and special values.
fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !frac_part.is_none_or(all_digits) {
        return None;
    }
    if int_part.is_empty() && frac_part.is_none_or(str::is_empty) {
        return None;
    }
    let leading_zero = int_part.len() > 1
        && int_part.starts_with('0')
        && !int_part.trim_start_matches('0').is_empty();
    if frac_part.is_none() && leading_zero {
        return None;
    }
    text.parse().ok()
}
