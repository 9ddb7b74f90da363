use std::collections::BTreeMap;

use crate::error::Error;
use crate::value::Value;

// Placeholders are `{field}` or `{field:spec}` where spec is
// `[[fill]align][sign][width][.precision][type]`, with align one of `<>^`,
// sign `+`, and type one of `f`, `e`, `E`, `d`, `s`. `{{` and `}}` are
// literal braces.
pub(crate) fn render(template: &str, bindings: &BTreeMap<String, Value>) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(Error::Template {
                        reason: "expected '}' before end of template".to_string(),
                    });
                }
                let (field, spec) = match inner.split_once(':') {
                    Some((field, spec)) => (field, spec),
                    None => (inner.as_str(), ""),
                };
                let value = bindings.get(field).ok_or_else(|| Error::MissingField {
                    field: field.to_string(),
                })?;
                out.push_str(&apply(field, spec, value)?);
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(Error::Template {
                        reason: "single '}' in template".to_string(),
                    });
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

#[derive(Debug)]
struct Spec {
    fill: char,
    align: Option<char>,
    plus: bool,
    width: Option<usize>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn bad_spec(field: &str, spec: &str) -> Error {
    Error::FormatSpec {
        field: field.to_string(),
        spec: spec.to_string(),
    }
}

fn parse_spec(field: &str, spec: &str) -> Result<Spec, Error> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec {
        fill: ' ',
        align: None,
        plus: false,
        width: None,
        precision: None,
        kind: None,
    };
    let is_align = |c: char| matches!(c, '<' | '>' | '^');
    let mut i = 0;
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = chars[0];
        out.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        out.align = Some(chars[0]);
        i = 1;
    }
    if i < chars.len() && chars[i] == '+' {
        out.plus = true;
        i += 1;
    }
    let mut digits = String::new();
    while i < chars.len() && chars[i].is_ascii_digit() {
        digits.push(chars[i]);
        i += 1;
    }
    if !digits.is_empty() {
        out.width = Some(digits.parse().map_err(|_| bad_spec(field, spec))?);
    }
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let mut digits = String::new();
        while i < chars.len() && chars[i].is_ascii_digit() {
            digits.push(chars[i]);
            i += 1;
        }
        if digits.is_empty() {
            return Err(bad_spec(field, spec));
        }
        out.precision = Some(digits.parse().map_err(|_| bad_spec(field, spec))?);
    }
    if i < chars.len() {
        let kind = chars[i];
        if i + 1 != chars.len() || !matches!(kind, 'f' | 'e' | 'E' | 'd' | 's') {
            return Err(bad_spec(field, spec));
        }
        out.kind = Some(kind);
    }
    Ok(out)
}

fn apply(field: &str, spec: &str, value: &Value) -> Result<String, Error> {
    let spec_p = parse_spec(field, spec)?;
    let body = match spec_p.kind {
        None => match spec_p.precision {
            None => value.to_string(),
            Some(p) => match value {
                Value::Str(s) => s.chars().take(p).collect(),
                _ => fixed(
                    value.as_float().ok_or_else(|| bad_spec(field, spec))?,
                    p,
                    spec_p.plus,
                ),
            },
        },
        Some('f') => fixed(
            value.as_float().ok_or_else(|| bad_spec(field, spec))?,
            spec_p.precision.unwrap_or(6),
            spec_p.plus,
        ),
        Some(kind @ ('e' | 'E')) => scientific(
            value.as_float().ok_or_else(|| bad_spec(field, spec))?,
            spec_p.precision.unwrap_or(6),
            kind == 'E',
            spec_p.plus,
        ),
        Some('d') => {
            let v = value.as_int().ok_or_else(|| bad_spec(field, spec))?;
            if spec_p.precision.is_some() {
                return Err(bad_spec(field, spec));
            }
            if spec_p.plus {
                format!("{v:+}")
            } else {
                format!("{v}")
            }
        }
        Some('s') => match value {
            Value::Str(s) => match spec_p.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.clone(),
            },
            _ => return Err(bad_spec(field, spec)),
        },
        Some(_) => return Err(bad_spec(field, spec)),
    };
    Ok(pad(body, &spec_p, value))
}

fn fixed(v: f64, precision: usize, plus: bool) -> String {
    if plus {
        format!("{v:+.precision$}")
    } else {
        format!("{v:.precision$}")
    }
}

// Rust renders the exponent bare (`1e2`); the conventional mini-language
// form is a signed two-digit exponent (`1e+02`).
fn scientific(v: f64, precision: usize, upper: bool, plus: bool) -> String {
    let marker = if upper { 'E' } else { 'e' };
    let base = if upper {
        format!("{v:.precision$E}")
    } else {
        format!("{v:.precision$e}")
    };
    let Some((mantissa, exp)) = base.split_once(marker) else {
        return base;
    };
    let (exp_sign, exp_digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp),
    };
    let mut out = String::new();
    if plus && !mantissa.starts_with('-') {
        out.push('+');
    }
    out.push_str(mantissa);
    out.push(marker);
    out.push(exp_sign);
    if exp_digits.len() < 2 {
        out.push('0');
    }
    out.push_str(exp_digits);
    out
}

fn pad(body: String, spec: &Spec, value: &Value) -> String {
    let Some(width) = spec.width else {
        return body;
    };
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let fill: String = spec.fill.to_string();
    let gap = width - len;
    let align = spec.align.unwrap_or(match value {
        Value::Str(_) => '<',
        _ => '>',
    });
    match align {
        '<' => format!("{body}{}", fill.repeat(gap)),
        '^' => {
            let left = gap / 2;
            format!("{}{body}{}", fill.repeat(left), fill.repeat(gap - left))
        }
        _ => format!("{}{body}", fill.repeat(gap)),
    }
}
