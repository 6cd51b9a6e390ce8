//! Format-spec mini-language shared by f-strings, `str.format` and `%`

use super::error::{ErrorKind, Exception};
use super::value::{format_float, Value};

#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str, limit: usize) -> Result<Spec, Exception> {
    let chars: Vec<char> = spec.chars().collect();
    let mut out = Spec::default();
    let mut i = 0;

    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        out.fill = Some(chars[0]);
        out.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        out.align = Some(chars[0]);
        i = 1;
    }

    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        out.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        out.zero = true;
        i += 1;
    }

    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        out.width = chars[start..i]
            .iter()
            .collect::<String>()
            .parse()
            .map_err(|_| invalid(spec))?;
    }

    if let Some(&c @ (',' | '_')) = chars.get(i) {
        out.grouping = Some(c);
        i += 1;
    }

    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(Exception::value_error("Format specifier missing precision"));
        }
        out.precision = Some(
            chars[start..i]
                .iter()
                .collect::<String>()
                .parse()
                .map_err(|_| invalid(spec))?,
        );
    }

    if let Some(&c) = chars.get(i) {
        out.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid(spec));
    }
    if out.width > limit {
        return Err(Exception::new(
            ErrorKind::MemoryError,
            format!("format width exceeds the limit of {} characters", limit),
        ));
    }
    if out.precision.is_some_and(|p| p > limit) {
        return Err(Exception::value_error("precision too big"));
    }
    Ok(out)
}

fn invalid(spec: &str) -> Exception {
    Exception::value_error(format!("Invalid format specifier '{}'", spec))
}

fn unknown_code(code: char, value: &Value) -> Exception {
    Exception::value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        code,
        value.type_name()
    ))
}

/// Renders `value` according to a format spec such as `>10`, `.2f` or `,d`.
/// Width and precision above `limit` are refused before anything is
/// allocated.
pub fn format_value(value: &Value, spec: &str, limit: usize) -> Result<String, Exception> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let spec = parse_spec(spec, limit)?;

    let (body, numeric) = match (spec.kind, value) {
        (Some('s'), Value::Str(_)) | (None, Value::Str(_)) => {
            let mut text = value.to_str();
            if let Some(p) = spec.precision {
                text = text.chars().take(p).collect();
            }
            (text, false)
        }
        (Some('s'), _) => return Err(unknown_code('s', value)),
        (_, Value::Str(_)) => {
            return Err(unknown_code(spec.kind.unwrap_or('s'), value));
        }
        (Some(code @ ('d' | 'n')), v) => match v.as_int() {
            Some(i) => (group(&i.to_string(), spec.grouping), true),
            None => return Err(unknown_code(code, v)),
        },
        (Some(code @ ('x' | 'X' | 'o' | 'b')), v) => {
            let i = v.as_int().ok_or_else(|| unknown_code(code, v))?;
            let digits = match code {
                'x' => format!("{:x}", i.unsigned_abs()),
                'X' => format!("{:X}", i.unsigned_abs()),
                'o' => format!("{:o}", i.unsigned_abs()),
                _ => format!("{:b}", i.unsigned_abs()),
            };
            let text = if i < 0 { format!("-{}", digits) } else { digits };
            (text, true)
        }
        (Some(code @ ('f' | 'F' | 'e' | 'E' | '%' | 'g' | 'G')), v) => {
            let f = v.as_float().ok_or_else(|| unknown_code(code, v))?;
            (float_body(f, code, spec.precision, spec.grouping), true)
        }
        (None, v) if v.is_number() => match (v, spec.precision) {
            (Value::Float(f), Some(p)) => (general(*f, p.max(1)), true),
            (Value::Float(f), None) => (format_float(*f), true),
            _ => (
                group(&v.as_int().unwrap_or(0).to_string(), spec.grouping),
                true,
            ),
        },
        (None, v) => (v.to_str(), false),
        (Some(code), v) => return Err(unknown_code(code, v)),
    };

    Ok(pad(body, numeric, &spec))
}

fn float_body(f: f64, code: char, precision: Option<usize>, grouping: Option<char>) -> String {
    if !f.is_finite() {
        let text = format_float(f);
        return if code.is_ascii_uppercase() {
            text.to_uppercase()
        } else {
            text
        };
    }
    let p = precision.unwrap_or(6);
    match code {
        'f' | 'F' => group_float(&format!("{:.*}", p, f), grouping),
        'e' | 'E' => {
            let text = exponent_form(&format!("{:.*e}", p, f));
            if code == 'E' {
                text.to_uppercase()
            } else {
                text
            }
        }
        '%' => format!("{}%", group_float(&format!("{:.*}", p, f * 100.0), grouping)),
        _ => {
            let text = general(f, p.max(1));
            if code == 'G' {
                text.to_uppercase()
            } else {
                text
            }
        }
    }
}

/// Rust writes `1.5e3`; Python writes `1.5e+03`.
fn exponent_form(text: &str) -> String {
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => text.to_string(),
    }
}

/// The `g` presentation: fixed or exponent form depending on magnitude,
/// with insignificant trailing zeros removed.
fn general(f: f64, precision: usize) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let exponent = f.abs().log10().floor() as i64;
    let strip_zeros = |s: String| -> String {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };
    if exponent < -4 || exponent >= precision as i64 {
        let text = format!("{:.*e}", precision - 1, f);
        let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        let mantissa = strip_zeros(mantissa.to_string());
        exponent_form(&format!("{}e{}", mantissa, exp))
    } else {
        let decimals = (precision as i64 - 1 - exponent).max(0) as usize;
        strip_zeros(format!("{:.*}", decimals, f))
    }
}

fn group(digits: &str, separator: Option<char>) -> String {
    let Some(sep) = separator else {
        return digits.to_string();
    };
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    format!("{}{}", sign, out)
}

fn group_float(text: &str, separator: Option<char>) -> String {
    match text.split_once('.') {
        Some((int_part, frac)) => format!("{}.{}", group(int_part, separator), frac),
        None => group(text, separator),
    }
}

fn pad(body: String, numeric: bool, spec: &Spec) -> String {
    let (sign, digits) = match body.strip_prefix('-') {
        Some(rest) if numeric => ("-".to_string(), rest.to_string()),
        _ => {
            let sign = match spec.sign {
                Some('+') if numeric => "+",
                Some(' ') if numeric => " ",
                _ => "",
            };
            (sign.to_string(), body)
        }
    };

    let len = sign.chars().count() + digits.chars().count();
    if len >= spec.width {
        return format!("{}{}", sign, digits);
    }
    let padding = spec.width - len;

    let (fill, align) = if spec.zero && spec.align.is_none() && numeric {
        ('0', '=')
    } else {
        let default_align = if numeric { '>' } else { '<' };
        (
            spec.fill.unwrap_or(if spec.zero { '0' } else { ' ' }),
            spec.align.unwrap_or(default_align),
        )
    };
    let fill_str = |n: usize| fill.to_string().repeat(n);

    match align {
        '<' => format!("{}{}{}", sign, digits, fill_str(padding)),
        '^' => {
            let left = padding / 2;
            format!(
                "{}{}{}{}",
                fill_str(left),
                sign,
                digits,
                fill_str(padding - left)
            )
        }
        '=' => format!("{}{}{}", sign, fill_str(padding), digits),
        _ => format!("{}{}{}", fill_str(padding), sign, digits),
    }
}

/// printf-style `fmt % args`.
pub fn percent_format(fmt: &str, args: &Value, limit: usize) -> Result<String, Exception> {
    let args: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    let mut next = args.iter();
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut flags = String::new();
        while let Some(&f @ ('-' | '+' | ' ' | '0')) = chars.peek() {
            flags.push(f);
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|c| c.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision = String::new();
        if chars.peek() == Some(&'.') {
            chars.next();
            precision.push('.');
            while let Some(&d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                precision.push(d);
                chars.next();
            }
        }
        let code = chars
            .next()
            .ok_or_else(|| Exception::value_error("incomplete format"))?;
        let value = next
            .next()
            .ok_or_else(|| Exception::type_error("not enough arguments for format string"))?;

        let mut spec = String::new();
        if flags.contains('-') {
            spec.push('<');
        }
        if flags.contains('+') {
            spec.push('+');
        } else if flags.contains(' ') {
            spec.push(' ');
        }
        if flags.contains('0') && !flags.contains('-') {
            spec.push('0');
        }
        spec.push_str(&width);
        spec.push_str(&precision);

        let rendered = match code {
            's' => format_value(&Value::str(value.to_str()), &spec, limit)?,
            'r' => format_value(&Value::str(value.repr()), &spec, limit)?,
            'd' | 'i' | 'u' => {
                let int = match value {
                    Value::Float(f) => Value::Int(f.trunc() as i64),
                    other => other.clone(),
                };
                spec.push('d');
                format_value(&int, &spec, limit)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' => {
                spec.push(code);
                format_value(value, &spec, limit)?
            }
            other => {
                return Err(Exception::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&rendered);
    }

    if next.next().is_some() {
        return Err(Exception::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1_000_000;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec, LIMIT).unwrap()
    }

    #[test]
    fn test_fixed_point_and_grouping() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(2), ".1f"), "2.0");
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(1234.5), ",.2f"), "1,234.50");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
    }

    #[test]
    fn test_alignment_and_width() {
        assert_eq!(fmt(Value::str("ab"), ">5"), "   ab");
        assert_eq!(fmt(Value::str("ab"), "<5"), "ab   ");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Int(42), "5"), "   42");
        assert_eq!(fmt(Value::Int(-42), "06d"), "-00042");
        assert_eq!(fmt(Value::Int(7), "+d"), "+7");
    }

    #[test]
    fn test_exponent_and_general() {
        assert_eq!(fmt(Value::Float(12345.678), ".2e"), "1.23e+04");
        assert_eq!(fmt(Value::Float(0.5), "g"), "0.5");
        assert_eq!(fmt(Value::Float(1e-7), "g"), "1e-07");
        assert_eq!(fmt(Value::Float(3.14159), ".3"), "3.14");
    }

    #[test]
    fn test_bad_codes() {
        assert!(format_value(&Value::str("x"), "d", LIMIT).is_err());
        assert!(format_value(&Value::Float(1.5), "d", LIMIT).is_err());
        assert!(format_value(&Value::Int(1), ".", LIMIT).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::str("Ada"), Value::Float(2.5)]);
        assert_eq!(
            percent_format("%s scored %.1f%%", &args, LIMIT).unwrap(),
            "Ada scored 2.5%"
        );
        assert_eq!(percent_format("%5d|", &Value::Int(3), LIMIT).unwrap(), "    3|");
        assert_eq!(percent_format("%-4s|", &Value::str("a"), LIMIT).unwrap(), "a   |");
        assert!(percent_format("%s %s", &Value::str("a"), LIMIT).is_err());
        assert!(percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)]), LIMIT).is_err());
    }

    #[test]
    fn test_oversized_width_and_precision_are_refused() {
        let width = format_value(&Value::Int(1), ">9223372036854775807", LIMIT).unwrap_err();
        assert_eq!(width.kind, ErrorKind::MemoryError);
        let zero_padded = format_value(&Value::Int(1), "099999999999", LIMIT).unwrap_err();
        assert_eq!(zero_padded.kind, ErrorKind::MemoryError);
        let precision = format_value(&Value::Float(1.0), ".9223372036854775807f", LIMIT).unwrap_err();
        assert_eq!(precision.kind, ErrorKind::ValueError);
        let exponent = format_value(&Value::Float(1.0), ".5000000000e", LIMIT).unwrap_err();
        assert_eq!(exponent.kind, ErrorKind::ValueError);

        let percent = percent_format("%9223372036854775807d", &Value::Int(1), LIMIT).unwrap_err();
        assert_eq!(percent.kind, ErrorKind::MemoryError);
        assert!(percent_format("%.9999999f", &Value::Float(1.0), LIMIT).is_err());

        assert_eq!(fmt(Value::Int(1), ">8").len(), 8);
    }
}
