use chrono::TimeDelta;

use crate::error::DurationError;

// ---------------------------------------------------------------------------
// Duration strings (`30min`, `1h30min`, `1.5h`)
// ---------------------------------------------------------------------------

/// Parse a duration such as `30min`, `1h30min`, `90s`, `1.5h`, `2d` or `1w`.
///
/// The string is a sequence of `<number><unit>` terms; whitespace between
/// terms (and between a number and its unit) is ignored. Recognised units:
///
/// | unit                       | meaning      |
/// |----------------------------|--------------|
/// | `ms`                       | milliseconds |
/// | `s`, `sec`, `second(s)`    | seconds      |
/// | `m`, `min`, `minute(s)`, `T` | minutes    |
/// | `h`, `hr`, `hour(s)`, `H`  | hours        |
/// | `d`, `D`, `day(s)`         | days         |
/// | `w`, `W`, `week(s)`        | weeks        |
pub fn parse_duration(input: &str) -> Result<TimeDelta, DurationError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(DurationError::Empty);
    }

    let mut total_seconds = 0.0_f64;
    let mut chars = text.chars().peekable();
    let mut terms = 0;

    while chars.peek().is_some() {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }

        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        skip_whitespace(&mut chars);

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphabetic() {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }

        if number.is_empty() || unit.is_empty() {
            return Err(DurationError::Invalid(input.to_string()));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| DurationError::Invalid(input.to_string()))?;
        let factor = unit_seconds(&unit).ok_or_else(|| DurationError::UnknownUnit {
            input: input.to_string(),
            unit: unit.clone(),
        })?;
        total_seconds += value * factor;
        terms += 1;
    }

    if terms == 0 || !total_seconds.is_finite() {
        return Err(DurationError::Invalid(input.to_string()));
    }
    let millis = (total_seconds * 1000.0).round() as i64;
    TimeDelta::try_milliseconds(millis).ok_or_else(|| DurationError::Invalid(input.to_string()))
}

/// Whether the text contains any alphabetic character (i.e. carries a unit).
pub fn has_alpha(text: &str) -> bool {
    text.chars().any(|c| c.is_alphabetic())
}

/// Length of a duration in (fractional) seconds.
pub fn as_seconds_f64(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn unit_seconds(unit: &str) -> Option<f64> {
    // Case matters for the single-letter aliases (`T` minute, `H` hour).
    let seconds = match unit {
        "ms" => 0.001,
        "s" | "S" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" | "T" => 60.0,
        "h" | "H" | "hr" | "hrs" | "hour" | "hours" => 3600.0,
        "d" | "D" | "day" | "days" => 86_400.0,
        "w" | "W" | "week" | "weeks" => 604_800.0,
        _ => return None,
    };
    Some(seconds)
}
