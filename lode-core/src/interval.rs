use crate::{Error, Result};
use std::fmt::{self, Write};
use time::Duration;

/// Text form of a time delta, both directions.
///
/// Written form is `[N days ]HH:MM:SS[.ffffff]`, hours never overflowing
/// into days beyond what the day count absorbed. Parsing accepts that form
/// plus a compact one made of `<number><unit>` runs (`1d2h30m`, units `d`,
/// `h`, `m`, `s`, `ms`, `us`). A trailing bare number takes the unit one
/// step smaller than the previous run (`1h30` is one hour thirty minutes);
/// that lax shorthand is accepted on input only. Calendar units (months,
/// years) have no fixed length and are rejected.

const UNITS: &[(&str, i64)] = &[
    ("d", 86_400_000_000),
    ("h", 3_600_000_000),
    ("m", 60_000_000),
    ("s", 1_000_000),
    ("ms", 1_000),
    ("us", 1),
];

pub fn write_interval(out: &mut impl Write, value: Duration) -> fmt::Result {
    let negative = value.is_negative();
    let mut micros = value.whole_microseconds().unsigned_abs();
    let days = micros / 86_400_000_000;
    micros %= 86_400_000_000;
    let hours = micros / 3_600_000_000;
    micros %= 3_600_000_000;
    let minutes = micros / 60_000_000;
    micros %= 60_000_000;
    let seconds = micros / 1_000_000;
    micros %= 1_000_000;
    if negative {
        out.write_char('-')?;
    }
    if days > 0 {
        write!(
            out,
            "{} day{} ",
            days,
            if days == 1 { "" } else { "s" }
        )?;
        if negative {
            out.write_char('-')?;
        }
    }
    write!(out, "{:02}:{:02}:{:02}", hours, minutes, seconds)?;
    if micros > 0 {
        write!(out, ".{:06}", micros)?;
    }
    Ok(())
}

pub fn format_interval(value: Duration) -> String {
    let mut out = String::new();
    let _ = write_interval(&mut out, value);
    out
}

pub fn parse_interval(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::value("empty interval"));
    }
    if input.contains(':') {
        parse_clock_form(input)
    } else {
        parse_unit_form(input)
    }
}

/// `[-][N day[s]] [-]HH:MM:SS[.ffffff]`
fn parse_clock_form(input: &str) -> Result<Duration> {
    let bad = || Error::value(format!("invalid interval {input:?}"));
    let mut micros: i64 = 0;
    let mut clock = input;
    if let Some((head, tail)) = input
        .split_once(" day ")
        .or_else(|| input.split_once(" days "))
    {
        let days: i64 = head.trim().parse().map_err(|_| bad())?;
        micros += days * 86_400_000_000;
        clock = tail.trim();
    }
    let negative_days = micros < 0;
    let (clock, negative_clock) = match clock.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (clock, false),
    };
    let mut fields = clock.split(':');
    let hours: i64 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let minutes: i64 = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let seconds = fields.next().ok_or_else(bad)?;
    if fields.next().is_some() || minutes >= 60 {
        return Err(bad());
    }
    let (seconds, fraction) = match seconds.split_once('.') {
        Some((s, f)) => (s, Some(f)),
        None => (seconds, None),
    };
    let seconds: i64 = seconds.parse().map_err(|_| bad())?;
    if seconds >= 60 {
        return Err(bad());
    }
    let mut time = hours * 3_600_000_000 + minutes * 60_000_000 + seconds * 1_000_000;
    if let Some(fraction) = fields_to_micros(fraction).map_err(|_| bad())? {
        time += fraction;
    }
    micros += if negative_clock || negative_days { -time } else { time };
    Ok(Duration::microseconds(micros))
}

fn fields_to_micros(fraction: Option<&str>) -> std::result::Result<Option<i64>, ()> {
    let Some(fraction) = fraction else {
        return Ok(None);
    };
    if fraction.is_empty() || fraction.len() > 6 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(());
    }
    let mut value: i64 = fraction.parse().map_err(|_| ())?;
    for _ in fraction.len()..6 {
        value *= 10;
    }
    Ok(Some(value))
}

/// `1d2h30m15s`, possibly with a lax trailing bare number.
fn parse_unit_form(input: &str) -> Result<Duration> {
    let bad = || Error::value(format!("invalid interval {input:?}"));
    if input.contains("mon") || input.contains("year") {
        return Err(Error::value(
            "months and years have no fixed length and cannot be intervals",
        ));
    }
    let (rest, negative) = match input.strip_prefix('-') {
        Some(rest) => (rest, true),
        None => (input, false),
    };
    let mut micros: i64 = 0;
    let mut last_unit: Option<usize> = None;
    let mut chars = rest.char_indices().peekable();
    while let Some(&(start, c)) = chars.peek() {
        if !c.is_ascii_digit() {
            return Err(bad());
        }
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let number: i64 = rest[start..end].parse().map_err(|_| bad())?;
        let mut unit_end = end;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_alphabetic() {
                unit_end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let unit = &rest[end..unit_end];
        let index = if unit.is_empty() {
            // Bare trailing number: one unit smaller than the previous run.
            match last_unit {
                Some(i) if i + 1 < UNITS.len() => i + 1,
                _ => return Err(bad()),
            }
        } else {
            UNITS.iter().position(|(name, _)| *name == unit).ok_or_else(bad)?
        };
        micros = micros
            .checked_add(number.checked_mul(UNITS[index].1).ok_or_else(bad)?)
            .ok_or_else(bad)?;
        last_unit = Some(index);
    }
    if last_unit.is_none() {
        return Err(bad());
    }
    Ok(Duration::microseconds(if negative { -micros } else { micros }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_form_round_trips() {
        let d = Duration::seconds(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5);
        assert_eq!(format_interval(d), "2 days 03:04:05");
        assert_eq!(parse_interval("2 days 03:04:05").unwrap(), d);
        assert_eq!(parse_interval("51:04:05").unwrap(), d);
    }

    #[test]
    fn fractional_seconds() {
        let d = Duration::microseconds(1_500_000);
        assert_eq!(format_interval(d), "00:00:01.500000");
        assert_eq!(parse_interval("00:00:01.5").unwrap(), d);
    }

    #[test]
    fn unit_form() {
        assert_eq!(
            parse_interval("1d2h30m").unwrap(),
            Duration::seconds(86_400 + 2 * 3_600 + 30 * 60),
        );
        assert_eq!(parse_interval("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_interval("-90s").unwrap(), Duration::seconds(-90));
    }

    #[test]
    fn lax_trailing_number_takes_next_smaller_unit() {
        assert_eq!(
            parse_interval("1h30").unwrap(),
            Duration::minutes(90),
        );
        assert!(parse_interval("30").is_err());
    }

    #[test]
    fn calendar_units_rejected() {
        assert!(parse_interval("1mon").is_err());
        assert!(parse_interval("2years").is_err());
    }

    #[test]
    fn negative_with_days() {
        let d = Duration::seconds(-(86_400 + 7_200));
        assert_eq!(format_interval(d), "-1 day -02:00:00");
        assert_eq!(parse_interval("-1 day -02:00:00").unwrap(), d);
    }
}
