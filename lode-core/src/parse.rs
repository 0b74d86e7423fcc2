use crate::{Error, Result};
use time::{
    Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset, macros::format_description,
};

/// Text forms used when exchanging temporal values with a backend.
/// Dates are `YYYY-MM-DD`, times `HH:MM:SS[.ffffff]`, timestamps either
/// space or `T` separated. Parsed timestamps without an offset are taken
/// as being in `assume` (UTC unless the variable declares otherwise).

pub fn parse_date(input: &str) -> Result<Date> {
    Date::parse(input, format_description!("[year]-[month]-[day]"))
        .map_err(|e| Error::value(format!("invalid date {input:?}: {e}")))
}

pub fn parse_time(input: &str) -> Result<Time> {
    Time::parse(
        input,
        format_description!("[hour]:[minute]:[second][optional [.[subsecond]]]"),
    )
    .map_err(|e| Error::value(format!("invalid time {input:?}: {e}")))
}

pub fn parse_datetime(input: &str, assume: UtcOffset) -> Result<OffsetDateTime> {
    let space = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let iso = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(input, space)
        .or_else(|_| PrimitiveDateTime::parse(input, iso))
        .map(|v| v.assume_offset(assume))
        .map_err(|e| Error::value(format!("invalid datetime {input:?}: {e}")))
}

pub fn format_date(value: Date) -> Result<String> {
    value
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|e| Error::value(format!("cannot format date: {e}")))
}

pub fn format_time(value: Time) -> Result<String> {
    let format = if value.microsecond() != 0 {
        format_description!("[hour]:[minute]:[second].[subsecond digits:6]")
    } else {
        format_description!("[hour]:[minute]:[second]")
    };
    value
        .format(format)
        .map_err(|e| Error::value(format!("cannot format time: {e}")))
}

/// Timestamps travel normalized to UTC, without an offset suffix.
pub fn format_datetime(value: OffsetDateTime) -> Result<String> {
    let value = value.to_offset(UtcOffset::UTC);
    let date = format_date(value.date())?;
    let time = format_time(value.time())?;
    Ok(format!("{date} {time}"))
}
