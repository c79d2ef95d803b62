use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc,
};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt::Write;
use thiserror::Error;
use crate::types::Value;
use crate::utils::helper::now_seconds;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("cannot convert {value} ({found}) to {target}")]
    Incompatible {
        value: String,
        found: &'static str,
        target: &'static str,
    },

    #[error("invalid parameter for {target}: {reason}")]
    InvalidParameter {
        target: &'static str,
        reason: String,
    },

    #[error("index {index} out of range for '{value}'")]
    IndexOutOfRange { value: String, index: i64 },

    #[error("cannot parse '{value}' as a date/time (format: {format})")]
    TimeParse { value: String, format: String },

    #[error("timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    #[error("no mapping for value {0}")]
    UnmappedValue(String),
}

pub type ConversionResult = std::result::Result<Value, ConversionError>;
pub type ConversionFn = fn(&Value, &[Value]) -> ConversionResult;

/// One registry entry: the function, how many literal parameters follow the
/// target tag in a chain, and the type tag of what it produces.
#[derive(Debug)]
pub struct Conversion {
    pub func: ConversionFn,
    pub params: usize,
    pub output: &'static str,
}

/// Source tags whose conversions ignore the incoming value.
pub const VALUE_LESS_SOURCES: [&str; 2] = ["none", "now"];

/// Chain tag that skips a step.
pub const SKIP_TAG: &str = "continue";

macro_rules! conversion {
    ($map:ident, $source:expr, $target:expr, $func:expr, $params:expr, $output:expr) => {
        $map.insert(
            ($source, $target),
            Conversion {
                func: $func,
                params: $params,
                output: $output,
            },
        );
    };
}

lazy_static! {
    static ref REGISTRY: HashMap<(&'static str, &'static str), Conversion> = {
        let mut m = HashMap::new();

        // Numbers and booleans
        conversion!(m, "bool", "int", bool_to_int, 0, "int");
        conversion!(m, "float", "int", to_int, 0, "int");
        conversion!(m, "str", "int", to_int, 0, "int");
        conversion!(m, "int", "bool", int_to_bool, 0, "bool");
        conversion!(m, "int", "div", int_div, 1, "float");
        conversion!(m, "any", "value", positive, 0, "bool");
        conversion!(m, "str", "bool", str_to_bool, 0, "bool");
        conversion!(m, "str", "float", to_float, 0, "float");
        conversion!(m, "str", "float_absolut", to_float_abs, 0, "float");
        conversion!(m, "str", "floatNA", to_float_na, 0, "float");

        // Strings
        conversion!(m, "str", "upper", upper, 0, "str");
        conversion!(m, "str", "lower", lower, 0, "str");
        conversion!(m, "str", "split", split, 2, "str");
        conversion!(m, "str", "splitupper", split_upper, 2, "str");
        conversion!(m, "str", "slice", slice, 2, "str");
        conversion!(m, "str", "split_at_del_or_index", split_at_del_or_index, 3, "str");

        // Epoch timestamps to datetimes
        conversion!(m, "float", "from_timestamp", from_timestamp_unit, 1, "datetime");
        conversion!(m, "float", "fromtimestamp", from_timestamp_s, 0, "datetime");
        conversion!(m, "float", "utcfromtimestamp", from_timestamp_s, 0, "datetime");
        conversion!(m, "int", "fromtimestamp", from_timestamp_s, 0, "datetime");
        conversion!(m, "int", "utcfromtimestamp", from_timestamp_s, 0, "datetime");
        conversion!(m, "int", "fromtimestampms", from_timestamp_ms, 0, "datetime");
        conversion!(m, "int", "utcfromtimestampms", from_timestamp_ms, 0, "datetime");
        conversion!(m, "int", "fromtimestampns", from_timestamp_ns, 0, "datetime");

        // Strings to datetimes
        conversion!(m, "str", "strptime", strptime, 1, "datetime");
        conversion!(m, "strptime_w_f", "strptime_wo_f", strptime_without_fraction, 1, "datetime");
        conversion!(m, "str", "dateparser", dateparser, 0, "datetime");

        // Datetimes to strings and timestamps
        conversion!(m, "datetime", "strftime", strftime, 1, "str");
        conversion!(m, "datetime", "format", strftime, 1, "str");
        conversion!(m, "dateparser", "totimestamp", to_timestamp_s, 0, "int");
        conversion!(m, "datetime", "totimestamp", to_timestamp_s, 0, "int");
        conversion!(m, "datetime", "totimestampms", to_timestamp_ms_rounded, 0, "int");
        conversion!(m, "datetime", "utctotimestamp", to_timestamp_s, 0, "int");
        conversion!(m, "datetime", "timestamp", to_timestamp_s, 0, "int");
        conversion!(m, "datetime", "timestampms", to_timestamp_ms, 0, "int");
        conversion!(m, "strptime", "totimestamp", strptime_to_timestamp, 1, "int");

        // Time arithmetic
        conversion!(m, "now", "timedelta", now_minus_days, 1, "int");
        conversion!(m, "datetime", "timedelta", minus_delta_s, 2, "int");
        conversion!(m, "datetime", "timedeltams", minus_delta_ms, 2, "int");
        conversion!(m, "utcfromtimestamp", "timedelta", minus_delta_datetime, 2, "datetime");
        conversion!(m, "timedelta", "from_timestamp", format_timestamp, 2, "str");
        conversion!(m, "from_timestamp", "to_start", period_start, 1, "datetime");
        conversion!(m, "from_timestamp", "to_end", period_end, 1, "datetime");

        // Generators
        conversion!(m, "none", "now", now, 0, "datetime");
        conversion!(m, "none", "nowstrptime", today, 0, "datetime");
        conversion!(m, "none", "now_format", now_format, 1, "str");
        conversion!(m, "none", "now_timestamp", now_timestamp, 0, "int");
        conversion!(m, "none", "now_timestampms", now_timestamp_ms, 0, "int");
        conversion!(m, "none", "constant", constant, 1, "any");
        conversion!(m, "none", "range", range, 0, "list");

        // Lookup
        conversion!(m, "value", "map", map_value, 4, "any");

        m
    };
}

pub fn lookup(source: &str, target: &str) -> Option<&'static Conversion> {
    REGISTRY
        .iter()
        .find(|((s, t), _)| *s == source && *t == target)
        .map(|(_, conversion)| conversion)
}

pub fn registered_pairs() -> Vec<(&'static str, &'static str)> {
    let mut pairs: Vec<_> = REGISTRY.keys().copied().collect();
    pairs.sort();
    pairs
}

fn incompatible(value: &Value, target: &'static str) -> ConversionError {
    ConversionError::Incompatible {
        value: value.to_string(),
        found: value.type_name(),
        target,
    }
}

fn text<'a>(value: &'a Value, target: &'static str) -> Result<&'a str, ConversionError> {
    value.as_text().ok_or_else(|| incompatible(value, target))
}

fn float(value: &Value, target: &'static str) -> Result<f64, ConversionError> {
    value.as_f64().ok_or_else(|| incompatible(value, target))
}

fn datetime(value: &Value, target: &'static str) -> Result<DateTime<Utc>, ConversionError> {
    value.as_datetime().ok_or_else(|| incompatible(value, target))
}

fn int_param(params: &[Value], index: usize, target: &'static str) -> Result<i64, ConversionError> {
    params
        .get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| ConversionError::InvalidParameter {
            target,
            reason: format!("parameter {} must be an integer", index),
        })
}

fn text_param(params: &[Value], index: usize, target: &'static str) -> Result<String, ConversionError> {
    match params.get(index) {
        Some(Value::Null) | None => Err(ConversionError::InvalidParameter {
            target,
            reason: format!("parameter {} is missing", index),
        }),
        Some(value) => Ok(value.to_string()),
    }
}

/// Python-style index into a sequence of `len` items.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

fn pick<'a>(parts: &[&'a str], index: i64, whole: &str) -> Result<&'a str, ConversionError> {
    resolve_index(index, parts.len())
        .map(|i| parts[i])
        .ok_or_else(|| ConversionError::IndexOutOfRange {
            value: whole.to_string(),
            index,
        })
}

fn bool_to_int(value: &Value, _: &[Value]) -> ConversionResult {
    match value {
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        other => other.as_i64().map(Value::Int).ok_or_else(|| incompatible(other, "int")),
    }
}

fn to_int(value: &Value, _: &[Value]) -> ConversionResult {
    value.as_i64().map(Value::Int).ok_or_else(|| incompatible(value, "int"))
}

fn int_to_bool(value: &Value, _: &[Value]) -> ConversionResult {
    value
        .as_i64()
        .map(|i| Value::Bool(i != 0))
        .ok_or_else(|| incompatible(value, "bool"))
}

fn int_div(value: &Value, params: &[Value]) -> ConversionResult {
    let divisor = params.first().and_then(Value::as_f64).unwrap_or(0.0);
    if divisor == 0.0 {
        return Err(ConversionError::InvalidParameter {
            target: "div",
            reason: "divisor must be non-zero".to_string(),
        });
    }
    Ok(Value::Float(float(value, "div")? / divisor))
}

fn positive(value: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::Bool(float(value, "value")? > 0.0))
}

fn str_to_bool(value: &Value, _: &[Value]) -> ConversionResult {
    match value {
        Value::Text(s) => Ok(Value::Bool(s.to_lowercase() == "true")),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        other => Err(incompatible(other, "bool")),
    }
}

fn to_float(value: &Value, _: &[Value]) -> ConversionResult {
    float(value, "float").map(Value::Float)
}

fn to_float_abs(value: &Value, _: &[Value]) -> ConversionResult {
    float(value, "float").map(|f| Value::Float(f.abs()))
}

fn to_float_na(value: &Value, _: &[Value]) -> ConversionResult {
    match value {
        Value::Text(s) if s == "N/A" => Ok(Value::Null),
        other => float(other, "float").map(Value::Float),
    }
}

fn upper(value: &Value, _: &[Value]) -> ConversionResult {
    text(value, "upper").map(|s| Value::Text(s.to_uppercase()))
}

fn lower(value: &Value, _: &[Value]) -> ConversionResult {
    text(value, "lower").map(|s| Value::Text(s.to_lowercase()))
}

fn split(value: &Value, params: &[Value]) -> ConversionResult {
    let s = text(value, "split")?;
    let delimiter = text_param(params, 0, "split")?;
    if !s.contains(delimiter.as_str()) {
        return Ok(Value::Null);
    }
    let parts: Vec<&str> = s.split(delimiter.as_str()).collect();
    Ok(Value::Text(pick(&parts, int_param(params, 1, "split")?, s)?.to_string()))
}

fn split_upper(value: &Value, params: &[Value]) -> ConversionResult {
    let s = text(value, "splitupper")?;
    let delimiter = text_param(params, 0, "splitupper")?;
    let parts: Vec<&str> = s.split(delimiter.as_str()).collect();
    let part = pick(&parts, int_param(params, 1, "splitupper")?, s)?;
    Ok(Value::Text(part.to_uppercase()))
}

/// Python-style `s[start:end]` over characters; a null bound is open.
fn char_slice(s: &str, start: Option<i64>, end: Option<i64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let clamp = |i: i64| -> usize {
        let i = if i < 0 { len + i } else { i };
        i.clamp(0, len) as usize
    };
    let from = start.map(clamp).unwrap_or(0);
    let to = end.map(clamp).unwrap_or(chars.len());
    if from >= to {
        return String::new();
    }
    chars[from..to].iter().collect()
}

fn slice(value: &Value, params: &[Value]) -> ConversionResult {
    let s = text(value, "slice")?;
    let start = params.first().and_then(Value::as_i64);
    let end = params.get(1).and_then(Value::as_i64);
    Ok(Value::Text(char_slice(s, start, end)))
}

fn split_at_del_or_index(value: &Value, params: &[Value]) -> ConversionResult {
    let s = text(value, "split_at_del_or_index")?;
    let delimiter = text_param(params, 0, "split_at_del_or_index")?;
    let index = int_param(params, 1, "split_at_del_or_index")?;
    let side = int_param(params, 2, "split_at_del_or_index")?;

    if s.contains(delimiter.as_str()) {
        let parts: Vec<&str> = s.split(delimiter.as_str()).collect();
        return Ok(Value::Text(pick(&parts, side, s)?.to_string()));
    }
    if side == 0 {
        Ok(Value::Text(char_slice(s, None, Some(index))))
    } else {
        Ok(Value::Text(char_slice(s, Some(index), None)))
    }
}

/// Epoch value in seconds (unit 0), milliseconds (1), microseconds (2) or
/// nanoseconds (3).
pub fn from_epoch(value: &Value, unit: u32) -> Result<DateTime<Utc>, ConversionError> {
    let out_of_range = || ConversionError::TimestampOutOfRange(value.to_string());
    if unit > 3 {
        return Err(ConversionError::InvalidParameter {
            target: "from_timestamp",
            reason: format!("unknown time unit {}", unit),
        });
    }
    let per_second = 1000_i64.pow(unit);

    match value {
        Value::Int(ts) => {
            let secs = ts.div_euclid(per_second);
            let nanos = ts.rem_euclid(per_second) * (1_000_000_000 / per_second);
            DateTime::from_timestamp(secs, nanos as u32).ok_or_else(out_of_range)
        }
        other => {
            let seconds = float(other, "from_timestamp")? / per_second as f64;
            let whole = seconds.floor();
            let micros = (((seconds - whole) * 1e6).round() as u32).min(999_999);
            DateTime::from_timestamp(whole as i64, micros * 1000).ok_or_else(out_of_range)
        }
    }
}

fn from_timestamp_unit(value: &Value, params: &[Value]) -> ConversionResult {
    let unit = int_param(params, 0, "from_timestamp")?;
    from_epoch(value, unit.max(0) as u32).map(Value::DateTime)
}

fn from_timestamp_s(value: &Value, _: &[Value]) -> ConversionResult {
    from_epoch(value, 0).map(Value::DateTime)
}

fn from_timestamp_ms(value: &Value, _: &[Value]) -> ConversionResult {
    from_epoch(value, 1).map(Value::DateTime)
}

fn from_timestamp_ns(value: &Value, _: &[Value]) -> ConversionResult {
    from_epoch(value, 3).map(Value::DateTime)
}

/// Parses with a strftime-style format. Formats without a time part yield
/// midnight; formats with an offset are normalized to UTC.
pub fn parse_with_format(s: &str, format: &str) -> Result<DateTime<Utc>, ConversionError> {
    if let Ok(dt) = DateTime::parse_from_str(s, format) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(ConversionError::TimeParse {
        value: s.to_string(),
        format: format.to_string(),
    })
}

fn strptime(value: &Value, params: &[Value]) -> ConversionResult {
    let format = text_param(params, 0, "strptime")?;
    parse_with_format(text(value, "strptime")?, &format).map(Value::DateTime)
}

fn strptime_without_fraction(value: &Value, params: &[Value]) -> ConversionResult {
    let format = text_param(params, 0, "strptime_wo_f")?;
    let s = text(value, "strptime_wo_f")?;
    let head = s.split('.').next().unwrap_or(s);
    parse_with_format(head, &format).map(Value::DateTime)
}

const DATEPARSER_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ConversionError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in DATEPARSER_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(ConversionError::TimeParse {
        value: s.to_string(),
        format: "auto".to_string(),
    })
}

fn dateparser(value: &Value, _: &[Value]) -> ConversionResult {
    parse_datetime(text(value, "dateparser")?).map(Value::DateTime)
}

pub fn format_datetime(dt: &DateTime<Utc>, format: &str) -> Result<String, ConversionError> {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ConversionError::InvalidParameter {
            target: "strftime",
            reason: format!("invalid format '{}'", format),
        });
    }
    let mut out = String::new();
    write!(out, "{}", dt.format_with_items(items.iter())).map_err(|_| {
        ConversionError::InvalidParameter {
            target: "strftime",
            reason: format!("cannot render format '{}'", format),
        }
    })?;
    Ok(out)
}

fn strftime(value: &Value, params: &[Value]) -> ConversionResult {
    let format = text_param(params, 0, "strftime")?;
    format_datetime(&datetime(value, "strftime")?, &format).map(Value::Text)
}

fn to_timestamp_s(value: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::Int(datetime(value, "totimestamp")?.timestamp()))
}

fn to_timestamp_ms(value: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::Int(datetime(value, "timestampms")?.timestamp() * 1000))
}

fn to_timestamp_ms_rounded(value: &Value, _: &[Value]) -> ConversionResult {
    let dt = datetime(value, "totimestampms")?;
    let micros = dt.timestamp_micros();
    Ok(Value::Int((micros as f64 / 1000.0).round() as i64))
}

fn strptime_to_timestamp(value: &Value, params: &[Value]) -> ConversionResult {
    let format = text_param(params, 0, "totimestamp")?;
    let dt = parse_with_format(text(value, "totimestamp")?, &format)?;
    Ok(Value::Int(dt.timestamp()))
}

fn delta(unit: &str, amount: i64) -> Result<TimeDelta, ConversionError> {
    let seconds_per_unit = match unit.trim_end_matches('s') {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 604_800,
        other => {
            return Err(ConversionError::InvalidParameter {
                target: "timedelta",
                reason: format!("unknown time unit '{}'", other),
            })
        }
    };
    amount
        .checked_mul(seconds_per_unit)
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| ConversionError::InvalidParameter {
            target: "timedelta",
            reason: format!("{} {} is out of range", amount, unit),
        })
}

fn subtract(dt: DateTime<Utc>, span: TimeDelta) -> Result<DateTime<Utc>, ConversionError> {
    dt.checked_sub_signed(span)
        .ok_or_else(|| ConversionError::TimestampOutOfRange(dt.to_rfc3339()))
}

fn now_minus_days(_: &Value, params: &[Value]) -> ConversionResult {
    let days = int_param(params, 0, "timedelta")?;
    Ok(Value::Int(subtract(now_seconds(), delta("days", days)?)?.timestamp()))
}

fn minus_delta(value: &Value, params: &[Value]) -> Result<DateTime<Utc>, ConversionError> {
    let unit = text_param(params, 0, "timedelta")?;
    let amount = int_param(params, 1, "timedelta")?;
    subtract(datetime(value, "timedelta")?, delta(&unit, amount)?)
}

fn minus_delta_s(value: &Value, params: &[Value]) -> ConversionResult {
    Ok(Value::Int(minus_delta(value, params)?.timestamp()))
}

fn minus_delta_ms(value: &Value, params: &[Value]) -> ConversionResult {
    Ok(Value::Int(minus_delta(value, params)?.timestamp() * 1000))
}

fn minus_delta_datetime(value: &Value, params: &[Value]) -> ConversionResult {
    let start = match value {
        Value::Int(_) | Value::Float(_) => from_epoch(value, 0)?,
        Value::Text(s) => parse_datetime(s)?,
        Value::DateTime(dt) => *dt,
        other => return Err(incompatible(other, "timedelta")),
    };
    let unit = text_param(params, 0, "timedelta")?;
    let amount = int_param(params, 1, "timedelta")?;
    subtract(start, delta(&unit, amount)?).map(Value::DateTime)
}

fn format_timestamp(value: &Value, params: &[Value]) -> ConversionResult {
    let unit = int_param(params, 0, "from_timestamp")?;
    let format = text_param(params, 1, "from_timestamp")?;
    let dt = from_epoch(value, unit.max(0) as u32)?;
    format_datetime(&dt, &format).map(Value::Text)
}

/// Start of the calendar period (minute, hour, day, week, month) containing `dt`.
fn start_of_period(dt: DateTime<Utc>, period: &str) -> Result<DateTime<Utc>, ConversionError> {
    let naive = dt.naive_utc();
    let midnight = naive.date().and_time(NaiveTime::MIN);
    let start = match period.trim_end_matches('s') {
        "second" => naive.with_nanosecond(0),
        "minute" => naive.with_nanosecond(0).and_then(|n| n.with_second(0)),
        "hour" => naive
            .with_nanosecond(0)
            .and_then(|n| n.with_second(0))
            .and_then(|n| n.with_minute(0)),
        "day" => Some(midnight),
        "week" => midnight.checked_sub_signed(TimeDelta::days(i64::from(
            naive.weekday().num_days_from_monday(),
        ))),
        "month" => midnight.with_day(1),
        other => {
            return Err(ConversionError::InvalidParameter {
                target: "to_start",
                reason: format!("unknown period '{}'", other),
            })
        }
    };
    start
        .map(|n| n.and_utc())
        .ok_or_else(|| ConversionError::TimestampOutOfRange(dt.to_rfc3339()))
}

fn end_of_period(dt: DateTime<Utc>, period: &str) -> Result<DateTime<Utc>, ConversionError> {
    let start = start_of_period(dt, period)?;
    let next = match period.trim_end_matches('s') {
        "month" => start.checked_add_months(Months::new(1)),
        "week" => start.checked_add_signed(TimeDelta::weeks(1)),
        "day" => start.checked_add_signed(TimeDelta::days(1)),
        "hour" => start.checked_add_signed(TimeDelta::hours(1)),
        "minute" => start.checked_add_signed(TimeDelta::minutes(1)),
        _ => start.checked_add_signed(TimeDelta::seconds(1)),
    };
    next.and_then(|n| n.checked_sub_signed(TimeDelta::microseconds(1)))
        .ok_or_else(|| ConversionError::TimestampOutOfRange(dt.to_rfc3339()))
}

fn period_start(value: &Value, params: &[Value]) -> ConversionResult {
    let period = text_param(params, 0, "to_start")?;
    start_of_period(datetime(value, "to_start")?, &period).map(Value::DateTime)
}

fn period_end(value: &Value, params: &[Value]) -> ConversionResult {
    let period = text_param(params, 0, "to_end")?;
    end_of_period(datetime(value, "to_end")?, &period).map(Value::DateTime)
}

fn now(_: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::DateTime(now_seconds()))
}

fn today(_: &Value, _: &[Value]) -> ConversionResult {
    let midnight = now_seconds().date_naive().and_time(NaiveTime::MIN);
    Ok(Value::DateTime(midnight.and_utc()))
}

fn now_format(_: &Value, params: &[Value]) -> ConversionResult {
    let format = text_param(params, 0, "now_format")?;
    format_datetime(&now_seconds(), &format).map(Value::Text)
}

fn now_timestamp(_: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::Int(Utc::now().timestamp()))
}

fn now_timestamp_ms(_: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::Int(Utc::now().timestamp_millis()))
}

fn constant(_: &Value, params: &[Value]) -> ConversionResult {
    Ok(params.first().cloned().unwrap_or(Value::Null))
}

fn range(_: &Value, _: &[Value]) -> ConversionResult {
    Ok(Value::List(vec![Value::Int(0)]))
}

/// `[key_a, value_a, key_b, value_b]`: translates e.g. `0`/`1` into `buy`/`sell`.
fn map_value(value: &Value, params: &[Value]) -> ConversionResult {
    let needle = value.to_string();
    params
        .chunks(2)
        .find(|entry| entry.len() == 2 && entry[0].to_string() == needle)
        .map(|entry| entry[1].clone())
        .ok_or(ConversionError::UnmappedValue(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn apply(source: &str, target: &str, value: Value, params: &[Value]) -> ConversionResult {
        let conversion = lookup(source, target).expect("registered conversion");
        assert_eq!(conversion.params, params.len());
        (conversion.func)(&value, params)
    }

    #[test]
    fn split_takes_indexed_part_or_null_without_delimiter() {
        let params = [Value::from("-"), Value::Int(1)];
        assert_eq!(apply("str", "split", "BTC-ETH".into(), &params), Ok("ETH".into()));
        assert_eq!(apply("str", "split", "BTCETH".into(), &params), Ok(Value::Null));
        let params = [Value::from("-"), Value::Int(5)];
        assert!(matches!(
            apply("str", "split", "BTC-ETH".into(), &params),
            Err(ConversionError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn slice_uses_python_bounds() {
        let params = [Value::Int(0), Value::Int(3)];
        assert_eq!(apply("str", "slice", "BTCETH".into(), &params), Ok("BTC".into()));
        let params = [Value::Int(3), Value::Int(6)];
        assert_eq!(apply("str", "slice", "BTCETH".into(), &params), Ok("ETH".into()));
        let params = [Value::Int(-3), Value::Null];
        assert_eq!(apply("str", "slice", "BTCETH".into(), &params), Ok("ETH".into()));
    }

    #[test]
    fn split_at_del_or_index_falls_back_to_position() {
        let params = [Value::from("/"), Value::Int(3), Value::Int(1)];
        assert_eq!(
            apply("str", "split_at_del_or_index", "BTC/USDT".into(), &params),
            Ok("USDT".into())
        );
        assert_eq!(
            apply("str", "split_at_del_or_index", "BTCUSDT".into(), &params),
            Ok("USDT".into())
        );
    }

    #[test]
    fn str_to_bool_is_case_insensitive() {
        assert_eq!(apply("str", "bool", "TRUE".into(), &[]), Ok(Value::Bool(true)));
        assert_eq!(apply("str", "bool", "anything".into(), &[]), Ok(Value::Bool(false)));
    }

    #[test]
    fn zero_is_a_present_value() {
        assert_eq!(apply("str", "int", "0".into(), &[]), Ok(Value::Int(0)));
        assert_eq!(apply("int", "bool", Value::Int(0), &[]), Ok(Value::Bool(false)));
        assert_eq!(apply("bool", "int", Value::Bool(false), &[]), Ok(Value::Int(0)));
    }

    #[test]
    fn float_na_maps_to_null() {
        assert_eq!(apply("str", "floatNA", "N/A".into(), &[]), Ok(Value::Null));
        assert_eq!(apply("str", "floatNA", "1.5".into(), &[]), Ok(Value::Float(1.5)));
    }

    #[test]
    fn millisecond_timestamps_keep_fraction() {
        let result = apply("int", "fromtimestampms", Value::Int(1_538_122_622_123), &[]).unwrap();
        let dt = result.as_datetime().unwrap();
        assert_eq!(dt.timestamp(), 1_538_122_622);
        assert_eq!(dt.timestamp_subsec_micros(), 123_000);

        let result = apply("float", "fromtimestamp", Value::Float(1_538_122_622.123), &[]).unwrap();
        assert_eq!(result.as_datetime().unwrap().timestamp_subsec_micros(), 123_000);
    }

    #[test]
    fn strptime_accepts_date_only_formats() {
        let result = apply("str", "strptime", "2018-10-11".into(), &["%Y-%m-%d".into()]).unwrap();
        assert_eq!(
            result,
            Value::DateTime(Utc.with_ymd_and_hms(2018, 10, 11, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn unparseable_time_is_an_error() {
        assert!(matches!(
            apply("str", "dateparser", "not a date".into(), &[]),
            Err(ConversionError::TimeParse { .. })
        ));
    }

    #[test]
    fn strftime_renders_and_rejects_bad_formats() {
        let dt = Value::DateTime(Utc.with_ymd_and_hms(2018, 10, 11, 12, 6, 0).unwrap());
        assert_eq!(
            apply("datetime", "strftime", dt.clone(), &["%Y-%m-%d %H:%M".into()]),
            Ok("2018-10-11 12:06".into())
        );
        assert!(apply("datetime", "strftime", dt, &["%Q".into()]).is_err());
    }

    #[test]
    fn timedelta_subtracts_named_unit() {
        let dt = Value::DateTime(Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap());
        let expected = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap().timestamp();
        assert_eq!(
            apply("datetime", "timedelta", dt.clone(), &["days".into(), Value::Int(1)]),
            Ok(Value::Int(expected))
        );
        assert_eq!(
            apply("datetime", "timedeltams", dt, &["hours".into(), Value::Int(24)]),
            Ok(Value::Int(expected * 1000))
        );
    }

    #[test]
    fn period_bounds() {
        let dt = Value::DateTime(Utc.with_ymd_and_hms(2021, 3, 17, 13, 45, 12).unwrap());
        assert_eq!(
            apply("from_timestamp", "to_start", dt.clone(), &["hours".into()]),
            Ok(Value::DateTime(Utc.with_ymd_and_hms(2021, 3, 17, 13, 0, 0).unwrap()))
        );
        let end = apply("from_timestamp", "to_end", dt, &["months".into()]).unwrap();
        let end = end.as_datetime().unwrap();
        assert_eq!(end.date_naive(), NaiveDate::from_ymd_opt(2021, 3, 31).unwrap());
        assert_eq!(end.timestamp_subsec_micros(), 999_999);
    }

    #[test]
    fn map_translates_side_codes() {
        let params = [Value::Int(0), "buy".into(), Value::Int(1), "sell".into()];
        assert_eq!(apply("value", "map", Value::Int(1), &params), Ok("sell".into()));
        assert_eq!(apply("value", "map", "0".into(), &params), Ok("buy".into()));
        assert!(apply("value", "map", Value::Int(2), &params).is_err());
    }
}
