//! UTC timestamp codecs for the Postgres backend.
//!
//! Values are exchanged as ISO-8601 text normalized to UTC. Decoding keeps
//! whole seconds only: everything from the first `.` onwards is dropped
//! before parsing, including any offset that followed the fraction. Callers
//! must not rely on sub-second precision surviving a round trip.
//!
//! [`UtcTimestamp`] plugs these rules into sqlx, so `timestamp` and
//! `timestamptz` columns read through the client handle are decoded by the
//! codec rather than by the driver's default conversion.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo, PgValueFormat, PgValueRef, Postgres};
use sqlx::{Decode, Encode, Type, ValueRef};
use thiserror::Error;

/// Errors produced by the timestamp codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The input is not a recognizable timestamp.
    #[error("malformed timestamp '{value}'")]
    Malformed {
        /// The raw value as received.
        value: String,
    },
}

/// Postgres timestamp types that get a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampKind {
    /// `timestamp` (without time zone).
    Plain,
    /// `timestamptz`.
    WithTimeZone,
}

impl TimestampKind {
    /// Name of the type in `pg_catalog`.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Plain => "timestamp",
            Self::WithTimeZone => "timestamptz",
        }
    }
}

/// Encoder/decoder pair bound to one timestamp type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampCodec {
    kind: TimestampKind,
}

impl TimestampCodec {
    pub fn new(kind: TimestampKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TimestampKind {
        self.kind
    }

    pub fn encode(&self, value: &DateTime<Utc>) -> String {
        encode_timestamp(value)
    }

    /// # Errors
    ///
    /// Returns `CodecError::Malformed` if `raw` cannot be parsed.
    pub fn decode(&self, raw: &str) -> Result<DateTime<Utc>, CodecError> {
        decode_timestamp(raw)
    }
}

/// The codec pair installed on every Postgres connection.
pub(crate) fn server_codecs() -> Vec<TimestampCodec> {
    vec![
        TimestampCodec::new(TimestampKind::Plain),
        TimestampCodec::new(TimestampKind::WithTimeZone),
    ]
}

/// A UTC instant read from or bound to a Postgres `timestamp` or
/// `timestamptz` column.
///
/// Decoding applies [`decode_timestamp`] to the value in both wire formats,
/// so sub-second precision is dropped and `timestamp` values are taken as
/// UTC. Encoding binds a `timestamptz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcTimestamp(pub DateTime<Utc>);

impl UtcTimestamp {
    /// Decodes the text form of a column value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Malformed` if `raw` cannot be parsed.
    pub fn from_text(raw: &str) -> Result<Self, CodecError> {
        decode_timestamp(raw).map(Self)
    }

    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for UtcTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Type<Postgres> for UtcTimestamp {
    fn type_info() -> PgTypeInfo {
        <DateTime<Utc> as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <DateTime<Utc> as Type<Postgres>>::compatible(ty)
            || <NaiveDateTime as Type<Postgres>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Postgres> for UtcTimestamp {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(Self::from_text(value.as_str()?)?),
            PgValueFormat::Binary => {
                let plain = <NaiveDateTime as Type<Postgres>>::compatible(&value.type_info());
                let instant = if plain {
                    <NaiveDateTime as Decode<Postgres>>::decode(value)?.and_utc()
                } else {
                    <DateTime<Utc> as Decode<Postgres>>::decode(value)?
                };
                Ok(Self::from_text(&encode_timestamp(&instant))?)
            }
        }
    }
}

impl Encode<'_, Postgres> for UtcTimestamp {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(&self.0, buf)
    }
}

/// Formats `value` as ISO-8601 with an explicit `+00:00` offset.
pub fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parses a server-supplied timestamp into UTC.
///
/// Accepts a `T` or a space between date and time, and a bare `+HH` offset
/// such as Postgres emits for `timestamptz`. Values without an offset are
/// taken as UTC.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if `raw` cannot be parsed.
pub fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, CodecError> {
    let malformed = || CodecError::Malformed {
        value: raw.to_string(),
    };

    let trimmed = raw.trim();
    let whole_seconds = trimmed.split('.').next().unwrap_or(trimmed);
    let normalized = normalize_offset(&normalize_separator(whole_seconds));

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| malformed())
}

fn normalize_separator(value: &str) -> String {
    match value.get(10..11) {
        Some(" ") => format!("{}T{}", &value[..10], &value[11..]),
        _ => value.to_string(),
    }
}

/// Expands `+HH` to `+HH:00` and `+HHMM` to `+HH:MM`.
fn normalize_offset(value: &str) -> String {
    let Some(time) = value.get(11..) else {
        return value.to_string();
    };
    let Some(sign_at) = time.find(['+', '-']) else {
        return value.to_string();
    };
    let split = 11 + sign_at + 1;
    let (head, offset) = value.split_at(split);
    if !offset.bytes().all(|b| b.is_ascii_digit()) {
        return value.to_string();
    }
    match offset.len() {
        2 => format!("{head}{offset}:00"),
        4 => format!("{head}{}:{}", &offset[..2], &offset[2..]),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn fractional_seconds_and_short_offset_are_discarded() {
        let truncated = decode_timestamp("2024-01-15T10:30:00.123456+00").unwrap();
        let canonical = decode_timestamp("2024-01-15T10:30:00+00:00").unwrap();
        assert_eq!(truncated, canonical);
        assert_eq!(canonical, instant());
    }

    #[test]
    fn postgres_text_output_is_accepted() {
        assert_eq!(decode_timestamp("2024-01-15 10:30:00+00").unwrap(), instant());
        assert_eq!(decode_timestamp("2024-01-15 10:30:00").unwrap(), instant());
    }

    #[test]
    fn non_utc_offsets_are_normalized_to_utc() {
        assert_eq!(decode_timestamp("2024-01-15T12:30:00+02").unwrap(), instant());
        assert_eq!(decode_timestamp("2024-01-15T05:00:00-0530").unwrap(), instant());
    }

    #[test]
    fn naive_values_are_read_as_utc() {
        assert_eq!(decode_timestamp("2024-01-15T10:30:00").unwrap(), instant());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode_timestamp("yesterday").unwrap_err();
        assert_eq!(
            err,
            CodecError::Malformed {
                value: "yesterday".to_string()
            }
        );
        assert!(decode_timestamp("").is_err());
    }

    #[test]
    fn encode_uses_explicit_utc_offset() {
        assert_eq!(encode_timestamp(&instant()), "2024-01-15T10:30:00+00:00");
        let codec = TimestampCodec::new(TimestampKind::WithTimeZone);
        assert_eq!(codec.decode(&codec.encode(&instant())).unwrap(), instant());
    }

    #[test]
    fn sub_second_precision_is_truncated() {
        let precise = instant() + chrono::Duration::microseconds(987_654);
        let codec = TimestampCodec::new(TimestampKind::Plain);
        assert_eq!(codec.decode(&codec.encode(&precise)).unwrap(), instant());
    }

    #[test]
    fn column_text_decodes_through_codec() {
        let decoded = UtcTimestamp::from_text("2024-01-15 10:30:00.999999+00").unwrap();
        assert_eq!(decoded.into_inner(), instant());
        assert!(UtcTimestamp::from_text("not a time").is_err());
    }

    #[test]
    fn column_type_accepts_both_timestamp_types() {
        let with_tz = <DateTime<Utc> as Type<Postgres>>::type_info();
        let plain = <NaiveDateTime as Type<Postgres>>::type_info();
        let text = <String as Type<Postgres>>::type_info();

        assert_eq!(<UtcTimestamp as Type<Postgres>>::type_info(), with_tz);
        assert!(<UtcTimestamp as Type<Postgres>>::compatible(&with_tz));
        assert!(<UtcTimestamp as Type<Postgres>>::compatible(&plain));
        assert!(!<UtcTimestamp as Type<Postgres>>::compatible(&text));
    }

    #[test]
    fn server_codec_pair_covers_both_types() {
        let kinds: Vec<_> = server_codecs().iter().map(TimestampCodec::kind).collect();
        assert_eq!(kinds, vec![TimestampKind::Plain, TimestampKind::WithTimeZone]);
        assert_eq!(TimestampKind::Plain.type_name(), "timestamp");
        assert_eq!(TimestampKind::WithTimeZone.type_name(), "timestamptz");
    }
}
