//! Dynamic rows.
//!
//! Result shapes are only known at the call site, so rows are ordered maps of
//! column name to JSON value rather than typed structs. Use [`from_row`] to
//! deserialize into a struct when the shape is known.
//!
//! Columns arrive in binary format and are decoded by their declared type.
//! A type with no decoder is an error; it never falls back to a guess.

use crate::error::DbError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use std::error::Error;
use std::fmt::Write;
use std::net::IpAddr;
use tokio_postgres::types::{FromSql, Kind, Type};

/// A result row: column name → value, in select order.
pub type Row = Map<String, Value>;

/// Deserialize a row into `T`.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T, DbError> {
    serde_json::from_value(Value::Object(row.clone()))
        .map_err(|e| DbError::with_code(crate::error::codes::DECODE, e.to_string()))
}

/// Decode a driver row.
pub fn decode_row(row: &tokio_postgres::Row) -> Result<Row, DbError> {
    let mut out = Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = row
            .try_get::<_, Option<RawValue<'_>>>(idx)
            .map_err(|e| DbError::decode(column.name(), e.to_string()))
            .and_then(|raw| match raw {
                Some(RawValue(bytes)) => decode_value(column.type_(), bytes)
                    .map_err(|e| DbError::decode(column.name(), e.to_string())),
                None => Ok(Value::Null),
            })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

type BoxError = Box<dyn Error + Sync + Send>;

/// Undecoded bytes of one non-null value.
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawValue(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn decode_value(ty: &Type, raw: &[u8]) -> Result<Value, BoxError> {
    match ty.kind() {
        Kind::Array(elem) => {
            let items = Vec::<Option<RawValue<'_>>>::from_sql(ty, raw)?;
            return items
                .into_iter()
                .map(|item| match item {
                    Some(RawValue(bytes)) => decode_value(elem, bytes),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }
        Kind::Domain(inner) => return decode_value(inner, raw),
        Kind::Enum(_) => return Ok(Value::String(String::from_sql(ty, raw)?)),
        _ => {}
    }

    Ok(match *ty {
        Type::VOID => Value::Null,
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => Value::String(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
        Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
        Type::OID => Value::from(u32::from_sql(ty, raw)?),
        Type::FLOAT4 => float(f64::from(f32::from_sql(ty, raw)?)),
        Type::FLOAT8 => float(f64::from_sql(ty, raw)?),
        Type::NUMERIC => numeric(&numeric_text(raw)?),
        Type::UUID => Value::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
        Type::TIMESTAMPTZ => {
            Value::String(chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?.to_rfc3339())
        }
        Type::TIMESTAMP => Value::String(
            chrono::NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        Type::DATE => Value::String(chrono::NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => Value::String(chrono::NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::INTERVAL => Value::String(interval_text(raw)?),
        Type::INET | Type::CIDR => Value::String(inet_text(raw)?),
        Type::BYTEA => Value::String(hex_bytea(raw)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Value::String(String::from_sql(ty, raw)?)
        }
        _ if ty.name() == "citext" => Value::String(String::from_sql(ty, raw)?),
        _ => return Err(format!("unsupported column type {}", ty.name()).into()),
    })
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Numeric as a JSON number when it survives the conversion, otherwise its exact text.
fn numeric(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(u) = text.parse::<u64>() {
        return Value::from(u);
    }
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    let significant = digits.trim_start_matches('0').trim_end_matches('0').len();
    if significant <= 15 {
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render the binary `numeric` format (base-10000 digits) as exact decimal text.
fn numeric_text(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);

    match sign {
        NUMERIC_POS | NUMERIC_NEG => {}
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        other => return Err(format!("invalid numeric sign {other:#06x}").into()),
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            let _ = if i == 0 {
                write!(out, "{}", digit(i))
            } else {
                write!(out, "{:04}", digit(i))
            };
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(i));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// `interval` in the server's default output style, e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn interval_text(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 16 {
        return Err("invalid interval length".into());
    }
    let micros = i64::from_be_bytes(raw[0..8].try_into()?);
    let days = i32::from_be_bytes(raw[8..12].try_into()?);
    let months = i32::from_be_bytes(raw[12..16].try_into()?);

    fn unit(n: i32, name: &str) -> String {
        if n == 1 { format!("1 {name}") } else { format!("{n} {name}s") }
    }

    let mut parts = Vec::new();
    if months / 12 != 0 {
        parts.push(unit(months / 12, "year"));
    }
    if months % 12 != 0 {
        parts.push(unit(months % 12, "mon"));
    }
    if days != 0 {
        parts.push(unit(days, "day"));
    }
    if micros != 0 || parts.is_empty() {
        let abs = micros.unsigned_abs();
        let secs = abs / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            if micros < 0 { "-" } else { "" },
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let frac = abs % 1_000_000;
        if frac != 0 {
            let frac = format!("{frac:06}");
            time.push('.');
            time.push_str(frac.trim_end_matches('0'));
        }
        parts.push(time);
    }
    Ok(parts.join(" "))
}

/// `inet`/`cidr`: address, with `/bits` unless it is a full-length host address.
fn inet_text(raw: &[u8]) -> Result<String, BoxError> {
    let [family, bits, is_cidr, len, addr @ ..] = raw else {
        return Err("truncated inet value".into());
    };
    if usize::from(*len) != addr.len() {
        return Err("invalid inet address length".into());
    }
    let ip = match family {
        2 => IpAddr::from(<[u8; 4]>::try_from(addr)?),
        3 => IpAddr::from(<[u8; 16]>::try_from(addr)?),
        other => return Err(format!("unknown inet family {other}").into()),
    };
    let full = if ip.is_ipv4() { 32 } else { 128 };
    Ok(if *is_cidr != 0 || *bits != full {
        format!("{ip}/{bits}")
    } else {
        ip.to_string()
    })
}

fn hex_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use serde::Deserialize;
    use serde_json::json;
    use tokio_postgres::types::ToSql;

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        for word in [digits.len() as u16, weight as u16, sign, dscale]
            .into_iter()
            .chain(digits.iter().copied())
        {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    fn encode(value: &(dyn ToSql + Sync), ty: &Type) -> BytesMut {
        let mut buf = BytesMut::new();
        value.to_sql_checked(ty, &mut buf).unwrap();
        buf
    }

    #[test]
    fn numeric_prefers_numbers() {
        assert_eq!(numeric("12.50"), json!(12.5));
        assert_eq!(numeric("7"), json!(7));
        assert_eq!(numeric("-0.05"), json!(-0.05));
    }

    #[test]
    fn numeric_keeps_wide_values_exact() {
        let wide = numeric_bytes(
            7,
            NUMERIC_POS,
            1,
            &[12, 3456, 7890, 1234, 5678, 9012, 3456, 7890, 5000],
        );
        assert_eq!(
            decode_value(&Type::NUMERIC, &wide).unwrap(),
            json!("123456789012345678901234567890.5")
        );
        assert_eq!(numeric("0.1234567890123456789"), json!("0.1234567890123456789"));
    }

    #[test]
    fn numeric_binary_layout() {
        let small = numeric_bytes(-1, NUMERIC_NEG, 2, &[500]);
        assert_eq!(numeric_text(&small).unwrap(), "-0.05");
        let round = numeric_bytes(1, NUMERIC_POS, 0, &[1]);
        assert_eq!(numeric_text(&round).unwrap(), "10000");
        let zero = numeric_bytes(0, NUMERIC_POS, 2, &[]);
        assert_eq!(numeric_text(&zero).unwrap(), "0.00");
    }

    #[test]
    fn numeric_special_values_are_strings() {
        for (sign, text) in [(NUMERIC_NAN, "NaN"), (NUMERIC_PINF, "Infinity"), (NUMERIC_NINF, "-Infinity")] {
            let raw = numeric_bytes(0, sign, 0, &[]);
            assert_eq!(decode_value(&Type::NUMERIC, &raw).unwrap(), json!(text));
        }
        assert!(numeric_text(&[0, 1]).is_err());
    }

    #[test]
    fn interval_matches_server_output() {
        let raw = |micros: i64, days: i32, months: i32| {
            let mut out = micros.to_be_bytes().to_vec();
            out.extend_from_slice(&days.to_be_bytes());
            out.extend_from_slice(&months.to_be_bytes());
            out
        };
        assert_eq!(interval_text(&raw(7_200_000_000, 1, 0)).unwrap(), "1 day 02:00:00");
        assert_eq!(interval_text(&raw(0, 3, 14)).unwrap(), "1 year 2 mons 3 days");
        assert_eq!(interval_text(&raw(-1_500_000, 0, 0)).unwrap(), "-00:00:01.5");
        assert_eq!(interval_text(&raw(0, 0, 0)).unwrap(), "00:00:00");
        assert_eq!(
            decode_value(&Type::INTERVAL, &raw(0, -2, 0)).unwrap(),
            json!("-2 days")
        );
    }

    #[test]
    fn inet_renders_address_and_prefix() {
        let host: IpAddr = "10.0.0.1".parse().unwrap();
        let raw = encode(&host, &Type::INET);
        assert_eq!(decode_value(&Type::INET, &raw).unwrap(), json!("10.0.0.1"));
        assert_eq!(inet_text(&[2, 8, 1, 4, 10, 0, 0, 0]).unwrap(), "10.0.0.0/8");

        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(decode_value(&Type::INET, &encode(&v6, &Type::INET)).unwrap(), json!("::1"));
        assert!(inet_text(&[2, 32, 0, 4, 10]).is_err());
    }

    #[test]
    fn arrays_decode_each_element_by_type() {
        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let raw = encode(&vec![Some(ts), None], &Type::TIMESTAMP_ARRAY);
        assert_eq!(
            decode_value(&Type::TIMESTAMP_ARRAY, &raw).unwrap(),
            json!(["2024-01-02T03:04:05", null])
        );

        let raw = encode(&vec![vec![0xde_u8, 0xad]], &Type::BYTEA_ARRAY);
        assert_eq!(decode_value(&Type::BYTEA_ARRAY, &raw).unwrap(), json!(["\\xdead"]));

        let raw = encode(&vec![7_u32], &Type::OID_ARRAY);
        assert_eq!(decode_value(&Type::OID_ARRAY, &raw).unwrap(), json!([7]));
    }

    #[test]
    fn domains_and_enums_use_their_base() {
        let positive = Type::new("positive".into(), 90001, Kind::Domain(Type::INT4), "public".into());
        assert_eq!(decode_value(&positive, &5_i32.to_be_bytes()).unwrap(), json!(5));

        let mood = Type::new(
            "mood".into(),
            90002,
            Kind::Enum(vec!["happy".into()]),
            "public".into(),
        );
        assert_eq!(decode_value(&mood, b"happy").unwrap(), json!("happy"));
    }

    #[test]
    fn unknown_types_are_errors() {
        let err = decode_value(&Type::POINT, &[0; 16]).unwrap_err();
        assert!(err.to_string().contains("point"));
    }

    #[test]
    fn bytea_is_hex() {
        assert_eq!(hex_bytea(&[0xde, 0xad]), "\\xdead");
    }

    #[test]
    fn rows_deserialize_into_structs() {
        #[derive(Deserialize)]
        struct User {
            id: String,
            tags: Vec<String>,
        }
        let row = json!({"id": "u1", "tags": ["a"]});
        let user: User = from_row(row.as_object().unwrap()).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.tags, vec!["a"]);
    }
}
