use std::error::Error;
use std::fmt::Write as _;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use postgres_types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};
use tokio::task::JoinHandle;
use tokio_postgres::{CancelToken, Client, NoTls, Row, RowStream};
use tracing::{debug, warn};

use super::{Connection, QueryEngine, RowCursor};
use crate::error::EngineError;
use crate::source::Query;
use crate::value::Value;

type BoxError = Box<dyn Error + Sync + Send>;

/// PostgreSQL engine. Descriptors are libpq-style connection strings
/// (`host=... user=...` or `postgres://...`).
#[derive(Debug, Default, Clone)]
pub struct PgEngine;

impl PgEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueryEngine for PgEngine {
    async fn open(&self, descriptor: &str) -> Result<Box<dyn Connection>, EngineError> {
        debug!("Connecting to PostgreSQL source");
        let (client, connection) = tokio_postgres::connect(descriptor, NoTls).await?;

        // Spawn the connection driver
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("Connection error: {}", e);
            }
        });

        let cancel = client.cancel_token();
        Ok(Box::new(PgConnection {
            client: Some(client),
            cancel,
            driver: Some(driver),
        }))
    }
}

pub struct PgConnection {
    client: Option<Client>,
    cancel: CancelToken,
    driver: Option<JoinHandle<()>>,
}

impl PgConnection {
    fn client(&self) -> Result<&Client, EngineError> {
        self.client
            .as_ref()
            .ok_or_else(|| EngineError::Script("connection already closed".into()))
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn ping(&mut self) -> Result<(), EngineError> {
        self.client()?.batch_execute("SELECT 1").await?;
        Ok(())
    }

    async fn query(&mut self, query: &Query) -> Result<Box<dyn RowCursor>, EngineError> {
        let client = self.client()?;
        let statement = client.prepare(query.text()).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let params = query.args().iter().map(|a| TextParam(a.as_str()));
        let stream = client.query_raw(&statement, params).await?;
        Ok(Box::new(PgCursor {
            columns,
            stream: Some(Box::pin(stream)),
            current: None,
        }))
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        self.cancel.cancel_query(NoTls).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        // Dropping the client sends Terminate; the driver then finishes.
        drop(self.client.take());
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Connection driver ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

struct PgCursor {
    columns: Vec<String>,
    stream: Option<Pin<Box<RowStream>>>,
    current: Option<Row>,
}

#[async_trait]
impl RowCursor for PgCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn advance(&mut self) -> Result<bool, EngineError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        match stream.next().await {
            Some(Ok(row)) => {
                self.current = Some(row);
                Ok(true)
            }
            Some(Err(e)) => {
                self.current = None;
                Err(e.into())
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn decode(&mut self) -> Result<Vec<Value>, EngineError> {
        let row = self.current.as_ref().ok_or(EngineError::NoCurrentRow)?;
        let mut values = Vec::with_capacity(self.columns.len());
        for (idx, name) in self.columns.iter().enumerate() {
            let cell: PgCell = row.try_get(idx).map_err(|e| EngineError::Decode {
                column: name.clone(),
                reason: e.to_string(),
            })?;
            values.push(cell.0);
        }
        Ok(values)
    }

    fn close(&mut self) {
        self.current = None;
        self.stream = None;
    }
}

/// Query argument sent in text format with an unspecified type, so the
/// server infers the parameter type from the statement.
#[derive(Debug)]
struct TextParam<'a>(&'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// One decoded column of a binary-format result row. Every type decodes:
/// types without a dedicated rendering fall back to their raw text.
struct PgCell(Value);

impl<'a> FromSql<'a> for PgCell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::CHAR => Value::Int(i8::from_sql(ty, raw)?.into()),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Text(decode_numeric(raw)?),
            Type::MONEY => Value::Text(decode_money(raw)?),
            Type::BYTEA => Value::Bytes(raw.to_vec()),
            Type::TIMESTAMP => {
                Value::Text(chrono::NaiveDateTime::from_sql(ty, raw)?.to_string())
            }
            Type::TIMESTAMPTZ => Value::Text(
                chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?.to_string(),
            ),
            Type::DATE => Value::Text(chrono::NaiveDate::from_sql(ty, raw)?.to_string()),
            Type::TIME => Value::Text(chrono::NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::TIMETZ => Value::Text(decode_timetz(raw)?),
            Type::INTERVAL => Value::Text(decode_interval(raw)?),
            Type::UUID => Value::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
            Type::JSON | Type::JSONB => {
                Value::Text(serde_json::Value::from_sql(ty, raw)?.to_string())
            }
            Type::INET | Type::CIDR => Value::Text(decode_inet(raw)?),
            Type::BIT | Type::VARBIT => Value::Text(decode_bits(raw)?),
            _ => match ty.kind() {
                Kind::Array(member) => Value::Text(decode_array(member, raw)?),
                Kind::Domain(base) => return PgCell::from_sql(base, raw),
                _ if <&str as FromSql>::accepts(ty) => {
                    Value::Text(<&str>::from_sql(ty, raw)?.to_string())
                }
                // Enums and unknown types: text when it is text, hex otherwise.
                _ => Value::Text(raw_text(raw)),
            },
        };
        Ok(PgCell(value))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(PgCell(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Big-endian reader over a binary wire value.
struct Wire<'a> {
    raw: &'a [u8],
}

impl<'a> Wire<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BoxError> {
        if self.raw.len() < n {
            return Err("truncated value".into());
        }
        let (head, tail) = self.raw.split_at(n);
        self.raw = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, BoxError> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, BoxError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64, BoxError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(i64::from_be_bytes(buf))
    }
}

fn raw_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let mut out = String::with_capacity(2 + raw.len() * 2);
            out.push_str("\\x");
            for b in raw {
                let _ = write!(out, "{:02x}", b);
            }
            out
        }
    }
}

/// `HH:MM:SS[.ffffff]` for a non-negative count of microseconds.
fn clock(micros: u64) -> String {
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;
    let mut out = format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
    if frac > 0 {
        let digits = format!("{:06}", frac);
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

/// Interval in the server's default `postgres` output style, e.g.
/// `1 year 2 mons 3 days 04:05:06`.
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    let mut wire = Wire { raw };
    let micros = wire.i64()?;
    let days = wire.i32()?;
    let months = wire.i32()?;

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("{} {}", n, unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };
    let mut parts = Vec::new();
    let (years, mons) = (months / 12, months % 12);
    if years != 0 {
        parts.push(plural(years.into(), "year"));
    }
    if mons != 0 {
        parts.push(plural(mons.into(), "mon"));
    }
    if days != 0 {
        parts.push(plural(days.into(), "day"));
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        parts.push(format!("{}{}", sign, clock(micros.unsigned_abs())));
    }
    Ok(parts.join(" "))
}

/// `time with time zone`: microseconds since midnight plus an offset in
/// seconds west of UTC.
fn decode_timetz(raw: &[u8]) -> Result<String, BoxError> {
    let mut wire = Wire { raw };
    let micros = wire.i64()?;
    let west = wire.i32()?;
    let micros = u64::try_from(micros).map_err(|_| "negative time of day")?;

    let east = -i64::from(west);
    let sign = if east < 0 { '-' } else { '+' };
    let east = east.unsigned_abs();
    let mut out = clock(micros);
    let _ = write!(out, "{}{:02}", sign, east / 3600);
    if east % 3600 != 0 {
        let _ = write!(out, ":{:02}", east % 3600 / 60);
    }
    Ok(out)
}

/// `money` is an int64 count of cents.
fn decode_money(raw: &[u8]) -> Result<String, BoxError> {
    let cents = Wire { raw }.i64()?;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    Ok(format!("{}{}.{:02}", sign, cents / 100, cents % 100))
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// `inet`/`cidr`: family, prefix bits, cidr flag, address length, address.
/// The prefix is shown when it is narrower than the address or for cidr.
fn decode_inet(raw: &[u8]) -> Result<String, BoxError> {
    let mut wire = Wire { raw };
    let family = wire.u8()?;
    let bits = wire.u8()?;
    let is_cidr = wire.u8()? != 0;
    let len = wire.u8()? as usize;
    let addr = wire.take(len)?;
    let (text, full) = match (family, addr.len()) {
        (PGSQL_AF_INET, 4) => {
            let b: [u8; 4] = [addr[0], addr[1], addr[2], addr[3]];
            (std::net::Ipv4Addr::from(b).to_string(), 32)
        }
        (PGSQL_AF_INET6, 16) => {
            let mut b = [0u8; 16];
            b.copy_from_slice(addr);
            (std::net::Ipv6Addr::from(b).to_string(), 128)
        }
        _ => return Err(format!("unknown inet family {} (length {})", family, len).into()),
    };
    if is_cidr || bits != full {
        Ok(format!("{}/{}", text, bits))
    } else {
        Ok(text)
    }
}

/// `bit`/`varbit`: bit length followed by the packed bits.
fn decode_bits(raw: &[u8]) -> Result<String, BoxError> {
    let mut wire = Wire { raw };
    let nbits = usize::try_from(wire.i32()?).map_err(|_| "negative bit length")?;
    let bytes = wire.take(nbits.div_ceil(8))?;
    Ok((0..nbits)
        .map(|i| if bytes[i / 8] & (0x80 >> (i % 8)) != 0 { '1' } else { '0' })
        .collect())
}

/// Array in the server's text form: `{1,2}`, `{{1,2},{3,4}}`, `{a,NULL,"b c"}`.
fn decode_array(member: &Type, raw: &[u8]) -> Result<String, BoxError> {
    let mut wire = Wire { raw };
    let ndim = usize::try_from(wire.i32()?).map_err(|_| "negative array dimension count")?;
    let _has_nulls = wire.i32()?;
    let _elem_oid = wire.i32()?;
    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let len = usize::try_from(wire.i32()?).map_err(|_| "negative array length")?;
        let _lower_bound = wire.i32()?;
        dims.push(len);
    }
    if dims.is_empty() {
        return Ok("{}".to_string());
    }

    let mut out = String::new();
    write_array_level(member, &dims, &mut wire, &mut out)?;
    Ok(out)
}

fn write_array_level(
    member: &Type,
    dims: &[usize],
    wire: &mut Wire<'_>,
    out: &mut String,
) -> Result<(), BoxError> {
    out.push('{');
    for i in 0..dims[0] {
        if i > 0 {
            out.push(',');
        }
        if dims.len() > 1 {
            write_array_level(member, &dims[1..], wire, out)?;
            continue;
        }
        let len = wire.i32()?;
        if len < 0 {
            out.push_str("NULL");
            continue;
        }
        let cell = PgCell::from_sql(member, wire.take(len as usize)?)?;
        out.push_str(&quote_array_element(&crate::value::format_value(&cell.0)));
    }
    out.push('}');
    Ok(())
}

fn quote_array_element(s: &str) -> std::borrow::Cow<'_, str> {
    let needs_quotes = s.is_empty()
        || s.eq_ignore_ascii_case("NULL")
        || s.chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return s.into();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out.into()
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary NUMERIC (base-10000 digits) as its decimal text.
fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated numeric value".into())
    };
    let ndigits = word(0)? as usize;
    let weight = word(1)? as i16 as i64;
    let sign = word(2)?;
    let dscale = word(3)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<u16>, _>>()?;
    let digit = |j: i64| -> u16 {
        if j < 0 {
            0
        } else {
            digits.get(j as usize).copied().unwrap_or(0)
        }
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG && digits.iter().any(|&d| d != 0) {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for j in 0..=weight {
            if j == 0 {
                let _ = write!(out, "{}", digit(j));
            } else {
                let _ = write!(out, "{:04}", digit(j));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut j = weight + 1;
        while frac.len() < dscale {
            let _ = write!(frac, "{:04}", digit(j));
            j += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}
