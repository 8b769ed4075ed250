//! PostgreSQL source over `tokio-postgres`

use crate::config::SourceConfig;
use crate::data::{Cell, Column, ColumnKind, ExtractionResult};
use crate::error::{ExtractError, Result};
use crate::etl::{Connector, Query, Session, quote_ident};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row, Statement};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type Param = Box<dyn ToSql + Sync + Send>;
type DecodeError = Box<dyn Error + Sync + Send>;

/// Connects to PostgreSQL using libpq-style parameters
///
/// The source's `config` map is passed through as connection keywords
/// (`host`, `port`, `user`, `password`, `dbname`, `sslmode`, ...).
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    connect_timeout: Duration,
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build the driver configuration for a source
    pub fn config_for(&self, source: &SourceConfig) -> Result<Config> {
        let keywords = source
            .connection
            .iter()
            .map(|(key, value)| format!("{}='{}'", key, escape_keyword_value(value)))
            .collect::<Vec<_>>()
            .join(" ");

        let mut config = Config::from_str(&keywords).map_err(|e| {
            ExtractError::Config(format!(
                "source '{}': invalid connection parameters: {}",
                source.name, e
            ))
        })?;

        if config.get_connect_timeout().is_none() {
            config.connect_timeout(self.connect_timeout);
        }
        if config.get_application_name().is_none() {
            config.application_name(env!("CARGO_PKG_NAME"));
        }
        Ok(config)
    }
}

fn escape_keyword_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl Connector for PostgresConnector {
    type Session = PostgresSession;

    async fn connect(&self, source: &SourceConfig) -> Result<PostgresSession> {
        let config = self.config_for(source)?;
        log::debug!("Connecting to source '{}'", source.name);

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            ExtractError::Connection(format!("source '{}': {}", source.name, e))
        })?;

        let name = source.name.clone();
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("Connection to source '{}' failed: {}", name, e);
            }
        });

        Ok(PostgresSession { client, connection })
    }
}

/// One open PostgreSQL connection, closed on drop
pub struct PostgresSession {
    client: Client,
    connection: JoinHandle<()>,
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

fn query_error(query: &Query, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Query(format!("{}: {}", query.table(), e))
}

impl PostgresSession {
    /// Prepare the query, casting columns without a cell kind to `text`
    async fn prepare(&self, query: &Query) -> Result<Statement> {
        let statement = self
            .client
            .prepare(&query.sql())
            .await
            .map_err(|e| query_error(query, e))?;

        let columns = statement
            .columns()
            .iter()
            .map(|c| (c.name(), c.type_()));
        let Some(projection) = text_projection(columns) else {
            return Ok(statement);
        };
        log::debug!(
            "{}: reading {} as text",
            query.table(),
            projection.join(", ")
        );
        self.client
            .prepare(&query.sql_projecting(&projection))
            .await
            .map_err(|e| query_error(query, e))
    }
}

/// Select list that reads unsupported columns as text, `None` if every
/// column already has a cell kind
fn text_projection<'a>(
    columns: impl IntoIterator<Item = (&'a str, &'a Type)>,
) -> Option<Vec<String>> {
    let mut cast = false;
    let projection: Vec<String> = columns
        .into_iter()
        .map(|(name, ty)| {
            let quoted = quote_ident(name);
            if kind_of(ty).is_some() {
                quoted
            } else {
                cast = true;
                format!("{}::text AS {}", quoted, quoted)
            }
        })
        .collect();
    cast.then_some(projection)
}

#[async_trait]
impl Session for PostgresSession {
    async fn query(&self, query: &Query) -> Result<ExtractionResult> {
        let statement = self.prepare(query).await?;

        let params = query
            .params()
            .into_iter()
            .zip(statement.params())
            .map(|(value, ty)| bind(ty, value).map_err(|e| query_error(query, e)))
            .collect::<Result<Vec<Param>>>()?;
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p.as_ref() as _).collect();

        let columns = statement
            .columns()
            .iter()
            .map(|column| {
                kind_of(column.type_())
                    .map(|kind| Column::new(column.name(), kind))
                    .ok_or_else(|| {
                        query_error(
                            query,
                            format!(
                                "column '{}' has unsupported type {}",
                                column.name(),
                                column.type_()
                            ),
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        let types: Vec<Type> = statement
            .columns()
            .iter()
            .map(|c| c.type_().clone())
            .collect();

        let rows = self
            .client
            .query(&statement, &param_refs)
            .await
            .map_err(|e| query_error(query, e))?;

        let mut result = ExtractionResult::new(columns);
        for row in &rows {
            let cells = types
                .iter()
                .enumerate()
                .map(|(idx, ty)| decode(row, idx, ty).map_err(|e| query_error(query, e)))
                .collect::<Result<Vec<_>>>()?;
            result.push_row(cells)?;
        }
        Ok(result)
    }
}

/// Cell kind for a PostgreSQL type, `None` when unsupported
fn kind_of(ty: &Type) -> Option<ColumnKind> {
    let kind = match *ty {
        Type::BOOL => ColumnKind::Bool,
        Type::INT2 | Type::INT4 | Type::INT8 => ColumnKind::Int,
        Type::FLOAT4 | Type::FLOAT8 => ColumnKind::Float,
        Type::NUMERIC => ColumnKind::Decimal,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UUID => ColumnKind::Text,
        Type::DATE => ColumnKind::Date,
        Type::TIME => ColumnKind::Time,
        Type::TIMESTAMP => ColumnKind::Timestamp,
        Type::TIMESTAMPTZ => ColumnKind::TimestampTz,
        Type::BYTEA => ColumnKind::Bytes,
        Type::JSON | Type::JSONB => ColumnKind::Json,
        _ => return None,
    };
    Some(kind)
}

/// Convert a stored watermark into a parameter of the type PostgreSQL inferred
fn bind(ty: &Type, value: &str) -> std::result::Result<Param, String> {
    let kind = kind_of(ty).ok_or_else(|| format!("cannot bind a boundary of type {}", ty))?;
    if *ty == Type::UUID {
        return uuid::Uuid::parse_str(value)
            .map(|v| Box::new(v) as Param)
            .map_err(|e| format!("'{}' is not a valid uuid: {}", value, e));
    }

    let out_of_range = || format!("'{}' is out of range for {}", value, ty);
    let param: Param = match (Cell::parse_as(kind, value)?, ty) {
        (Cell::Int(v), &Type::INT2) => Box::new(i16::try_from(v).map_err(|_| out_of_range())?),
        (Cell::Int(v), &Type::INT4) => Box::new(i32::try_from(v).map_err(|_| out_of_range())?),
        (Cell::Int(v), _) => Box::new(v),
        (Cell::Float(v), &Type::FLOAT4) => Box::new(v as f32),
        (Cell::Float(v), _) => Box::new(v),
        (Cell::Decimal(v), _) => Box::new(v),
        (Cell::Time(v), _) => Box::new(v),
        (Cell::Bool(v), _) => Box::new(v),
        (Cell::Text(v), _) => Box::new(v),
        (Cell::Date(v), _) => Box::new(v),
        (Cell::Timestamp(v), _) => Box::new(v),
        (Cell::TimestampTz(v), _) => Box::new(v),
        (other, _) => return Err(format!("cannot bind {:?} as {}", other, ty)),
    };
    Ok(param)
}

/// Column value as sent by the server, converted later by [`decode_value`]
struct RawValue<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        Ok(Self(Some(raw)))
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, DecodeError> {
        Ok(Self(None))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn decode(row: &Row, idx: usize, ty: &Type) -> std::result::Result<Cell, DecodeError> {
    let raw = row.try_get::<_, RawValue>(idx)?;
    decode_value(ty, raw.0)
}

fn get<'a, T: FromSql<'a>>(
    ty: &Type,
    raw: Option<&'a [u8]>,
) -> std::result::Result<Option<T>, DecodeError> {
    Option::<T>::from_sql_nullable(ty, raw)
}

fn decode_value(ty: &Type, raw: Option<&[u8]>) -> std::result::Result<Cell, DecodeError> {
    let cell = match *ty {
        Type::BOOL => get::<bool>(ty, raw)?.map(Cell::Bool),
        Type::INT2 => get::<i16>(ty, raw)?.map(|v| Cell::Int(v.into())),
        Type::INT4 => get::<i32>(ty, raw)?.map(|v| Cell::Int(v.into())),
        Type::INT8 => get::<i64>(ty, raw)?.map(Cell::Int),
        Type::FLOAT4 => get::<f32>(ty, raw)?.map(|v| Cell::Float(v.into())),
        Type::FLOAT8 => get::<f64>(ty, raw)?.map(Cell::Float),
        Type::NUMERIC => get::<Decimal>(ty, raw)?.map(Cell::Decimal),
        Type::UUID => get::<uuid::Uuid>(ty, raw)?.map(|v| Cell::Text(v.to_string())),
        Type::DATE => get::<NaiveDate>(ty, raw)?.map(Cell::Date),
        Type::TIME => get::<NaiveTime>(ty, raw)?.map(Cell::Time),
        Type::TIMESTAMP => get::<NaiveDateTime>(ty, raw)?.map(Cell::Timestamp),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(ty, raw)?.map(Cell::TimestampTz),
        Type::BYTEA => get::<Vec<u8>>(ty, raw)?.map(Cell::Bytes),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(ty, raw)?.map(Cell::Json),
        _ => get::<String>(ty, raw)?.map(Cell::Text),
    };
    Ok(cell.unwrap_or(Cell::Null))
}
