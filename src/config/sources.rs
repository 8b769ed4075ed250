//! Sources file parsing and validation
//!
//! Example format:
//! ```yaml
//! extractors:
//!   - name: adventure_works
//!     config:
//!       host: localhost
//!       port: 5432
//!       user: etl
//!       password: ${PG_PASSWORD}
//!       dbname: adventure_works
//!     tables:
//!       - name: sales.orders
//!         method: incremental
//!         select: [id, status, updated_at]
//!         incremental_column: updated_at
//!       - name: sales.regions
//!         method: full
//!         select: "*"
//! ```

use crate::error::{ExtractError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("valid regex"));

static QUALIFIED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)*$").expect("valid regex")
});

static ENV_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// How a table is extracted on every run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMethod {
    /// Re-read the whole table, ignoring any watermark
    Full,
    /// Read only rows past the stored watermark
    Incremental,
}

impl ExtractMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for ExtractMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column selection as written in the sources file: `"*"`, `"a, b"` or `[a, b]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum Select {
    List(Vec<String>),
    Text(String),
}

impl Select {
    fn into_columns(self) -> Vec<String> {
        let columns = match self {
            Select::List(columns) => columns,
            Select::Text(text) if text.trim() == "*" => Vec::new(),
            Select::Text(text) => text.split(',').map(|c| c.trim().to_string()).collect(),
        };
        columns
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect()
    }
}

/// One table of a source
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableConfig {
    /// Table name, optionally schema-qualified (`sales.orders`)
    pub name: String,

    pub method: ExtractMethod,

    /// Selected columns; empty means all columns
    #[serde(default, deserialize_with = "deserialize_select")]
    pub select: Vec<String>,

    /// Column used as the watermark, required for incremental tables
    #[serde(default)]
    pub incremental_column: Option<String>,
}

fn deserialize_select<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let select = Option::<Select>::deserialize(deserializer)?;
    Ok(select.map(Select::into_columns).unwrap_or_default())
}

impl TableConfig {
    pub fn full(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: ExtractMethod::Full,
            select: Vec::new(),
            incremental_column: None,
        }
    }

    pub fn incremental(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: ExtractMethod::Incremental,
            select: Vec::new(),
            incremental_column: Some(column.into()),
        }
    }

    pub fn with_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Selected columns, `None` when every column is selected
    pub fn columns(&self) -> Option<&[String]> {
        if self.select.is_empty() {
            None
        } else {
            Some(&self.select)
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.method == ExtractMethod::Incremental
    }

    /// Check the table definition, naming the owning source in every message
    pub fn validate(&self, source: &str) -> Result<()> {
        let context = |msg: String| {
            ExtractError::Config(format!("source '{}', table '{}': {}", source, self.name, msg))
        };

        if !QUALIFIED_NAME.is_match(&self.name) {
            return Err(context("table name is not a valid identifier".to_string()));
        }

        if let Some(column) = self.select.iter().find(|c| c.is_empty()) {
            return Err(context(format!("empty column name in select ({:?})", column)));
        }

        match (self.method, self.incremental_column.as_deref()) {
            (ExtractMethod::Incremental, None) => Err(context(
                "incremental_column is required for incremental extraction".to_string(),
            )),
            (ExtractMethod::Incremental, Some(column)) => {
                if !IDENTIFIER.is_match(column) {
                    return Err(context(format!(
                        "incremental_column '{}' is not a valid identifier",
                        column
                    )));
                }
                if let Some(columns) = self.columns()
                    && !columns.iter().any(|c| c == column)
                {
                    return Err(context(format!(
                        "incremental_column '{}' must be part of select",
                        column
                    )));
                }
                Ok(())
            }
            (ExtractMethod::Full, Some(column)) => {
                log::debug!(
                    "{}.{}: ignoring incremental_column '{}' for full extraction",
                    source,
                    self.name,
                    column
                );
                Ok(())
            }
            (ExtractMethod::Full, None) => Ok(()),
        }
    }
}

/// A data source with its connection parameters and tables
#[derive(Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    /// libpq-style connection keywords (`host`, `port`, `user`, ...)
    pub connection: BTreeMap<String, String>,
    pub tables: Vec<TableConfig>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, tables: Vec<TableConfig>) -> Self {
        Self {
            name: name.into(),
            connection: BTreeMap::new(),
            tables,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connection.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.contains('/') {
            return Err(ExtractError::Config(format!(
                "invalid source name '{}'",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(ExtractError::Config(format!(
                    "source '{}': table '{}' is listed twice",
                    self.name, table.name
                )));
            }
            table.validate(&self.name)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection: BTreeMap<&str, &str> = self
            .connection
            .iter()
            .map(|(k, v)| {
                let shown = if k.eq_ignore_ascii_case("password") {
                    "***"
                } else {
                    v.as_str()
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("SourceConfig")
            .field("name", &self.name)
            .field("connection", &connection)
            .field("tables", &self.tables)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    name: String,
    #[serde(default)]
    config: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    tables: Vec<TableConfig>,
}

impl SourceEntry {
    fn resolve(self) -> Result<SourceConfig> {
        let mut connection = BTreeMap::new();
        for (key, value) in self.config {
            let text = match value {
                serde_yaml::Value::String(s) => expand_env(&s)?,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(ExtractError::Config(format!(
                        "source '{}': connection parameter '{}' must be a scalar, got {:?}",
                        self.name, key, other
                    )));
                }
            };
            connection.insert(key, text);
        }

        Ok(SourceConfig {
            name: self.name,
            connection,
            tables: self.tables,
        })
    }
}

/// Expand `${VAR}` references from the process environment
pub fn expand_env(value: &str) -> Result<String> {
    let mut missing = None;
    let expanded = ENV_REFERENCE.replace_all(value, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| {
            missing.get_or_insert_with(|| caps[1].to_string());
            String::new()
        })
    });

    match missing {
        Some(var) => Err(ExtractError::Config(format!(
            "environment variable {} is not set",
            var
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Parsed sources file
#[derive(Debug, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    extractors: Vec<SourceEntry>,
}

impl SourcesFile {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ExtractError::Config(format!("failed to parse sources YAML: {}", e)))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExtractError::Config(format!(
                "failed to read sources file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Resolve environment references and validate every source
    pub fn into_sources(self) -> Result<Vec<SourceConfig>> {
        let sources = self
            .extractors
            .into_iter()
            .map(SourceEntry::resolve)
            .collect::<Result<Vec<_>>>()?;
        validate_sources(&sources)?;
        Ok(sources)
    }
}

/// Load and validate one or more sources files as a single run configuration
pub fn load_sources<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<SourceConfig>> {
    let mut sources = Vec::new();
    for path in paths {
        log::debug!("Loading sources from {}", path.as_ref().display());
        sources.extend(SourcesFile::read(path)?.into_sources()?);
    }
    validate_sources(&sources)?;
    Ok(sources)
}

/// Validate a set of sources, including name uniqueness across them
pub fn validate_sources(sources: &[SourceConfig]) -> Result<()> {
    if sources.is_empty() {
        return Err(ExtractError::Config("no extractors configured".to_string()));
    }

    let mut names = HashSet::new();
    for source in sources {
        if !names.insert(source.name.as_str()) {
            return Err(ExtractError::Config(format!(
                "source '{}' is defined more than once",
                source.name
            )));
        }
        source.validate()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serial_test::serial;

    const SAMPLE: &str = r#"
extractors:
  - name: adventure_works
    config:
      host: localhost
      port: 5432
      dbname: aw
    tables:
      - name: sales.orders
        method: incremental
        select: [id, updated_at]
        incremental_column: updated_at
      - name: regions
        method: full
        select: "*"
      - name: people
        method: full
        select: "id, name"
"#;

    #[test]
    fn test_parse_sample() {
        let sources = SourcesFile::parse(SAMPLE).unwrap().into_sources().unwrap();
        assert_eq!(sources.len(), 1);

        let source = &sources[0];
        assert_eq!(source.name, "adventure_works");
        assert_eq!(source.connection.get("port").map(String::as_str), Some("5432"));
        assert_eq!(source.tables.len(), 3);

        let orders = &source.tables[0];
        assert!(orders.is_incremental());
        assert_eq!(orders.columns(), Some(&["id".to_string(), "updated_at".to_string()][..]));

        assert_eq!(source.tables[1].columns(), None);
        assert_eq!(
            source.tables[2].columns(),
            Some(&["id".to_string(), "name".to_string()][..])
        );
    }

    #[test]
    fn test_incremental_without_column_is_config_error() {
        let yaml = r#"
extractors:
  - name: src
    tables:
      - name: orders
        method: incremental
"#;
        let err = SourcesFile::parse(yaml).unwrap().into_sources().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("incremental_column is required"));
    }

    #[test]
    fn test_incremental_column_must_be_selected() {
        let table = TableConfig::incremental("orders", "updated_at").with_columns(["id"]);
        assert!(table.validate("src").is_err());
    }

    #[test]
    fn test_rejects_injection_in_names() {
        let table = TableConfig::full("orders; DROP TABLE orders");
        assert!(table.validate("src").is_err());

        let table = TableConfig::incremental("orders", "updated_at > '' OR 1=1 --");
        assert!(table.validate("src").is_err());
    }

    #[test]
    fn test_duplicate_sources_rejected() {
        let sources = vec![
            SourceConfig::new("a", vec![TableConfig::full("t")]),
            SourceConfig::new("a", vec![TableConfig::full("u")]),
        ];
        assert!(validate_sources(&sources).is_err());
        assert!(validate_sources(&[]).is_err());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let yaml = "extractors:\n  - name: s\n    tables:\n      - name: t\n        method: cdc\n";
        assert!(SourcesFile::parse(yaml).is_err());
    }

    #[test]
    #[serial]
    fn test_env_expansion() {
        unsafe { std::env::set_var("LANDING_TEST_PG_PASSWORD", "s3cret") };
        assert_eq!(
            expand_env("pw=${LANDING_TEST_PG_PASSWORD}").unwrap(),
            "pw=s3cret"
        );

        unsafe { std::env::remove_var("LANDING_TEST_PG_PASSWORD") };
        let err = expand_env("${LANDING_TEST_PG_PASSWORD}").unwrap_err();
        assert!(err.to_string().contains("LANDING_TEST_PG_PASSWORD"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let source = SourceConfig::new("s", vec![]).with_param("password", "hunter2");
        let debug = format!("{:?}", source);
        assert!(!debug.contains("hunter2"));
    }
}
