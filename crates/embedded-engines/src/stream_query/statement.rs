//! Statement parsing for the stream-query engine.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:LIST|SHOW)\s+(STREAMS|TABLES|TOPICS)$").expect("list pattern is valid")
});

static CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^CREATE\s+(STREAM|TABLE)\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(.*\))?\s*WITH\s*\((.*)\)$",
    )
    .expect("create pattern is valid")
});

static DROP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^DROP\s+(STREAM|TABLE)\s+(IF\s+EXISTS\s+)?([A-Za-z_][A-Za-z0-9_]*)$")
        .expect("drop pattern is valid")
});

static PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_]+)\s*=\s*'([^']*)'").expect("property pattern is valid")
});

/// Stream or table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Unbounded stream of events
    Stream,
    /// Changelog materialised as a table
    Table,
}

impl SourceKind {
    fn parse(word: &str) -> Self {
        if word.eq_ignore_ascii_case("TABLE") {
            SourceKind::Table
        } else {
            SourceKind::Stream
        }
    }

    /// Upper case keyword
    pub fn keyword(self) -> &'static str {
        match self {
            SourceKind::Stream => "STREAM",
            SourceKind::Table => "TABLE",
        }
    }
}

/// What a `LIST` statement asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// Registered streams
    Streams,
    /// Registered tables
    Tables,
    /// Topics on the cluster
    Topics,
}

/// A parsed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `LIST STREAMS`, `SHOW TABLES`, ...
    List(Listing),
    /// `CREATE STREAM name (...) WITH (KAFKA_TOPIC='t', VALUE_FORMAT='JSON')`
    Create {
        /// Stream or table
        kind: SourceKind,
        /// Upper-cased source name
        name: String,
        /// Backing topic
        topic: String,
        /// Upper-cased value format
        value_format: String,
    },
    /// `DROP STREAM [IF EXISTS] name`
    Drop {
        /// Stream or table
        kind: SourceKind,
        /// Upper-cased source name
        name: String,
        /// Tolerate a missing source
        if_exists: bool,
    },
}

/// Split a request body into trimmed, non-empty statements
pub fn split(ksql: &str) -> Vec<&str> {
    ksql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse one statement without its trailing semicolon
pub fn parse(text: &str) -> Result<Statement, String> {
    if let Some(captures) = LIST.captures(text) {
        let listing = match captures[1].to_uppercase().as_str() {
            "STREAMS" => Listing::Streams,
            "TABLES" => Listing::Tables,
            _ => Listing::Topics,
        };
        return Ok(Statement::List(listing));
    }

    if let Some(captures) = CREATE.captures(text) {
        let properties: BTreeMap<String, String> = PROPERTY
            .captures_iter(&captures[3])
            .map(|p| (p[1].to_uppercase(), p[2].to_string()))
            .collect();

        let topic = properties
            .get("KAFKA_TOPIC")
            .cloned()
            .ok_or_else(|| "Missing required property \"KAFKA_TOPIC\"".to_string())?;

        return Ok(Statement::Create {
            kind: SourceKind::parse(&captures[1]),
            name: captures[2].to_uppercase(),
            topic,
            value_format: properties
                .get("VALUE_FORMAT")
                .map(|f| f.to_uppercase())
                .unwrap_or_else(|| "JSON".to_string()),
        });
    }

    if let Some(captures) = DROP.captures(text) {
        return Ok(Statement::Drop {
            kind: SourceKind::parse(&captures[1]),
            name: captures[3].to_uppercase(),
            if_exists: captures.get(2).is_some(),
        });
    }

    Err(format!("line 1:1: mismatched input '{}'", first_word(text)))
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or(text)
}
