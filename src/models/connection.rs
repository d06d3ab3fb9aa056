//! Connection-related data models.
//!
//! This module defines the typed connection inputs handed to the managers.
//! Secrets are wrapped in [`SecretString`] so they never show up in `Debug`
//! output or logs.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Supported relational database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Pool and connection inputs for a relational store.
#[derive(Debug)]
pub struct DatabaseSettings {
    /// Contains sensitive data - never log
    pub uri: SecretString,
    /// Connections kept open in the pool
    pub pool_size: u32,
    /// Extra connections allowed when the pool is exhausted
    pub max_overflow: u32,
    /// Ping connections before handing them out
    pub pre_ping: bool,
    /// Log every executed statement
    pub echo: bool,
    /// Tag attached to physical connections (PostgreSQL `application_name`)
    pub application_name: String,
    /// Search path applied on connect (PostgreSQL only)
    pub schema: Option<String>,
}

impl DatabaseSettings {
    /// Settings with the project defaults for the given URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: SecretString::from(uri.into()),
            pool_size: 1,
            max_overflow: 2,
            pre_ping: true,
            echo: false,
            application_name: env!("CARGO_PKG_NAME").to_string(),
            schema: None,
        }
    }

    pub fn with_pool(mut self, pool_size: u32, max_overflow: u32) -> Self {
        self.pool_size = pool_size;
        self.max_overflow = max_overflow;
        self
    }

    pub fn with_application_name(mut self, application_name: impl Into<String>) -> Self {
        self.application_name = application_name.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Detected database type of the URI.
    pub fn db_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_connection_string(self.uri.expose_secret())
    }
}

/// Connection inputs for the key/value cache store.
#[derive(Debug)]
pub struct CacheSettings {
    pub host: SecretString,
    pub port: SecretString,
    pub password: SecretString,
    /// Normalize UTF-8 bulk replies to strings before decoding
    pub decode_responses: bool,
}

impl CacheSettings {
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: SecretString::from(host.into()),
            port: SecretString::from(port.into()),
            password: SecretString::from(password.into()),
            decode_responses: true,
        }
    }

    pub fn with_decode_responses(mut self, decode_responses: bool) -> Self {
        self.decode_responses = decode_responses;
        self
    }
}
