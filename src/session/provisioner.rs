//! # Database Provisioning
//!
//! Ephemeral databases are created, seeded and dropped through a
//! [`Provisioner`]; sessions to them are opened through a [`Connector`].

use std::path::Path;

use futures_util::future::BoxFuture;
use tokio::process::Command;
use tokio_postgres::error::SqlState;

use super::backend::Session;
use super::errors::{SessionError, SessionResult};
use super::postgres::PgSession;
use crate::observability::Logger;
use crate::pgtext::{is_plain_identifier, quote_ident};

/// Physical database lifecycle
pub trait Provisioner: Send + Sync {
    /// Create an empty database. Succeeds if it already exists.
    fn create<'a>(&'a self, name: &'a str) -> BoxFuture<'a, SessionResult<()>>;

    /// Drop a database, terminating its connections. Missing is not an error.
    fn drop_database<'a>(&'a self, name: &'a str) -> BoxFuture<'a, SessionResult<()>>;

    /// Seed a database from a SQL dump
    fn load<'a>(&'a self, name: &'a str, dump: &'a Path) -> BoxFuture<'a, SessionResult<()>>;
}

/// Opens sessions to a named database
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, database: &'a str) -> BoxFuture<'a, SessionResult<Box<dyn Session>>>;
}

fn check_name(name: &str) -> SessionResult<()> {
    if is_plain_identifier(name) {
        Ok(())
    } else {
        Err(SessionError::InvalidIdentifier(name.to_string()))
    }
}

/// Substitute `{db}` in a connection URL template
pub fn database_url(template: &str, database: &str) -> String {
    template.replace("{db}", database)
}

/// Provisioning through an administrative connection and `psql`
#[derive(Debug, Clone)]
pub struct PgProvisioner {
    admin_url: String,
    url_template: String,
}

impl PgProvisioner {
    /// `admin_url` points at a maintenance database (usually `postgres`);
    /// `url_template` is used by `psql` when loading dumps
    pub fn new(admin_url: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            admin_url: admin_url.into(),
            url_template: url_template.into(),
        }
    }

    async fn admin(&self, sql: &str) -> SessionResult<()> {
        let (client, connection) = tokio_postgres::connect(&self.admin_url, tokio_postgres::NoTls)
            .await
            .map_err(|e| SessionError::Provisioning(e.to_string()))?;
        let driver = tokio::spawn(connection);
        Logger::trace("SQL_STATEMENT", &[("sql", sql)]);
        let result = client.batch_execute(sql).await;
        drop(client);
        let _ = driver.await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::DUPLICATE_DATABASE) => Ok(()),
            Err(e) => Err(SessionError::Provisioning(
                e.as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string()),
            )),
        }
    }
}

impl Provisioner for PgProvisioner {
    fn create<'a>(&'a self, name: &'a str) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            check_name(name)?;
            self.admin(&format!("CREATE DATABASE {}", quote_ident(name)))
                .await
        })
    }

    fn drop_database<'a>(&'a self, name: &'a str) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            check_name(name)?;
            self.admin(&format!(
                "DROP DATABASE IF EXISTS {} WITH (FORCE)",
                quote_ident(name)
            ))
            .await
        })
    }

    fn load<'a>(&'a self, name: &'a str, dump: &'a Path) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            check_name(name)?;
            let output = Command::new("psql")
                .arg("--quiet")
                .arg("--set")
                .arg("ON_ERROR_STOP=1")
                .arg("--dbname")
                .arg(database_url(&self.url_template, name))
                .arg("--file")
                .arg(dump)
                .output()
                .await
                .map_err(|e| SessionError::Provisioning(format!("cannot run psql: {}", e)))?;
            if output.status.success() {
                Ok(())
            } else {
                Err(SessionError::Provisioning(format!(
                    "psql exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        })
    }
}

/// Opens [`PgSession`]s from a URL template containing `{db}`
#[derive(Debug, Clone)]
pub struct PgConnector {
    url_template: String,
}

impl PgConnector {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }
}

impl Connector for PgConnector {
    fn connect<'a>(&'a self, database: &'a str) -> BoxFuture<'a, SessionResult<Box<dyn Session>>> {
        Box::pin(async move {
            let session = PgSession::connect(&database_url(&self.url_template, database)).await?;
            Ok(Box::new(session) as Box<dyn Session>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url() {
        assert_eq!(
            database_url("postgres://u@localhost/{db}", "statbench_1"),
            "postgres://u@localhost/statbench_1"
        );
    }

    #[tokio::test]
    async fn test_names_are_validated_before_connecting() {
        let provisioner = PgProvisioner::new("postgres://nowhere/postgres", "postgres://nowhere/{db}");
        assert!(matches!(
            provisioner.create("x; DROP DATABASE y").await,
            Err(SessionError::InvalidIdentifier(_))
        ));
    }
}
