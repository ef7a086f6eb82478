//! SQL execution backends

use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use taskline_core::domain::catalog::{DbInstance, DbType};

use super::ControllerError;

#[async_trait]
pub trait SqlSession: Send {
    /// Executes one statement, returning the rows it affected
    async fn execute(&mut self, statement: &str) -> Result<u64, String>;
}

#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn connect(&self, instance: &DbInstance) -> Result<Box<dyn SqlSession>, ControllerError>;
}

/// Connects to MySQL and MariaDB instances
#[derive(Debug, Clone, Default)]
pub struct MySqlConnector;

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn execute(&mut self, statement: &str) -> Result<u64, String> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(statement))
            .await
            .map(|result| result.rows_affected())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl SqlConnector for MySqlConnector {
    async fn connect(&self, instance: &DbInstance) -> Result<Box<dyn SqlSession>, ControllerError> {
        if !matches!(instance.db_type, DbType::Mysql | DbType::Mariadb) {
            return Err(ControllerError::InvalidDbType);
        }
        let options = MySqlConnectOptions::new()
            .host(&instance.host)
            .port(instance.port)
            .username(&instance.username)
            .password(&instance.password);
        let conn = options
            .connect()
            .await
            .map_err(|e| ControllerError::Connect(e.to_string()))?;
        Ok(Box::new(MySqlSession { conn }))
    }
}

/// Splits a script after every `;`, keeping the separator and dropping
/// pieces that are only whitespace
pub fn split_statements(sql: &str) -> Vec<String> {
    sql.split_inclusive(';')
        .map(str::trim)
        .filter(|piece| !piece.is_empty() && *piece != ";")
        .map(str::to_string)
        .collect()
}
