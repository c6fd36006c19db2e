//! SQL statements issued against the server and tenant databases
//!
//! Every function takes any sea-orm connection so the statements can be
//! checked against `MockDatabase` without a running server.

use sea_orm::sea_query::{Alias, ColumnDef, Expr, Table};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema, Statement};

use super::entities::{TenantMarkerActiveModel, TenantMarkerModel, TenantMarkers};

/// Quote a MySQL identifier with backticks
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

async fn execute_raw<C: ConnectionTrait>(conn: &C, sql: String) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    conn.execute(Statement::from_string(backend, sql)).await?;
    Ok(())
}

/// List every database visible on the server
pub async fn list_databases<C: ConnectionTrait>(conn: &C) -> Result<Vec<String>, DbErr> {
    let backend = conn.get_database_backend();
    let rows = conn
        .query_all(Statement::from_string(backend, "SHOW DATABASES".to_owned()))
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String>("", "Database"))
        .collect()
}

pub async fn create_database<C: ConnectionTrait>(conn: &C, name: &str) -> Result<(), DbErr> {
    execute_raw(
        conn,
        format!(
            "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            quote_ident(name)
        ),
    )
    .await
}

pub async fn drop_database<C: ConnectionTrait>(conn: &C, name: &str) -> Result<(), DbErr> {
    execute_raw(conn, format!("DROP DATABASE {}", quote_ident(name))).await
}

/// List tables of the database the connection points at
pub async fn list_tables<C: ConnectionTrait>(conn: &C) -> Result<Vec<String>, DbErr> {
    let backend = conn.get_database_backend();
    let rows = conn
        .query_all(Statement::from_string(
            backend,
            "SELECT TABLE_NAME AS name FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() ORDER BY TABLE_NAME"
                .to_owned(),
        ))
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String>("", "name"))
        .collect()
}

pub async fn drop_table<C: ConnectionTrait>(conn: &C, name: &str) -> Result<(), DbErr> {
    execute_raw(conn, format!("DROP TABLE {}", quote_ident(name))).await
}

/// Create a schemaless document table (`id`, JSON `data`, timestamps)
pub async fn create_document_table<C: ConnectionTrait>(conn: &C, name: &str) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let stmt = Table::create()
        .table(Alias::new(name))
        .if_not_exists()
        .col(
            ColumnDef::new(Alias::new("id"))
                .char_len(36)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(Alias::new("data")).json().not_null())
        .col(
            ColumnDef::new(Alias::new("created_at"))
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Alias::new("updated_at"))
                .timestamp()
                .not_null()
                .default(Expr::current_timestamp())
                .extra("ON UPDATE CURRENT_TIMESTAMP".to_string()),
        )
        .to_owned();

    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// Create the marker table from its entity definition if it is missing
pub async fn ensure_marker_table<C: ConnectionTrait>(conn: &C) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(TenantMarkers);
    stmt.if_not_exists();

    conn.execute(backend.build(&stmt)).await?;
    Ok(())
}

pub async fn read_marker<C: ConnectionTrait>(conn: &C) -> Result<Option<TenantMarkerModel>, DbErr> {
    TenantMarkers::find().one(conn).await
}

pub async fn write_marker<C: ConnectionTrait>(
    conn: &C,
    marker: &TenantMarkerModel,
) -> Result<(), DbErr> {
    let active: TenantMarkerActiveModel = marker.clone().into();
    TenantMarkers::insert(active)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}
