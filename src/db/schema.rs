use crate::config::AdminSeed;
use rusqlite::{params, Connection};
use tokio_postgres::Client;
use tracing::info;

/// Columns whose values are rendered as ISO-8601 text.
pub const TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at"];

/// Columns holding an opaque JSON document.
pub const JSON_COLUMNS: &[&str] = &["data"];

const SQLITE_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS clients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        nome TEXT NOT NULL,
        cpf_cnpj TEXT UNIQUE NOT NULL,
        data TEXT NOT NULL DEFAULT '{}',
        created_by INTEGER,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        nome TEXT NOT NULL,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
"#;

const POSTGRES_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS clients (
        id SERIAL PRIMARY KEY,
        nome TEXT NOT NULL,
        cpf_cnpj TEXT UNIQUE NOT NULL,
        data JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_by INTEGER,
        created_at TIMESTAMPTZ DEFAULT now(),
        updated_at TIMESTAMPTZ DEFAULT now()
    );
    ALTER TABLE clients ADD COLUMN IF NOT EXISTS created_by INTEGER;
    CREATE TABLE IF NOT EXISTS users (
        id SERIAL PRIMARY KEY,
        nome TEXT NOT NULL,
        username TEXT UNIQUE NOT NULL,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        created_at TIMESTAMPTZ DEFAULT now(),
        updated_at TIMESTAMPTZ DEFAULT now()
    );
"#;

/// Columns added after the first release; older files may lack them.
const SQLITE_LATE_COLUMNS: &[(&str, &str, &str)] = &[("clients", "created_by", "INTEGER")];

/// Create tables, add late columns and seed the admin account on a SQLite file.
///
/// The admin row is only inserted while `users` is empty, so reopening the
/// same file never seeds twice.
pub fn bootstrap_sqlite(conn: &Connection, admin: &AdminSeed) -> rusqlite::Result<()> {
    conn.execute_batch(SQLITE_DDL)?;

    for (table, column, decl) in SQLITE_LATE_COLUMNS {
        if !sqlite_has_column(conn, table, column)? {
            info!(table, column, "adding missing column to sqlite table");
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                table, column, decl
            ))?;
        }
    }

    let seeded = conn.execute(
        "INSERT INTO users (nome, username, password_hash, role)
         SELECT ?1, ?2, ?3, 'admin'
         WHERE NOT EXISTS (SELECT 1 FROM users)",
        params![admin.nome, admin.username, admin.password_hash],
    )?;
    if seeded > 0 {
        info!(username = %admin.username, "seeded admin account in sqlite");
    }

    Ok(())
}

fn sqlite_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Idempotently create tables and make sure an admin account exists on PostgreSQL.
pub async fn bootstrap_postgres(client: &Client, admin: &AdminSeed) -> Result<(), tokio_postgres::Error> {
    client.batch_execute(POSTGRES_DDL).await?;

    let seeded = client
        .execute(
            r#"
            INSERT INTO users (nome, username, password_hash, role)
            SELECT $1::text, $2::text, $3::text, 'admin'
            WHERE NOT EXISTS (SELECT 1 FROM users WHERE role = 'admin')
            ON CONFLICT (username) DO NOTHING
            "#,
            &[&admin.nome, &admin.username, &admin.password_hash],
        )
        .await?;
    if seeded > 0 {
        info!(username = %admin.username, "seeded admin account in postgres");
    }

    Ok(())
}
