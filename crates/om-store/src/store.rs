use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use om_types::{Admin, ApiKey, AppError, AppResult, TransportType, UpstreamServerConfig};

fn db_err(e: rusqlite::Error) -> AppError {
    AppError::Store(e.to_string())
}

fn transport_type_to_str(t: TransportType) -> &'static str {
    match t {
        TransportType::Sse => "sse",
        TransportType::Stdio => "stdio",
        TransportType::Http => "http",
    }
}

fn transport_type_from_str(s: &str) -> TransportType {
    match s {
        "stdio" => TransportType::Stdio,
        "http" => TransportType::Http,
        // Unknown values fall back to SSE, matching how legacy rows
        // were interpreted before the column was constrained.
        _ => TransportType::Sse,
    }
}

fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

/// Database handle shared across the server.
///
/// rusqlite connections are not `Sync`, so the single connection sits
/// behind a `Mutex`; every operation is a short synchronous
/// transaction and no lock is held across I/O outside SQLite itself.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> AppResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> AppResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS upstream_servers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                transport_type TEXT NOT NULL DEFAULT 'sse',
                url TEXT NOT NULL DEFAULT '',
                auth_token TEXT NOT NULL DEFAULT '',
                command TEXT NOT NULL DEFAULT '',
                args TEXT NOT NULL DEFAULT '',
                env TEXT NOT NULL DEFAULT '',
                tool_config TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_upstream_servers_name
             ON upstream_servers(name) WHERE deleted_at IS NULL",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                allowed_servers TEXT NOT NULL DEFAULT '',
                allowed_tools TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_api_keys_key
             ON api_keys(key) WHERE deleted_at IS NULL",
            [],
        )
        .map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS admins (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;

        Ok(())
    }

    // ===== Upstream servers =====

    fn server_from_row(row: &Row<'_>) -> rusqlite::Result<UpstreamServerConfig> {
        Ok(UpstreamServerConfig {
            id: row.get(0)?,
            name: row.get(1)?,
            transport_type: transport_type_from_str(&row.get::<_, String>(2)?),
            url: row.get(3)?,
            auth_token: row.get(4)?,
            command: row.get(5)?,
            args: row.get(6)?,
            env: row.get(7)?,
            tool_config: row.get(8)?,
            enabled: row.get::<_, i64>(9)? != 0,
            created_at: ts_to_datetime(row.get(10)?),
            updated_at: ts_to_datetime(row.get(11)?),
        })
    }

    const SERVER_COLUMNS: &'static str = "id, name, transport_type, url, auth_token, command, \
                                          args, env, tool_config, enabled, created_at, updated_at";

    /// Enabled, non-deleted upstream servers, as loaded on reload.
    pub fn list_enabled_servers(&self) -> AppResult<Vec<UpstreamServerConfig>> {
        self.query_servers("WHERE deleted_at IS NULL AND enabled = 1")
    }

    /// All non-deleted upstream servers (admin listing).
    pub fn list_servers(&self) -> AppResult<Vec<UpstreamServerConfig>> {
        self.query_servers("WHERE deleted_at IS NULL")
    }

    fn query_servers(&self, filter: &str) -> AppResult<Vec<UpstreamServerConfig>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM upstream_servers {} ORDER BY id",
            Self::SERVER_COLUMNS,
            filter
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([], Self::server_from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn get_server(&self, id: i64) -> AppResult<Option<UpstreamServerConfig>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM upstream_servers WHERE id = ?1 AND deleted_at IS NULL",
            Self::SERVER_COLUMNS
        );
        conn.query_row(&sql, params![id], Self::server_from_row)
            .optional()
            .map_err(db_err)
    }

    /// Insert a new upstream server.
    ///
    /// A live row with the same name is rejected; a soft-deleted row
    /// with the same name is hard-deleted first so the name can be
    /// reused.
    pub fn create_server(&self, cfg: &UpstreamServerConfig) -> AppResult<UpstreamServerConfig> {
        let conn = self.conn.lock();

        let existing: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT id, deleted_at FROM upstream_servers WHERE name = ?1",
                params![cfg.name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;

        if let Some((old_id, deleted_at)) = existing {
            if deleted_at.is_some() {
                conn.execute(
                    "DELETE FROM upstream_servers WHERE id = ?1",
                    params![old_id],
                )
                .map_err(db_err)?;
            } else {
                return Err(AppError::Config("Server name already exists".to_string()));
            }
        }

        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO upstream_servers
             (name, transport_type, url, auth_token, command, args, env, tool_config,
              enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                cfg.name,
                transport_type_to_str(cfg.transport_type),
                cfg.url,
                cfg.auth_token,
                cfg.command,
                cfg.args,
                cfg.env,
                cfg.tool_config,
                cfg.enabled as i64,
                now,
            ],
        )
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        let mut created = cfg.clone();
        created.id = id;
        created.created_at = ts_to_datetime(now);
        created.updated_at = ts_to_datetime(now);
        Ok(created)
    }

    pub fn update_server(&self, id: i64, cfg: &UpstreamServerConfig) -> AppResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().timestamp();
        let changed = conn
            .execute(
                "UPDATE upstream_servers
                 SET name = ?1, transport_type = ?2, url = ?3, auth_token = ?4, command = ?5,
                     args = ?6, env = ?7, tool_config = ?8, enabled = ?9, updated_at = ?10
                 WHERE id = ?11 AND deleted_at IS NULL",
                params![
                    cfg.name,
                    transport_type_to_str(cfg.transport_type),
                    cfg.url,
                    cfg.auth_token,
                    cfg.command,
                    cfg.args,
                    cfg.env,
                    cfg.tool_config,
                    cfg.enabled as i64,
                    now,
                    id,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AppError::Store(format!("server {} not found", id)));
        }
        Ok(())
    }

    pub fn delete_server(&self, id: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE upstream_servers SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![Utc::now().timestamp(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ===== API keys =====

    fn key_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
        Ok(ApiKey {
            id: row.get(0)?,
            key: row.get(1)?,
            description: row.get(2)?,
            allowed_servers: row.get(3)?,
            allowed_tools: row.get(4)?,
            created_at: ts_to_datetime(row.get(5)?),
            updated_at: ts_to_datetime(row.get(6)?),
        })
    }

    const KEY_COLUMNS: &'static str =
        "id, key, description, allowed_servers, allowed_tools, created_at, updated_at";

    /// Exact bearer lookup used by the SSE endpoint.
    pub fn find_api_key(&self, key: &str) -> AppResult<Option<ApiKey>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM api_keys WHERE key = ?1 AND deleted_at IS NULL",
            Self::KEY_COLUMNS
        );
        conn.query_row(&sql, params![key], Self::key_from_row)
            .optional()
            .map_err(db_err)
    }

    pub fn list_keys(&self) -> AppResult<Vec<ApiKey>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM api_keys WHERE deleted_at IS NULL ORDER BY id",
            Self::KEY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map([], Self::key_from_row)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn create_key(&self, key: &ApiKey) -> AppResult<ApiKey> {
        let conn = self.conn.lock();
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO api_keys (key, description, allowed_servers, allowed_tools,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                key.key,
                key.description,
                key.allowed_servers,
                key.allowed_tools,
                now,
            ],
        )
        .map_err(db_err)?;

        let mut created = key.clone();
        created.id = conn.last_insert_rowid();
        created.created_at = ts_to_datetime(now);
        created.updated_at = ts_to_datetime(now);
        Ok(created)
    }

    /// Partial update: only description and the permission columns.
    pub fn update_key(
        &self,
        id: i64,
        description: &str,
        allowed_servers: &str,
        allowed_tools: &str,
    ) -> AppResult<ApiKey> {
        {
            let conn = self.conn.lock();
            let changed = conn
                .execute(
                    "UPDATE api_keys
                     SET description = ?1, allowed_servers = ?2, allowed_tools = ?3, updated_at = ?4
                     WHERE id = ?5 AND deleted_at IS NULL",
                    params![
                        description,
                        allowed_servers,
                        allowed_tools,
                        Utc::now().timestamp(),
                        id
                    ],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(AppError::Store(format!("api key {} not found", id)));
            }
        }
        self.get_key(id)?
            .ok_or_else(|| AppError::Store(format!("api key {} not found", id)))
    }

    pub fn get_key(&self, id: i64) -> AppResult<Option<ApiKey>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM api_keys WHERE id = ?1 AND deleted_at IS NULL",
            Self::KEY_COLUMNS
        );
        conn.query_row(&sql, params![id], Self::key_from_row)
            .optional()
            .map_err(db_err)
    }

    pub fn delete_key(&self, id: i64) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE api_keys SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![Utc::now().timestamp(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ===== Admins =====

    pub fn count_admins(&self) -> AppResult<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))
            .map_err(db_err)
    }

    pub fn find_admin(&self, username: &str) -> AppResult<Option<Admin>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, username, password, created_at FROM admins WHERE username = ?1",
            params![username],
            |row| {
                Ok(Admin {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    password: row.get(2)?,
                    created_at: ts_to_datetime(row.get(3)?),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    pub fn create_admin(&self, username: &str, password_hash: &str) -> AppResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO admins (username, password, created_at) VALUES (?1, ?2, ?3)",
            params![username, password_hash, Utc::now().timestamp()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn update_admin_password(&self, username: &str, password_hash: &str) -> AppResult<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE admins SET password = ?1 WHERE username = ?2",
                params![password_hash, username],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(AppError::Store(format!("admin {} not found", username)));
        }
        Ok(())
    }
}
