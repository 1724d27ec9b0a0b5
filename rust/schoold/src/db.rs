use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(collection, id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workspace_settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn doc_get(conn: &Connection, collection: &str, id: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ? AND id = ?",
            (collection, id),
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

/// Replaces the whole document, creating it when missing.
pub fn doc_set(conn: &Connection, collection: &str, id: &str, data: &Value) -> anyhow::Result<()> {
    if !data.is_object() {
        anyhow::bail!("document {}/{} must be a JSON object", collection, id);
    }
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO documents(collection, id, data, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(collection, id) DO UPDATE SET
           data = excluded.data,
           updated_at = excluded.updated_at",
        (collection, id, serde_json::to_string(data)?, &now, &now),
    )?;
    Ok(())
}

/// Shallow merge of top-level fields; creates the document when missing.
pub fn doc_merge(
    conn: &Connection,
    collection: &str,
    id: &str,
    patch: &Map<String, Value>,
) -> anyhow::Result<Value> {
    let mut current = doc_get(conn, collection, id)?.unwrap_or_else(|| Value::Object(Map::new()));
    let Some(obj) = current.as_object_mut() else {
        anyhow::bail!("stored document {}/{} is not an object", collection, id);
    };
    for (k, v) in patch {
        obj.insert(k.clone(), v.clone());
    }
    doc_set(conn, collection, id, &current)?;
    Ok(current)
}

/// Like `doc_merge` but refuses to create a document. Returns `None` when missing.
pub fn doc_update(
    conn: &Connection,
    collection: &str,
    id: &str,
    patch: &Map<String, Value>,
) -> anyhow::Result<Option<Value>> {
    if doc_get(conn, collection, id)?.is_none() {
        return Ok(None);
    }
    doc_merge(conn, collection, id, patch).map(Some)
}

pub fn doc_delete(conn: &Connection, collection: &str, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute(
        "DELETE FROM documents WHERE collection = ? AND id = ?",
        (collection, id),
    )?;
    Ok(n > 0)
}

pub fn doc_add(conn: &Connection, collection: &str, data: &Value) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    doc_set(conn, collection, &id, data)?;
    Ok(id)
}

/// Documents of `collection` whose top-level fields equal every filter value.
pub fn doc_query(
    conn: &Connection,
    collection: &str,
    filters: &[(&str, Value)],
) -> anyhow::Result<Vec<(String, Value)>> {
    let mut stmt =
        conn.prepare("SELECT id, data FROM documents WHERE collection = ? ORDER BY id")?;
    let rows = stmt
        .query_map([collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for (id, raw) in rows {
        let data: Value = serde_json::from_str(&raw)?;
        let matches = filters
            .iter()
            .all(|(field, expected)| data.get(*field) == Some(expected));
        if matches {
            out.push((id, data));
        }
    }
    Ok(out)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM workspace_settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO workspace_settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
