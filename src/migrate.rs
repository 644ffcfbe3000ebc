//! Schema creation and forward migration (§3.1).

use anyhow::Result;
use sqlx::SqlitePool;

/// Create every table, partial unique index, and FTS trigger if absent.
/// Idempotent: safe to call on every `open`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            root_path TEXT NOT NULL,
            glob_pattern TEXT NOT NULL,
            context TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(root_path, glob_pattern)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id INTEGER NOT NULL REFERENCES collections(id),
            filepath TEXT NOT NULL,
            display_path TEXT,
            title TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // D1: at most one active document per filepath across all collections.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS documents_active_filepath
        ON documents(filepath) WHERE active
        "#,
    )
    .execute(pool)
    .await?;

    // D2: each active document's display_path is globally unique.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS documents_active_display_path
        ON documents(display_path) WHERE active AND display_path IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS documents_content_hash ON documents(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS documents_collection ON documents(collection_id)")
        .execute(pool)
        .await?;

    create_fts_shadow(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_vectors (
            content_hash TEXT NOT NULL,
            seq INTEGER NOT NULL,
            pos INTEGER NOT NULL,
            model TEXT NOT NULL,
            embedded_at TEXT NOT NULL,
            vector BLOB NOT NULL,
            PRIMARY KEY(content_hash, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS path_contexts (
            path_prefix TEXT PRIMARY KEY,
            context TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rerank_cache (
            cache_key TEXT PRIMARY KEY,
            result_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL,
            command TEXT NOT NULL,
            query TEXT NOT NULL,
            result_count INTEGER NOT NULL,
            index_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// `documents_fts` plus the triggers that keep it synchronised with active
/// `documents` rows, inside the same transaction as any write (§3.1).
async fn create_fts_shadow(pool: &SqlitePool) -> Result<()> {
    let exists: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='documents_fts'")
            .fetch_optional(pool)
            .await?;
    if exists.is_some() {
        return Ok(());
    }

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE documents_fts USING fts5(
            title, body, content='documents', content_rowid='id'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER documents_fts_ai AFTER INSERT ON documents BEGIN
            INSERT INTO documents_fts(rowid, title, body)
            SELECT new.id, new.title, new.body WHERE new.active;
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER documents_fts_ad AFTER DELETE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, body)
            VALUES ('delete', old.id, old.title, old.body);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER documents_fts_au AFTER UPDATE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, title, body)
            VALUES ('delete', old.id, old.title, old.body);
            INSERT INTO documents_fts(rowid, title, body)
            SELECT new.id, new.title, new.body WHERE new.active;
        END
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create (or, on dimension mismatch, drop and recreate) the `vec0` ANN
/// index table (V3). `dimension` is the embedding model's output width.
pub async fn ensure_vector_index(pool: &SqlitePool, dimension: usize) -> Result<()> {
    let current_dim: Option<(i64,)> = sqlx::query_as(
        "SELECT CAST(substr(sql, instr(sql, 'float[') + 6, instr(sql, ']') - instr(sql, 'float[') - 6) AS INTEGER) \
         FROM sqlite_master WHERE type='table' AND name='vec_index'",
    )
    .fetch_optional(pool)
    .await
    .unwrap_or(None);

    if let Some((dim,)) = current_dim {
        if dim == dimension as i64 {
            return Ok(());
        }
        sqlx::query("DROP TABLE vec_index").execute(pool).await?;
    }

    sqlx::query(&format!(
        "CREATE VIRTUAL TABLE vec_index USING vec0(content_hash TEXT, seq INTEGER, embedding float[{}] distance_metric=cosine)",
        dimension
    ))
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        std::mem::forget(dir);
        crate::db::connect(&path).await.unwrap()
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn fts_trigger_mirrors_active_documents() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO collections (root_path, glob_pattern, created_at) VALUES ('/r', '**/*.md', datetime('now'))",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO documents (collection_id, filepath, display_path, title, content_hash, body, created_at, modified_at, active) \
             VALUES (1, '/r/a.md', 'a.md', 'A', 'h1', 'hello world', datetime('now'), datetime('now'), 1)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM documents_fts WHERE documents_fts MATCH 'hello'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);
    }

    #[tokio::test]
    async fn ensure_vector_index_rebuilds_on_dimension_change() {
        let pool = test_pool().await;
        ensure_vector_index(&pool, 384).await.unwrap();
        ensure_vector_index(&pool, 384).await.unwrap();
        ensure_vector_index(&pool, 768).await.unwrap();

        let row: (String,) = sqlx::query_as("SELECT sql FROM sqlite_master WHERE name='vec_index'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(row.0.contains("float[768]"));
    }
}
