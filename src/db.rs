//! SQLite connection pool with WAL mode and the `sqlite-vec` extension.
//!
//! `sqlite-vec` ships as a statically-linked `vec0` module rather than a
//! loadable `.so`, so it is wired in via `sqlite3_auto_extension` (registered
//! process-wide, once, before any connection opens) instead of sqlx's
//! path-based `SqliteConnectOptions::extension`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Once;

static REGISTER_VEC_EXTENSION: Once = Once::new();

fn register_vec_extension() {
    REGISTER_VEC_EXTENSION.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute::<
            unsafe extern "C" fn(
                *mut libsqlite3_sys::sqlite3,
                *mut *mut std::os::raw::c_char,
                *const libsqlite3_sys::sqlite3_api_routines,
            ) -> std::os::raw::c_int,
            unsafe extern "C" fn(),
        >(sqlite_vec::sqlite3_vec_init)));
    });
}

/// Open (creating if absent) the database at `path`, with WAL journaling and
/// the `sqlite-vec` extension available to every connection in the pool so
/// `vec0` virtual tables can be created and queried.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    register_vec_extension();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
