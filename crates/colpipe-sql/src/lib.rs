//! Raw, hand-written SQL queries against the control-plane's Postgres
//! schema. Nothing in here knows about state machines or propagation --
//! it's a thin typed layer over `sqlx::query!`/`query_as!`, mirroring
//! the split between domain logic and persistence used throughout the
//! rest of the workspace.

pub mod blobs;
pub mod catalogs;
pub mod collections;
pub mod engines;
pub mod runners;
pub mod selections;
mod text_json;

pub use text_json::TextJson as Json;

/// Embeds and applies the crate's migrations. Intended to be called once
/// at process startup, before any other query in this crate is issued.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
