use colpipe_models::{EntityState, Id};

use crate::Json;

#[derive(Debug)]
pub struct Row {
    pub id: Id,
    pub collection_id: Id,
    pub catalog_id_at_creation: Id,
    pub json_input: serde_json::Value,
    pub json_output: serde_json::Value,
    pub requesting_user: String,
    pub workdir_archive_blob_id: Option<Id>,
    pub state: EntityState,
    pub error_string: String,
}

pub struct NewSelection<'a> {
    pub collection_id: Id,
    pub catalog_id_at_creation: Id,
    pub json_input: &'a serde_json::Value,
    pub json_output: &'a serde_json::Value,
    pub requesting_user: &'a str,
}

pub async fn insert(new: NewSelection<'_>, pool: &sqlx::PgPool) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"
        insert into col_selections (
            collection_id, catalog_id_at_creation, json_input, json_output, requesting_user
        ) values ($1, $2, $3, $4, $5)
        returning id as "id: Id"
        "#,
        new.collection_id as Id,
        new.catalog_id_at_creation as Id,
        Json(new.json_input) as Json<&serde_json::Value>,
        Json(new.json_output) as Json<&serde_json::Value>,
        new.requesting_user,
    )
    .fetch_one(pool)
    .await?;

    Ok(rec.id)
}

/// Same as [`insert`], but runs against an open transaction so the
/// caller can combine it with the `NotEditable` gate's row lock in a
/// single atomic unit (see `collection::append_and_run_selection`).
pub async fn insert_tx(
    new: NewSelection<'_>,
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"
        insert into col_selections (
            collection_id, catalog_id_at_creation, json_input, json_output, requesting_user
        ) values ($1, $2, $3, $4, $5)
        returning id as "id: Id"
        "#,
        new.collection_id as Id,
        new.catalog_id_at_creation as Id,
        Json(new.json_input) as Json<&serde_json::Value>,
        Json(new.json_output) as Json<&serde_json::Value>,
        new.requesting_user,
    )
    .fetch_one(&mut *txn)
    .await?;

    Ok(rec.id)
}

pub async fn fetch(id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            collection_id as "collection_id: Id",
            catalog_id_at_creation as "catalog_id_at_creation: Id",
            json_input as "json_input: serde_json::Value",
            json_output as "json_output: serde_json::Value",
            requesting_user,
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from col_selections
        where id = $1
        "#,
        id as Id,
    )
    .fetch_one(pool)
    .await
}

/// The most recently appended Selection for a Collection -- index
/// `selections[last]` in the domain model.
pub async fn fetch_latest(collection_id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            collection_id as "collection_id: Id",
            catalog_id_at_creation as "catalog_id_at_creation: Id",
            json_input as "json_input: serde_json::Value",
            json_output as "json_output: serde_json::Value",
            requesting_user,
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from col_selections
        where collection_id = $1
        order by created_at desc
        limit 1
        "#,
        collection_id as Id,
    )
    .fetch_one(pool)
    .await
}

/// Same as [`fetch_latest`], but runs against an open transaction --
/// used by the `NotEditable`/`InputMismatch` gate so the read is part
/// of the same atomic unit as the row lock and the append.
pub async fn fetch_latest_tx(
    collection_id: Id,
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            collection_id as "collection_id: Id",
            catalog_id_at_creation as "catalog_id_at_creation: Id",
            json_input as "json_input: serde_json::Value",
            json_output as "json_output: serde_json::Value",
            requesting_user,
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from col_selections
        where collection_id = $1
        order by created_at desc
        limit 1
        "#,
        collection_id as Id,
    )
    .fetch_one(&mut *txn)
    .await
}

/// Every Selection currently in `Running`, used at process startup to
/// find runs a crashed host left stranded (see crash recovery).
pub async fn fetch_all_running(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            collection_id as "collection_id: Id",
            catalog_id_at_creation as "catalog_id_at_creation: Id",
            json_input as "json_input: serde_json::Value",
            json_output as "json_output: serde_json::Value",
            requesting_user,
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from col_selections
        where state = 'Running'
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn update_state(
    id: Id,
    state: EntityState,
    error_string: &str,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update col_selections set
            state = $2,
            error_string = $3,
            updated_at = now()
        where id = $1
        returning 1 as "must_exist"
        "#,
        id as Id,
        state as EntityState,
        error_string,
    )
    .fetch_one(pool)
    .await?;

    Ok(())
}

/// Same as [`update_state`], but runs against an open transaction -- used
/// alongside `collections::update_state_tx` to mark the freshly appended
/// Selection `Running` before the append transaction commits.
pub async fn update_state_tx(
    id: Id,
    state: EntityState,
    error_string: &str,
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update col_selections set
            state = $2,
            error_string = $3,
            updated_at = now()
        where id = $1
        returning 1 as "must_exist"
        "#,
        id as Id,
        state as EntityState,
        error_string,
    )
    .fetch_one(&mut *txn)
    .await?;

    Ok(())
}

/// Overwrites `json_output` with the content of `CollectionEditFiles/
/// JsonOutput.json` after the Runner's pipeline terminates. Called
/// unconditionally after a run finishes, whether it succeeded or an
/// engine failed partway through.
pub async fn update_json_output(
    id: Id,
    json_output: &serde_json::Value,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update col_selections set json_output = $2
        where id = $1
        returning 1 as "must_exist"
        "#,
        id as Id,
        Json(json_output) as Json<&serde_json::Value>,
    )
    .fetch_one(pool)
    .await?;

    Ok(())
}

/// Copies the Runner's final workdir archive onto its Selection row, so
/// that overview and replay queries don't need to join through the
/// runner to find it.
pub async fn set_workdir_archive_ref(
    id: Id,
    workdir_archive_blob_id: Id,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update col_selections set workdir_archive_blob_id = $2
        where id = $1
        returning 1 as "must_exist"
        "#,
        id as Id,
        workdir_archive_blob_id as Id,
    )
    .fetch_one(pool)
    .await?;

    Ok(())
}
