use colpipe_models::{EntityState, Id};

#[derive(Debug)]
pub struct Row {
    pub id: Id,
    pub col_selection_id: Id,
    pub workdir_archive_blob_id: Option<Id>,
    pub state: EntityState,
    pub error_string: String,
}

/// Inserts the (at most one) Runner row for a Selection. The unique
/// constraint on `col_selection_id` is what makes a second `run()`
/// call on an already-run Selection fail loudly instead of silently
/// creating a duplicate pipeline pass.
pub async fn insert(col_selection_id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"
        insert into processing_engine_runners (col_selection_id)
        values ($1)
        returning id as "id: Id"
        "#,
        col_selection_id as Id,
    )
    .fetch_one(pool)
    .await?;

    Ok(rec.id)
}

pub async fn fetch(id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            col_selection_id as "col_selection_id: Id",
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from processing_engine_runners
        where id = $1
        "#,
        id as Id,
    )
    .fetch_one(pool)
    .await
}

pub async fn fetch_by_selection(
    col_selection_id: Id,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            col_selection_id as "col_selection_id: Id",
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from processing_engine_runners
        where col_selection_id = $1
        "#,
        col_selection_id as Id,
    )
    .fetch_optional(pool)
    .await
}

/// Every Runner currently in `Running`, used at process startup to find
/// pipelines a crashed host left stranded (see crash recovery).
pub async fn fetch_all_running(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            col_selection_id as "col_selection_id: Id",
            workdir_archive_blob_id as "workdir_archive_blob_id: Id",
            state as "state: EntityState",
            error_string
        from processing_engine_runners
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
        update processing_engine_runners set
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

/// Sets the workdir archive reference. Must be called before the
/// Runner's terminal state transition is persisted, regardless of
/// whether the run succeeded -- see the engine invocation protocol.
pub async fn set_workdir_archive(
    id: Id,
    workdir_archive_blob_id: Id,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update processing_engine_runners set workdir_archive_blob_id = $2
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
