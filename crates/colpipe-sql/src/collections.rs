use colpipe_models::{EntityState, Id};

#[derive(Debug)]
pub struct Row {
    pub id: Id,
    pub name: String,
    pub catalog_id: Id,
    pub state: EntityState,
    pub error_string: String,
}

#[derive(Debug)]
pub struct OverviewRow {
    pub name: String,
    pub catalog_name: String,
    pub state: EntityState,
    pub error_string: String,
}

pub async fn insert(name: &str, catalog_id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"insert into collections (name, catalog_id) values ($1, $2) returning id as "id: Id""#,
        name,
        catalog_id as Id,
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
            name,
            catalog_id as "catalog_id: Id",
            state as "state: EntityState",
            error_string
        from collections
        where id = $1
        "#,
        id as Id,
    )
    .fetch_one(pool)
    .await
}

pub async fn fetch_by_name(name: &str, pool: &sqlx::PgPool) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            name,
            catalog_id as "catalog_id: Id",
            state as "state: EntityState",
            error_string
        from collections
        where name = $1
        "#,
        name,
    )
    .fetch_one(pool)
    .await
}

/// Locks the collection row for the duration of the caller's
/// transaction. `AppendAndRunSelection` takes this lock before
/// re-checking `state`, which is what makes the single-writer
/// guarantee hold under concurrent edits of the same Collection.
pub async fn fetch_by_name_for_update(
    name: &str,
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            name,
            catalog_id as "catalog_id: Id",
            state as "state: EntityState",
            error_string
        from collections
        where name = $1
        for update
        "#,
        name,
    )
    .fetch_one(&mut *txn)
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
        update collections set
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

/// Same as [`update_state`], but runs against an open transaction so
/// `AppendAndRunSelection` can move the collection to `Running` before
/// releasing the row lock, making the transition visible to the next
/// `FOR UPDATE` waiter instead of only after the background task starts.
pub async fn update_state_tx(
    id: Id,
    state: EntityState,
    error_string: &str,
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update collections set
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

/// Points a Collection at a different Catalog row. Existing Selections
/// keep their own frozen `catalog_id_at_creation`, so this is the one
/// place `collections.catalog_id` itself changes after creation (the
/// schema-renewal path).
pub async fn update_catalog(id: Id, catalog_id: Id, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update collections set
            catalog_id = $2,
            updated_at = now()
        where id = $1
        returning 1 as "must_exist"
        "#,
        id as Id,
        catalog_id as Id,
    )
    .fetch_one(pool)
    .await?;

    Ok(())
}

pub async fn overview(pool: &sqlx::PgPool) -> sqlx::Result<Vec<OverviewRow>> {
    sqlx::query_as!(
        OverviewRow,
        r#"
        select
            c.name,
            cat.name as catalog_name,
            c.state as "state: EntityState",
            c.error_string
        from collections c
        join catalogs cat on cat.id = c.catalog_id
        order by c.name
        "#,
    )
    .fetch_all(pool)
    .await
}
