use colpipe_models::Id;

#[derive(Debug)]
pub struct Row {
    pub id: Id,
    pub name: String,
    pub archive_blob_id: Id,
    pub deprecated: bool,
}

pub async fn insert(
    name: &str,
    archive_blob_id: Id,
    pool: &sqlx::PgPool,
) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"
        insert into catalogs (name, archive_blob_id)
        values ($1, $2)
        returning id as "id: Id"
        "#,
        name,
        archive_blob_id as Id,
    )
    .fetch_one(pool)
    .await?;

    Ok(rec.id)
}

pub async fn fetch_by_name(name: &str, pool: &sqlx::PgPool) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            name,
            archive_blob_id as "archive_blob_id: Id",
            deprecated
        from catalogs
        where name = $1
        "#,
        name,
    )
    .fetch_one(pool)
    .await
}

pub async fn fetch(id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Row> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            name,
            archive_blob_id as "archive_blob_id: Id",
            deprecated
        from catalogs
        where id = $1
        "#,
        id as Id,
    )
    .fetch_one(pool)
    .await
}

pub async fn overview(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            name,
            archive_blob_id as "archive_blob_id: Id",
            deprecated
        from catalogs
        order by name
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn set_deprecated(id: Id, deprecated: bool, pool: &sqlx::PgPool) -> sqlx::Result<()> {
    sqlx::query!(
        r#"update catalogs set deprecated = $2 where id = $1 returning 1 as "must_exist""#,
        id as Id,
        deprecated,
    )
    .fetch_one(pool)
    .await?;

    Ok(())
}
