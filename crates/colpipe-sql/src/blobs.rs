use colpipe_models::Id;

/// Inserts a new content blob and returns its id. Blobs are immutable
/// once written -- callers never update a row in this table, only
/// insert and fetch.
pub async fn insert(data: &[u8], pool: &sqlx::PgPool) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"insert into blobs (data) values ($1) returning id as "id: Id""#,
        data,
    )
    .fetch_one(pool)
    .await?;

    Ok(rec.id)
}

pub async fn fetch(id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Vec<u8>> {
    let rec = sqlx::query!(r#"select data from blobs where id = $1"#, id as Id,)
        .fetch_one(pool)
        .await?;

    Ok(rec.data)
}
