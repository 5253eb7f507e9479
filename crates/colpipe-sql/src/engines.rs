use chrono::{DateTime, Utc};
use colpipe_models::{EntityState, Id};

#[derive(Debug)]
pub struct Row {
    pub id: Id,
    pub runner_id: Id,
    pub ordinal: i32,
    pub bin_path: String,
    pub bin_mod_time: Option<DateTime<Utc>>,
    pub run_start: Option<DateTime<Utc>>,
    pub run_end: Option<DateTime<Utc>>,
    pub args: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub state: EntityState,
    pub error_string: String,
}

pub async fn insert(
    runner_id: Id,
    ordinal: i32,
    bin_path: &str,
    args: &[String],
    pool: &sqlx::PgPool,
) -> sqlx::Result<Id> {
    let rec = sqlx::query!(
        r#"
        insert into processing_engines (runner_id, ordinal, bin_path, args)
        values ($1, $2, $3, $4)
        returning id as "id: Id"
        "#,
        runner_id as Id,
        ordinal,
        bin_path,
        args,
    )
    .fetch_one(pool)
    .await?;

    Ok(rec.id)
}

pub async fn fetch_for_runner(runner_id: Id, pool: &sqlx::PgPool) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as!(
        Row,
        r#"
        select
            id as "id: Id",
            runner_id as "runner_id: Id",
            ordinal,
            bin_path,
            bin_mod_time,
            run_start,
            run_end,
            args,
            stdout,
            stderr,
            exit_code,
            state as "state: EntityState",
            error_string
        from processing_engines
        where runner_id = $1
        order by ordinal
        "#,
        runner_id as Id,
    )
    .fetch_all(pool)
    .await
}

pub struct InvocationResult<'a> {
    pub bin_mod_time: DateTime<Utc>,
    pub run_start: DateTime<Utc>,
    pub run_end: DateTime<Utc>,
    pub stdout: &'a str,
    pub stderr: &'a str,
    pub exit_code: i32,
}

/// Records the outcome of having actually invoked the engine's binary,
/// without yet transitioning its state -- the caller decides
/// Completed vs Failed from the exit code and persists that
/// separately via `update_state`.
pub async fn record_invocation(
    id: Id,
    result: InvocationResult<'_>,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update processing_engines set
            bin_mod_time = $2,
            run_start = $3,
            run_end = $4,
            stdout = $5,
            stderr = $6,
            exit_code = $7,
            updated_at = now()
        where id = $1
        returning 1 as "must_exist"
        "#,
        id as Id,
        result.bin_mod_time,
        result.run_start,
        result.run_end,
        result.stdout,
        result.stderr,
        result.exit_code,
    )
    .fetch_one(pool)
    .await?;

    Ok(())
}

pub async fn update_state(
    id: Id,
    state: EntityState,
    error_string: &str,
    pool: &sqlx::PgPool,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        update processing_engines set
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
