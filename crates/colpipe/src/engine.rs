//! One ProcessingEngine invocation: stat the binary, launch it, capture
//! merged stdout/stderr and wall-clock timestamps, map its exit code to
//! Completed/Failed.
//!
//! A single `ProcessingEngineRunner` drives its engines strictly in
//! sequence and is itself the direct, synchronous observer of each
//! invocation's outcome, so an engine's own state change is persisted
//! here without indirecting through the generic [`crate::state`]
//! propagation hook — the Runner's loop body *is* the recompute step
//! for this one link in the chain (see `runner.rs`).

use std::path::Path;

use chrono::Utc;
use colpipe_models::{EntityState, Id};

use crate::error::Error;
use crate::state::StateCell;

pub struct EngineInvocation {
    pub id: Id,
    pub runner_id: Id,
    pub ordinal: i32,
    pub bin_path: String,
    pub args: Vec<String>,
    pub cell: StateCell,
}

impl EngineInvocation {
    pub async fn create(
        runner_id: Id,
        ordinal: i32,
        bin_path: &str,
        args: &[String],
        pool: &sqlx::PgPool,
    ) -> Result<EngineInvocation, Error> {
        if args.len() > 5 {
            return Err(Error::IoFailure(
                "processing engine invocations are limited to at most 5 args".to_string(),
            ));
        }
        let id = colpipe_sql::engines::insert(runner_id, ordinal, bin_path, args, pool).await?;
        Ok(EngineInvocation {
            id,
            runner_id,
            ordinal,
            bin_path: bin_path.to_string(),
            args: args.to_vec(),
            cell: StateCell::pending(),
        })
    }

    pub fn engine_name(&self) -> &str {
        Path::new(&self.bin_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.bin_path)
    }

    async fn persist(&self, pool: &sqlx::PgPool) -> Result<(), Error> {
        colpipe_sql::engines::update_state(self.id, self.cell.state, &self.cell.error_string, pool)
            .await?;
        Ok(())
    }

    /// Runs the binary to completion, persisting `Running` then
    /// `Completed`/`Failed`. Returns `Err(Error::EngineFailed)` on a
    /// non-zero exit so the Runner's loop can stop iterating.
    #[tracing::instrument(skip(self, pool), fields(bin_path = %self.bin_path))]
    pub async fn run(&mut self, pool: &sqlx::PgPool) -> Result<(), Error> {
        self.cell.apply(EntityState::Running, None);
        self.persist(pool).await?;

        let bin_mod_time = match std::fs::metadata(&self.bin_path).and_then(|m| m.modified()) {
            Ok(t) => chrono::DateTime::<Utc>::from(t),
            Err(err) => {
                let message = format!("stat {:?}: {}", self.bin_path, err);
                self.cell.apply(EntityState::Failed, Some(&message));
                self.persist(pool).await?;
                return Err(Error::IoFailure(message));
            }
        };

        let mut cmd = async_process::Command::new(&self.bin_path);
        cmd.args(&self.args);

        let run_start = Utc::now();
        let output = run_capturing(&mut cmd).await;
        let run_end = Utc::now();

        let (exit_code, stdout, stderr) = match output {
            Ok(result) => result,
            Err(err) => {
                let message = err.to_string();
                self.cell.apply(EntityState::Failed, Some(&message));
                self.persist(pool).await?;
                return Err(Error::IoFailure(message));
            }
        };

        colpipe_sql::engines::record_invocation(
            self.id,
            colpipe_sql::engines::InvocationResult {
                bin_mod_time,
                run_start,
                run_end,
                stdout: &stdout,
                stderr: &stderr,
                exit_code,
            },
            pool,
        )
        .await?;

        if exit_code != 0 {
            let message = format!("{} gave exit-code {}", self.engine_name(), exit_code);
            self.cell.apply(EntityState::Failed, Some(&message));
            self.persist(pool).await?;
            return Err(Error::EngineFailed {
                engine_name: self.engine_name().to_string(),
                exit_code,
                combined_output: format!("{stdout}{stderr}"),
            });
        }

        self.cell.apply(EntityState::Completed, None);
        self.persist(pool).await?;
        Ok(())
    }
}

/// Spawns `cmd` with merged stdout/stderr capture, mirroring the
/// spawn/wait split the rest of the workspace uses for external
/// process invocation. Stdout, stderr and `wait` are serviced
/// concurrently -- an engine that fills the stderr pipe while stdout
/// is still open would otherwise deadlock a purely sequential reader.
async fn run_capturing(
    cmd: &mut async_process::Command,
) -> Result<(i32, String, String), std::io::Error> {
    use tokio::io::AsyncReadExt;

    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let mut child: async_process::Child = cmd.spawn()?.into();
    let c_stdout = child.stdout.take();
    let c_stderr = child.stderr.take();

    let stdout = async move {
        let mut buf = String::new();
        if let Some(mut reader) = c_stdout {
            reader.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let stderr = async move {
        let mut buf = String::new();
        if let Some(mut reader) = c_stderr {
            reader.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };
    let wait = child.wait();

    let (stdout_buf, stderr_buf, status) = futures::try_join!(stdout, stderr, wait)?;
    Ok((status.code().unwrap_or(-1), stdout_buf, stderr_buf))
}
