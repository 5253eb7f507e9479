//! ProcessingEngineRunner: the sequential pipeline over an ordered engine
//! list. Materializes a workdir tree, drives each engine invocation in
//! strict order, aggregates their state per the child-state mapping table,
//! and archives the workdir into a Blob before its own terminal transition.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use colpipe_models::{EntityState, Id};

use crate::archive;
use crate::blob_store::BlobStore;
use crate::catalog::Catalog;
use crate::engine::EngineInvocation;
use crate::error::Error;
use crate::legacy_envelope;
use crate::state::{map_child_state, StateCell, Transitionable};

pub struct Runner {
    pub id: Id,
    pub col_selection_id: Id,
    pub workdir_archive_blob_id: Option<Id>,
    pub cell: StateCell,
}

/// Everything the Runner needs to know about its Selection and parent
/// Collection that it cannot derive on its own; captured by the caller
/// (`selection.rs`) immediately before launching the run.
pub struct RunContext<'a> {
    pub collection_name: &'a str,
    pub collection_previous_state: EntityState,
    pub collection_previous_error: &'a str,
    pub catalog: &'a Catalog,
    pub schema_json: &'a [u8],
    pub json_input: &'a str,
    pub json_output: &'a str,
    pub engines_dir: &'a Path,
    pub workdir_root: &'a Path,
    pub legacy_discipline: bool,
}

#[derive(serde::Serialize)]
struct PeConfig {
    catalog: PeConfigCatalog,
    collection: PeConfigCollection,
    #[serde(rename = "collection-edit")]
    collection_edit: PeConfigCollectionEdit,
}

#[derive(serde::Serialize)]
struct PeConfigCatalog {
    name: String,
}

#[derive(serde::Serialize)]
struct PeConfigCollection {
    name: String,
    #[serde(rename = "previousState")]
    previous_state: String,
    #[serde(rename = "previousErrorStr")]
    previous_error_str: String,
}

#[derive(serde::Serialize)]
struct PeConfigCollectionEdit {
    #[serde(rename = "schemaFilepath")]
    schema_filepath: String,
    #[serde(rename = "jsonInputFilepath")]
    json_input_filepath: String,
    #[serde(rename = "jsonOutputFilepath")]
    json_output_filepath: String,
}

impl Runner {
    #[tracing::instrument(skip(pool))]
    pub async fn create(col_selection_id: Id, pool: &sqlx::PgPool) -> Result<Runner, Error> {
        let existing = colpipe_sql::runners::fetch_by_selection(col_selection_id, pool).await?;
        if existing.is_some() {
            return Err(Error::AlreadyRun(col_selection_id));
        }
        let id = colpipe_sql::runners::insert(col_selection_id, pool).await?;
        Ok(Runner {
            id,
            col_selection_id,
            workdir_archive_blob_id: None,
            cell: StateCell::pending(),
        })
    }

    pub async fn load(id: Id, pool: &sqlx::PgPool) -> Result<Runner, Error> {
        let row = colpipe_sql::runners::fetch(id, pool).await?;
        Ok(Runner {
            id: row.id,
            col_selection_id: row.col_selection_id,
            workdir_archive_blob_id: row.workdir_archive_blob_id,
            cell: StateCell::new(row.state, row.error_string),
        })
    }

    pub async fn load_by_selection(
        col_selection_id: Id,
        pool: &sqlx::PgPool,
    ) -> Result<Option<Runner>, Error> {
        let row = colpipe_sql::runners::fetch_by_selection(col_selection_id, pool).await?;
        Ok(row.map(|row| Runner {
            id: row.id,
            col_selection_id: row.col_selection_id,
            workdir_archive_blob_id: row.workdir_archive_blob_id,
            cell: StateCell::new(row.state, row.error_string),
        }))
    }

    /// Drives the sequential engine pipeline for `ctx`. Always archives
    /// the workdir before persisting the Runner's terminal transition,
    /// even when an engine failed.
    #[tracing::instrument(skip(self, ctx, blobs, pool), fields(runner_id = %self.id))]
    pub async fn run(
        &mut self,
        ctx: RunContext<'_>,
        blobs: &BlobStore,
        pool: &sqlx::PgPool,
    ) -> Result<(), Error> {
        use crate::state::transition;

        transition(self, EntityState::Running, None, pool).await?;

        let started_at = Utc::now();
        let workdir_basename = format!(
            "{}.{}",
            ctx.collection_name,
            started_at.format("%Y%m%d-%H%M%S")
        );
        let temp_parent = tempfile::tempdir_in(ctx.workdir_root)?;
        let workdir = temp_parent.path().join(&workdir_basename);
        let edit_files = workdir.join("CollectionEditFiles");
        std::fs::create_dir_all(&edit_files)?;

        write_workdir_files(&edit_files, &ctx)?;

        let outcome = if ctx.legacy_discipline {
            self.run_legacy_discipline(&edit_files, ctx.engines_dir, pool).await
        } else {
            self.run_launcher_discipline(&workdir, ctx.catalog, blobs, pool).await
        };

        // The Selection's observable jsonOutput always equals
        // CollectionEditFiles/JsonOutput.json after the run, win or
        // lose -- read it back and persist it before archiving.
        let final_json_output: serde_json::Value =
            serde_json::from_slice(&std::fs::read(edit_files.join("JsonOutput.json"))?)
                .map_err(|e| Error::IoFailure(format!("JsonOutput.json is not valid json: {e}")))?;
        colpipe_sql::selections::update_json_output(
            self.col_selection_id,
            &final_json_output,
            pool,
        )
        .await?;

        // Archive before the terminal transition, regardless of outcome.
        // Copied onto both the Runner and its Selection (the persistent
        // schema carries workdirArchiveRef on ColSelection too, so an
        // overview/replay query never needs to join through the Runner).
        let archive_bytes = archive::compress_dir(&workdir)?;
        let blob_id = blobs.put(&archive_bytes).await?;
        colpipe_sql::runners::set_workdir_archive(self.id, blob_id, pool).await?;
        colpipe_sql::selections::set_workdir_archive_ref(self.col_selection_id, blob_id, pool)
            .await?;
        self.workdir_archive_blob_id = Some(blob_id);

        match outcome {
            Ok(()) => {
                transition(self, EntityState::Completed, None, pool).await?;
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                transition(self, EntityState::Failed, Some(&message), pool).await?;
                Err(err)
            }
        }
    }

    /// A single invocation of the catalog's launcher binary, which is
    /// expected to iterate the engines itself and is treated as an
    /// atomic unit by the Runner.
    async fn run_launcher_discipline(
        &mut self,
        workdir: &Path,
        catalog: &Catalog,
        blobs: &BlobStore,
        pool: &sqlx::PgPool,
    ) -> Result<(), Error> {
        let catalog_dir = tempfile::tempdir()?;
        catalog.extract_to(catalog_dir.path(), blobs).await?;

        let mut invocation = EngineInvocation::create(
            self.id,
            0,
            catalog_dir
                .path()
                .join("bin/internal/bash")
                .to_string_lossy()
                .as_ref(),
            &[
                "-c".to_string(),
                format!(
                    "{} {}",
                    catalog_dir.path().join("bin/CollectionEdit.Launch.sh").display(),
                    workdir.display()
                ),
            ],
            pool,
        )
        .await?;
        invocation.run(pool).await
    }

    /// The legacy per-engine discipline: run each discovered engine
    /// binary directly, feeding it the gzip+base64 envelope files.
    async fn run_legacy_discipline(
        &mut self,
        edit_files: &Path,
        engines_dir: &Path,
        pool: &sqlx::PgPool,
    ) -> Result<(), Error> {
        let binaries = discover_engine_binaries(engines_dir)?;
        let last_index = binaries.len().saturating_sub(1);

        let mut rolling = legacy_envelope::encode(
            &std::fs::read(edit_files.join("JsonOutput.json"))?,
        );

        for (ordinal, bin_path) in binaries.iter().enumerate() {
            let engine_dir = tempfile::tempdir()?;
            let previous_path = engine_dir.path().join("consumer-selection.previous.json");
            let next_path = engine_dir.path().join("consumer-selection.next.json");

            let decoded = legacy_envelope::decode(&rolling)?;
            archive::write_file(&previous_path, &decoded)?;
            archive::write_file(&next_path, &decoded)?;

            let mut invocation = EngineInvocation::create(
                self.id,
                ordinal as i32,
                &bin_path.to_string_lossy(),
                &[
                    previous_path.to_string_lossy().into_owned(),
                    next_path.to_string_lossy().into_owned(),
                ],
                pool,
            )
            .await?;

            let result = invocation.run(pool).await;
            if result.is_ok() {
                let next_contents = std::fs::read(&next_path)?;
                rolling = legacy_envelope::encode(&next_contents);
                std::fs::write(edit_files.join("JsonOutput.json"), &next_contents)?;
            }
            if ordinal == last_index || result.is_err() {
                return result;
            }
        }
        Ok(())
    }

}

fn write_workdir_files(edit_files: &Path, ctx: &RunContext<'_>) -> Result<(), Error> {
    archive::write_file(&edit_files.join("Schema.json"), ctx.schema_json)?;
    archive::write_file(
        &edit_files.join("JsonInput.json"),
        ctx.json_input.as_bytes(),
    )?;
    archive::write_file(
        &edit_files.join("JsonOutput.orig.json"),
        ctx.json_output.as_bytes(),
    )?;
    std::fs::set_permissions(
        edit_files.join("JsonOutput.orig.json"),
        std::fs::Permissions::from_mode(0o400),
    )?;
    archive::write_file(
        &edit_files.join("JsonOutput.json"),
        ctx.json_output.as_bytes(),
    )?;
    std::fs::set_permissions(
        edit_files.join("JsonOutput.json"),
        std::fs::Permissions::from_mode(0o600),
    )?;

    let pe_config = PeConfig {
        catalog: PeConfigCatalog {
            name: ctx.catalog.name.clone(),
        },
        collection: PeConfigCollection {
            name: ctx.collection_name.to_string(),
            previous_state: ctx.collection_previous_state.to_string(),
            previous_error_str: ctx.collection_previous_error.to_string(),
        },
        collection_edit: PeConfigCollectionEdit {
            schema_filepath: "CollectionEditFiles/Schema.json".to_string(),
            json_input_filepath: "CollectionEditFiles/JsonInput.json".to_string(),
            json_output_filepath: "CollectionEditFiles/JsonOutput.json".to_string(),
        },
    };
    archive::write_file(
        &edit_files.join("PeConfig.json"),
        serde_json::to_vec_pretty(&pe_config)
            .map_err(|e| Error::IoFailure(e.to_string()))?
            .as_slice(),
    )?;
    Ok(())
}

/// Executable regular files under `dir`, sorted ascending by filename.
/// Directories and non-executable entries are skipped.
pub fn discover_engine_binaries(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut binaries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
            binaries.push(entry.path());
        }
    }
    binaries.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(binaries)
}

#[async_trait::async_trait]
impl Transitionable for Runner {
    fn cell_mut(&mut self) -> &mut StateCell {
        &mut self.cell
    }

    async fn persist(&self, pool: &sqlx::PgPool) -> Result<(), Error> {
        colpipe_sql::runners::update_state(self.id, self.cell.state, &self.cell.error_string, pool)
            .await?;
        Ok(())
    }

    async fn propagate(&self, pool: &sqlx::PgPool) -> Result<(), Error> {
        // At most one Runner exists per Selection, so this Runner is
        // always its Selection's "last" (and only) child.
        if let Some(parent_state) = map_child_state(self.cell.state, true) {
            let mut selection = crate::selection::Selection::load(self.col_selection_id, pool).await?;
            let message = (parent_state == EntityState::Failed)
                .then(|| format!("{}: {}", self.id, self.cell.error_string));
            crate::state::transition(&mut selection, parent_state, message.as_deref(), pool).await?;
        }
        Ok(())
    }
}
