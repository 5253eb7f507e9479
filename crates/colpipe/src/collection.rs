//! Collection: a named, append-only history of Selections. Enforces
//! the single-active-run invariant (`NotEditable`) and the
//! jsonInput == previous.jsonOutput continuity invariant
//! (`InputMismatch`) at append time, both under the same row lock so
//! concurrent edits of the same Collection serialize correctly.

use std::path::{Path, PathBuf};

use colpipe_models::{validate_dns_label, EntityState, Id};

use crate::blob_store::BlobStore;
use crate::catalog::{Catalog, SchemaSource};
use crate::error::Error;
use crate::selection::Selection;
use crate::state::{StateCell, Transitionable};

pub struct Collection {
    pub id: Id,
    pub name: String,
    pub catalog_id: Id,
    pub cell: StateCell,
}

impl Collection {
    fn from_row(row: colpipe_sql::collections::Row) -> Collection {
        Collection {
            id: row.id,
            name: row.name,
            catalog_id: row.catalog_id,
            cell: StateCell::new(row.state, row.error_string),
        }
    }

    pub async fn load(id: Id, pool: &sqlx::PgPool) -> Result<Collection, Error> {
        let row = colpipe_sql::collections::fetch(id, pool).await?;
        Ok(Collection::from_row(row))
    }

    pub async fn load_by_name(name: &str, pool: &sqlx::PgPool) -> Result<Collection, Error> {
        let row = colpipe_sql::collections::fetch_by_name(name, pool)
            .await
            .map_err(|_| Error::UnknownCollection(name.to_string()))?;
        Ok(Collection::from_row(row))
    }

    /// Creates the Collection and its synthetic initial Selection
    /// (`jsonInput="{}"`, `jsonOutput="{}"`, `requestingUser="init"`),
    /// then drives that Selection straight to `Completed` -- there's no
    /// Runner for it, so its terminal transition is applied directly
    /// and cascades up to the Collection through the normal hook.
    #[tracing::instrument(skip(pool))]
    pub async fn new(
        name: &str,
        catalog_name: &str,
        pool: &sqlx::PgPool,
    ) -> Result<Collection, Error> {
        validate_dns_label(name)?;

        if colpipe_sql::collections::fetch_by_name(name, pool)
            .await
            .is_ok()
        {
            return Err(Error::DuplicateName {
                kind: "collection",
                name: name.to_string(),
            });
        }

        let catalog = Catalog::fetch_by_name(catalog_name, pool).await?;
        let id = colpipe_sql::collections::insert(name, catalog.id, pool).await?;

        let empty = serde_json::json!({});
        let initial_id = colpipe_sql::selections::insert(
            colpipe_sql::selections::NewSelection {
                collection_id: id,
                catalog_id_at_creation: catalog.id,
                json_input: &empty,
                json_output: &empty,
                requesting_user: Selection::INITIAL_USER,
            },
            pool,
        )
        .await?;

        let mut initial = Selection::load(initial_id, pool).await?;
        crate::state::transition(&mut initial, EntityState::Completed, None, pool).await?;

        Collection::load(id, pool).await
    }

    /// Points this Collection at a different Catalog (the schema-renewal
    /// path). Existing Selections are untouched -- each keeps its own
    /// frozen `catalog_id_at_creation`, which is what lets `EditPrep`
    /// detect the rotation afterward via `CatalogChanged`. Rejected
    /// while `Running`, same as an edit would be.
    #[tracing::instrument(skip(pool))]
    pub async fn renew_catalog(
        name: &str,
        new_catalog_name: &str,
        pool: &sqlx::PgPool,
    ) -> Result<(), Error> {
        let collection = Collection::load_by_name(name, pool).await?;
        if collection.cell.state == EntityState::Running {
            return Err(Error::NotEditable {
                name: name.to_string(),
                state: "Running",
            });
        }
        let new_catalog = Catalog::fetch_by_name(new_catalog_name, pool).await?;
        colpipe_sql::collections::update_catalog(collection.id, new_catalog.id, pool).await?;
        Ok(())
    }

    /// Policy:
    /// 1. Reload self (the caller passes only `name`, so this is
    ///    implicit -- the row lock below is the reload).
    /// 2. Fail `NotEditable` if `state == Running`.
    /// 3. Compare `jsonInput` against `selections[last].jsonOutput`,
    ///    unless `selections[last]` is the synthetic initial Selection
    ///    (decision (c): the initial Selection always accepts).
    /// 4. Append the new Selection bound to the Collection's *current*
    ///    Catalog, and move both it and the Collection to `Running`
    ///    before releasing the row lock -- otherwise a second caller
    ///    could acquire the lock while this edit's background task
    ///    hasn't yet run its own `Running` transition, observe the stale
    ///    terminal state, and launch a second, concurrent run.
    /// 5. Launch the run in a background task and return immediately.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(json_input, json_output, blobs, pool))]
    pub async fn append_and_run_selection(
        name: &str,
        json_input: serde_json::Value,
        json_output: serde_json::Value,
        user: &str,
        engines_dir: PathBuf,
        workdir_root: PathBuf,
        legacy_discipline: bool,
        schema_source: SchemaSource,
        blobs: BlobStore,
        pool: sqlx::PgPool,
    ) -> Result<(), Error> {
        let (new_selection_id, collection_name, catalog_id, previous_state, previous_error) = {
            let mut txn = pool.begin().await?;

            let row = colpipe_sql::collections::fetch_by_name_for_update(name, &mut txn)
                .await
                .map_err(|_| Error::UnknownCollection(name.to_string()))?;

            if row.state == EntityState::Running {
                return Err(Error::NotEditable {
                    name: name.to_string(),
                    state: "Running",
                });
            }

            let latest = colpipe_sql::selections::fetch_latest_tx(row.id, &mut txn).await?;
            let latest_is_initial = latest.requesting_user == Selection::INITIAL_USER;
            if !latest_is_initial && latest.json_output != json_input {
                return Err(Error::InputMismatch);
            }

            let new_id = colpipe_sql::selections::insert_tx(
                colpipe_sql::selections::NewSelection {
                    collection_id: row.id,
                    catalog_id_at_creation: row.catalog_id,
                    json_input: &json_input,
                    json_output: &json_output,
                    requesting_user: user,
                },
                &mut txn,
            )
            .await?;

            // Make the single-writer guarantee hold under concurrency:
            // a second `append_and_run_selection` blocked on the row
            // lock above must observe `Running`, not the stale terminal
            // state, once it acquires the lock we're about to release.
            colpipe_sql::selections::update_state_tx(new_id, EntityState::Running, "", &mut txn)
                .await?;
            colpipe_sql::collections::update_state_tx(row.id, EntityState::Running, "", &mut txn)
                .await?;

            txn.commit().await?;
            (new_id, row.name, row.catalog_id, row.state, row.error_string)
        };

        tokio::spawn(run_in_background(
            new_selection_id,
            collection_name,
            catalog_id,
            previous_state,
            previous_error,
            engines_dir,
            workdir_root,
            legacy_discipline,
            schema_source,
            blobs,
            pool,
        ));

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_in_background(
    selection_id: Id,
    collection_name: String,
    catalog_id: Id,
    previous_state: EntityState,
    previous_error: String,
    engines_dir: PathBuf,
    workdir_root: PathBuf,
    legacy_discipline: bool,
    schema_source: SchemaSource,
    blobs: BlobStore,
    pool: sqlx::PgPool,
) {
    if let Err(err) =
        run_in_background_fallible(
            selection_id,
            &collection_name,
            catalog_id,
            previous_state,
            &previous_error,
            &engines_dir,
            &workdir_root,
            legacy_discipline,
            &schema_source,
            &blobs,
            &pool,
        )
        .await
    {
        tracing::warn!(error = ?err, %selection_id, collection = %collection_name, "selection run finished with an error");
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_in_background_fallible(
    selection_id: Id,
    collection_name: &str,
    catalog_id: Id,
    previous_state: EntityState,
    previous_error: &str,
    engines_dir: &Path,
    workdir_root: &Path,
    legacy_discipline: bool,
    schema_source: &SchemaSource,
    blobs: &BlobStore,
    pool: &sqlx::PgPool,
) -> Result<(), Error> {
    let catalog = Catalog::fetch(catalog_id, pool).await?;
    let schema_json = catalog.schema_json(blobs, schema_source).await?;
    let mut selection = Selection::load(selection_id, pool).await?;

    selection
        .run(
            collection_name,
            previous_state,
            previous_error,
            &catalog,
            &schema_json,
            engines_dir,
            workdir_root,
            legacy_discipline,
            blobs,
            pool,
        )
        .await
}

#[async_trait::async_trait]
impl Transitionable for Collection {
    fn cell_mut(&mut self) -> &mut StateCell {
        &mut self.cell
    }

    async fn persist(&self, pool: &sqlx::PgPool) -> Result<(), Error> {
        colpipe_sql::collections::update_state(
            self.id,
            self.cell.state,
            &self.cell.error_string,
            pool,
        )
        .await?;
        Ok(())
    }

    async fn propagate(&self, _pool: &sqlx::PgPool) -> Result<(), Error> {
        // Collection is the root of the hierarchy -- no parent to recompute.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    #[serial_test::serial]
    async fn new_creates_completed_collection_with_initial_selection() {
        let pool = test_support::pool().await;
        let blobs = BlobStore::new(pool.clone());
        let catalog_name = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");

        Catalog::new(&catalog_name, &test_support::tiny_catalog_archive(), &blobs, &pool)
            .await
            .unwrap();
        let collection = Collection::new(&collection_name, &catalog_name, &pool)
            .await
            .unwrap();

        assert_eq!(collection.cell.state, EntityState::Completed);
        assert_eq!(collection.cell.error_string, "");

        let initial = Selection::load_latest(collection.id, &pool).await.unwrap();
        assert!(initial.is_initial());
        assert_eq!(initial.json_input, serde_json::json!({}));
        assert_eq!(initial.json_output, serde_json::json!({}));
        assert_eq!(initial.cell.state, EntityState::Completed);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn append_and_run_selection_rejects_running_collection() {
        let pool = test_support::pool().await;
        let blobs = BlobStore::new(pool.clone());
        let catalog_name = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");

        Catalog::new(&catalog_name, &test_support::tiny_catalog_archive(), &blobs, &pool)
            .await
            .unwrap();
        let mut collection = Collection::new(&collection_name, &catalog_name, &pool)
            .await
            .unwrap();
        crate::state::transition(&mut collection, EntityState::Running, None, &pool)
            .await
            .unwrap();

        let workdir_root = tempfile::tempdir().unwrap();
        let engines_dir = test_support::passthrough_engines_dir();
        let err = Collection::append_and_run_selection(
            &collection_name,
            serde_json::json!({}),
            serde_json::json!({"n": 1}),
            "alice",
            engines_dir.path().to_path_buf(),
            workdir_root.path().to_path_buf(),
            true,
            SchemaSource::StoredArchive,
            blobs,
            pool.clone(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::NotEditable { .. }));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn append_and_run_selection_rejects_input_mismatch() {
        let pool = test_support::pool().await;
        let blobs = BlobStore::new(pool.clone());
        let catalog_name = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");

        let catalog = Catalog::new(&catalog_name, &test_support::tiny_catalog_archive(), &blobs, &pool)
            .await
            .unwrap();
        let collection = Collection::new(&collection_name, &catalog_name, &pool)
            .await
            .unwrap();

        // Simulate a prior, already-terminated edit directly (no pipeline
        // run needed for this check): a non-initial Selection whose
        // jsonOutput is {"n": 1}.
        let prior_id = colpipe_sql::selections::insert(
            colpipe_sql::selections::NewSelection {
                collection_id: collection.id,
                catalog_id_at_creation: catalog.id,
                json_input: &serde_json::json!({}),
                json_output: &serde_json::json!({"n": 1}),
                requesting_user: "alice",
            },
            &pool,
        )
        .await
        .unwrap();
        colpipe_sql::selections::update_state(prior_id, EntityState::Completed, "", &pool)
            .await
            .unwrap();

        let workdir_root = tempfile::tempdir().unwrap();
        let engines_dir = test_support::passthrough_engines_dir();
        let err = Collection::append_and_run_selection(
            &collection_name,
            serde_json::json!({"n": 999}), // does not match prior's jsonOutput
            serde_json::json!({"n": 2}),
            "bob",
            engines_dir.path().to_path_buf(),
            workdir_root.path().to_path_buf(),
            true,
            SchemaSource::StoredArchive,
            blobs,
            pool.clone(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::InputMismatch));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn run_in_background_fallible_completes_selection_and_updates_json_output() {
        let pool = test_support::pool().await;
        let blobs = BlobStore::new(pool.clone());
        let catalog_name = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");

        let catalog = Catalog::new(&catalog_name, &test_support::tiny_catalog_archive(), &blobs, &pool)
            .await
            .unwrap();
        let collection = Collection::new(&collection_name, &catalog_name, &pool)
            .await
            .unwrap();

        let selection_id = colpipe_sql::selections::insert(
            colpipe_sql::selections::NewSelection {
                collection_id: collection.id,
                catalog_id_at_creation: catalog.id,
                json_input: &serde_json::json!({}),
                json_output: &serde_json::json!({"n": 1}),
                requesting_user: "carol",
            },
            &pool,
        )
        .await
        .unwrap();

        let workdir_root = tempfile::tempdir().unwrap();
        let engines_dir = test_support::passthrough_engines_dir();
        run_in_background_fallible(
            selection_id,
            &collection_name,
            catalog.id,
            EntityState::Completed,
            "",
            engines_dir.path(),
            workdir_root.path(),
            true, // legacy discipline
            &SchemaSource::StoredArchive,
            &blobs,
            &pool,
        )
        .await
        .unwrap();

        let selection = Selection::load(selection_id, &pool).await.unwrap();
        assert_eq!(selection.cell.state, EntityState::Completed);
        assert_eq!(selection.json_output, serde_json::json!({"n": 1}));
        assert!(selection.workdir_archive_blob_id.is_some());

        let reloaded_collection = Collection::load(collection.id, &pool).await.unwrap();
        assert_eq!(reloaded_collection.cell.state, EntityState::Completed);
    }
}
