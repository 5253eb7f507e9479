//! Orchestrator/Facade: the top-level operations a caller (CLI, or an
//! HTTP layer built on top of this crate) drives. No hidden state is
//! kept between calls -- every operation re-derives what it needs from
//! the database, which is what lets `EditSave` detect a Catalog
//! rotation that happened after `EditPrep` purely from stored state
//! (see `edit_prep`'s `CatalogChanged` check).

use std::path::PathBuf;

use colpipe_models::EntityState;

use crate::blob_store::BlobStore;
use crate::catalog::{Catalog, SchemaSource};
use crate::collection::Collection;
use crate::error::Error;
use crate::runner::Runner;
use crate::selection::Selection;

#[derive(Clone)]
pub struct Facade {
    pool: sqlx::PgPool,
    blobs: BlobStore,
    engines_dir: PathBuf,
    workdir_root: PathBuf,
    legacy_discipline: bool,
    schema_source: SchemaSource,
}

#[derive(Debug, serde::Serialize)]
pub struct CollectionOverview {
    pub name: String,
    pub catalog_name: String,
    pub state: EntityState,
    pub error_string: String,
}

#[derive(Debug, serde::Serialize)]
pub struct CatalogOverview {
    pub name: String,
    pub deprecated: bool,
}

impl Facade {
    pub fn new(
        pool: sqlx::PgPool,
        engines_dir: PathBuf,
        workdir_root: PathBuf,
        legacy_discipline: bool,
        schema_source: SchemaSource,
    ) -> Facade {
        Facade {
            blobs: BlobStore::new(pool.clone()),
            pool,
            engines_dir,
            workdir_root,
            legacy_discipline,
            schema_source,
        }
    }

    #[tracing::instrument(skip(self, archive_bytes))]
    pub async fn new_catalog(&self, name: &str, archive_bytes: &[u8]) -> Result<(), Error> {
        Catalog::new(name, archive_bytes, &self.blobs, &self.pool).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn new_collection(&self, name: &str, catalog_name: &str) -> Result<(), Error> {
        Collection::new(name, catalog_name, &self.pool).await?;
        Ok(())
    }

    /// Points a Collection at a different Catalog. Callers of this path
    /// should follow up with `edit_prep_for_schema_renewal` (not
    /// `edit_prep`) to read the new schema without tripping
    /// `CatalogChanged` on their own rotation.
    #[tracing::instrument(skip(self))]
    pub async fn renew_catalog(&self, name: &str, new_catalog_name: &str) -> Result<(), Error> {
        Collection::renew_catalog(name, new_catalog_name, &self.pool).await
    }

    /// Returns `(schemaJson, jsonInput)`, where `jsonInput` is the most
    /// recent Selection's `jsonOutput` -- prep always reads
    /// `jsonInput = previous.jsonOutput`.
    #[tracing::instrument(skip(self))]
    pub async fn edit_prep(&self, name: &str) -> Result<(Vec<u8>, serde_json::Value), Error> {
        self.edit_prep_impl(name, false).await
    }

    /// Same as `edit_prep`, but for the internal schema-renewal path
    /// that's allowed to observe a Collection whose Catalog has already
    /// been rotated since its last edit.
    #[tracing::instrument(skip(self))]
    pub async fn edit_prep_for_schema_renewal(
        &self,
        name: &str,
    ) -> Result<(Vec<u8>, serde_json::Value), Error> {
        self.edit_prep_impl(name, true).await
    }

    async fn edit_prep_impl(
        &self,
        name: &str,
        allow_renewal: bool,
    ) -> Result<(Vec<u8>, serde_json::Value), Error> {
        let collection = Collection::load_by_name(name, &self.pool).await?;
        if collection.cell.state == EntityState::Running {
            return Err(Error::NotEditable {
                name: name.to_string(),
                state: "Running",
            });
        }

        let latest = Selection::load_latest(collection.id, &self.pool).await?;
        if !allow_renewal && latest.catalog_id_at_creation != collection.catalog_id {
            return Err(Error::CatalogChanged);
        }

        let catalog = Catalog::fetch(collection.catalog_id, &self.pool).await?;
        let schema_json = catalog.schema_json(&self.blobs, &self.schema_source).await?;
        Ok((schema_json, latest.json_output))
    }

    /// Validates `schemaJson == catalog.schema()`, then appends and
    /// launches the new Selection. The `NotEditable`/`InputMismatch`
    /// gates live in `Collection::append_and_run_selection`.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip(self, schema_json, json_input, json_output))]
    pub async fn edit_save(
        &self,
        name: &str,
        schema_json: &[u8],
        json_input: serde_json::Value,
        json_output: serde_json::Value,
        user: &str,
    ) -> Result<(), Error> {
        let collection = Collection::load_by_name(name, &self.pool).await?;
        let catalog = Catalog::fetch(collection.catalog_id, &self.pool).await?;
        let current_schema = catalog.schema_json(&self.blobs, &self.schema_source).await?;
        if current_schema.as_slice() != schema_json {
            return Err(Error::SchemaMismatch);
        }

        Collection::append_and_run_selection(
            name,
            json_input,
            json_output,
            user,
            self.engines_dir.clone(),
            self.workdir_root.clone(),
            self.legacy_discipline,
            self.schema_source.clone(),
            self.blobs.clone(),
            self.pool.clone(),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn collections_overview(&self) -> Result<Vec<CollectionOverview>, Error> {
        let rows = colpipe_sql::collections::overview(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| CollectionOverview {
                name: r.name,
                catalog_name: r.catalog_name,
                state: r.state,
                error_string: r.error_string,
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    pub async fn catalogs_overview(&self) -> Result<Vec<CatalogOverview>, Error> {
        let rows = colpipe_sql::catalogs::overview(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| CatalogOverview {
                name: r.name,
                deprecated: r.deprecated,
            })
            .collect())
    }

    /// Packages the terminated Selection's frozen Catalog and Runner
    /// workdir into a single replayable archive. Returns the bytes and
    /// a basename suitable for a filename.
    #[tracing::instrument(skip(self))]
    pub async fn collection_replayable(&self, name: &str) -> Result<(Vec<u8>, String), Error> {
        crate::replayable::build(name, &self.workdir_root, &self.blobs, &self.pool).await
    }

    /// Moves every Selection (and Runner) still recorded as `Running`
    /// to `Failed("recovered: host crash")`. Call once at process
    /// startup, before serving any edits -- a Collection whose latest
    /// Selection is stuck `Running` rejects every `EditSave` with
    /// `NotEditable` until this runs.
    #[tracing::instrument(skip(self))]
    pub async fn recover_stuck_runs(&self) -> Result<usize, Error> {
        let mut recovered = 0usize;

        for row in colpipe_sql::runners::fetch_all_running(&self.pool).await? {
            let mut runner = Runner::load(row.id, &self.pool).await?;
            crate::state::transition(
                &mut runner,
                EntityState::Failed,
                Some("recovered: host crash"),
                &self.pool,
            )
            .await?;
            recovered += 1;
        }

        for row in colpipe_sql::selections::fetch_all_running(&self.pool).await? {
            let mut selection = Selection::load(row.id, &self.pool).await?;
            if selection.cell.state != EntityState::Running {
                continue; // already fixed by the runner loop above
            }
            crate::state::transition(
                &mut selection,
                EntityState::Failed,
                Some("recovered: host crash"),
                &self.pool,
            )
            .await?;
            recovered += 1;
        }

        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    fn facade(pool: sqlx::PgPool) -> Facade {
        Facade::new(
            pool,
            PathBuf::from("/nonexistent"),
            std::env::temp_dir(),
            true, // legacy discipline: engines_dir above is never used by these tests
            SchemaSource::StoredArchive,
        )
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn edit_prep_reports_catalog_changed_after_renewal() {
        let pool = test_support::pool().await;
        let f = facade(pool.clone());
        let cat_a = test_support::unique_name("cat");
        let cat_b = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");

        f.new_catalog(&cat_a, &test_support::tiny_catalog_archive())
            .await
            .unwrap();
        f.new_catalog(&cat_b, &test_support::tiny_catalog_archive())
            .await
            .unwrap();
        f.new_collection(&collection_name, &cat_a).await.unwrap();

        // Before any renewal, prep succeeds (latest selection's frozen
        // catalog id matches the collection's current one).
        f.edit_prep(&collection_name).await.unwrap();

        f.renew_catalog(&collection_name, &cat_b).await.unwrap();

        let err = f.edit_prep(&collection_name).await.unwrap_err();
        assert!(matches!(err, Error::CatalogChanged));

        // The internal renewal path is unaffected by the rotation it itself caused.
        f.edit_prep_for_schema_renewal(&collection_name)
            .await
            .unwrap();
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn edit_save_rejects_stale_schema_after_catalog_replaced() {
        let pool = test_support::pool().await;
        let f = facade(pool.clone());
        let cat_a = test_support::unique_name("cat");
        let cat_b = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");

        f.new_catalog(&cat_a, &schema_archive(br#"{"a": true}"#))
            .await
            .unwrap();
        f.new_collection(&collection_name, &cat_a).await.unwrap();

        // EditPrep returns the schema for catalog A...
        let (stale_schema, _) = f.edit_prep(&collection_name).await.unwrap();

        // ...then the Collection's Catalog is replaced with a distinct one...
        f.new_catalog(&cat_b, &schema_archive(br#"{"b": true}"#))
            .await
            .unwrap();
        f.renew_catalog(&collection_name, &cat_b).await.unwrap();

        // ...so EditSave with the stale schema fails SchemaMismatch, not
        // CatalogChanged (that check only lives in EditPrep).
        let err = f
            .edit_save(
                &collection_name,
                &stale_schema,
                serde_json::json!({}),
                serde_json::json!({}),
                "dave",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch));

        let collection = crate::collection::Collection::load_by_name(&collection_name, &pool)
            .await
            .unwrap();
        assert_eq!(collection.cell.state, EntityState::Completed);
    }

    fn schema_archive(schema_bytes: &[u8]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Schema.json"), schema_bytes).unwrap();
        crate::archive::compress_dir(dir.path()).unwrap()
    }
}

