//! ColSelection: one edit attempt. Owns at most one Runner and bridges
//! the Runner's aggregate state up to its Collection via the same
//! StateCell propagation protocol.

use colpipe_models::{EntityState, Id};

use crate::blob_store::BlobStore;
use crate::catalog::Catalog;
use crate::error::Error;
use crate::runner::{RunContext, Runner};
use crate::state::{map_child_state, StateCell, Transitionable};

pub struct Selection {
    pub id: Id,
    pub collection_id: Id,
    pub catalog_id_at_creation: Id,
    pub json_input: serde_json::Value,
    pub json_output: serde_json::Value,
    pub requesting_user: String,
    pub workdir_archive_blob_id: Option<Id>,
    pub cell: StateCell,
}

impl Selection {
    /// `requestingUser` fixed value identifying the synthetic initial
    /// Selection every Collection is created with.
    pub const INITIAL_USER: &'static str = "init";

    pub fn is_initial(&self) -> bool {
        self.requesting_user == Self::INITIAL_USER
    }

    pub async fn load(id: Id, pool: &sqlx::PgPool) -> Result<Selection, Error> {
        let row = colpipe_sql::selections::fetch(id, pool).await?;
        Ok(Selection::from_row(row))
    }

    /// `selections[last]` for a Collection.
    pub async fn load_latest(collection_id: Id, pool: &sqlx::PgPool) -> Result<Selection, Error> {
        let row = colpipe_sql::selections::fetch_latest(collection_id, pool).await?;
        Ok(Selection::from_row(row))
    }

    fn from_row(row: colpipe_sql::selections::Row) -> Selection {
        Selection {
            id: row.id,
            collection_id: row.collection_id,
            catalog_id_at_creation: row.catalog_id_at_creation,
            json_input: row.json_input,
            json_output: row.json_output,
            requesting_user: row.requesting_user,
            workdir_archive_blob_id: row.workdir_archive_blob_id,
            cell: StateCell::new(row.state, row.error_string),
        }
    }

    /// Creates exactly one Runner for this Selection and delegates the
    /// sequential engine pipeline to it. Reloads this Selection after
    /// the Runner terminates, so the in-memory struct reflects whatever
    /// the Runner's own transitions (propagated up through this
    /// Selection already, via the StateCell hook) actually persisted.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip_all, fields(selection_id = %self.id))]
    pub async fn run(
        &mut self,
        collection_name: &str,
        collection_previous_state: EntityState,
        collection_previous_error: &str,
        catalog: &Catalog,
        schema_json: &[u8],
        engines_dir: &std::path::Path,
        workdir_root: &std::path::Path,
        legacy_discipline: bool,
        blobs: &BlobStore,
        pool: &sqlx::PgPool,
    ) -> Result<(), Error> {
        let json_input = self.json_input.to_string();
        let json_output = self.json_output.to_string();

        let mut runner = Runner::create(self.id, pool).await?;
        let ctx = RunContext {
            collection_name,
            collection_previous_state,
            collection_previous_error,
            catalog,
            schema_json,
            json_input: &json_input,
            json_output: &json_output,
            engines_dir,
            workdir_root,
            legacy_discipline,
        };
        let run_result = runner.run(ctx, blobs, pool).await;

        let reloaded = Selection::load(self.id, pool).await?;
        self.cell = reloaded.cell;
        self.json_output = reloaded.json_output;
        self.workdir_archive_blob_id = reloaded.workdir_archive_blob_id;

        run_result
    }
}

#[async_trait::async_trait]
impl Transitionable for Selection {
    fn cell_mut(&mut self) -> &mut StateCell {
        &mut self.cell
    }

    async fn persist(&self, pool: &sqlx::PgPool) -> Result<(), Error> {
        colpipe_sql::selections::update_state(
            self.id,
            self.cell.state,
            &self.cell.error_string,
            pool,
        )
        .await?;
        Ok(())
    }

    async fn propagate(&self, pool: &sqlx::PgPool) -> Result<(), Error> {
        let latest = colpipe_sql::selections::fetch_latest(self.collection_id, pool).await?;
        let is_last = latest.id == self.id;
        if let Some(parent_state) = map_child_state(self.cell.state, is_last) {
            let mut collection =
                crate::collection::Collection::load(self.collection_id, pool).await?;
            let message = (parent_state == EntityState::Failed)
                .then(|| format!("{}: {}", self.id, self.cell.error_string));
            crate::state::transition(&mut collection, parent_state, message.as_deref(), pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_initial_matches_only_the_fixed_init_user() {
        let mut selection = Selection {
            id: colpipe_models::Id::generate(),
            collection_id: colpipe_models::Id::generate(),
            catalog_id_at_creation: colpipe_models::Id::generate(),
            json_input: serde_json::json!({}),
            json_output: serde_json::json!({}),
            requesting_user: Selection::INITIAL_USER.to_string(),
            workdir_archive_blob_id: None,
            cell: StateCell::pending(),
        };
        assert!(selection.is_initial());

        selection.requesting_user = "alice".to_string();
        assert!(!selection.is_initial());
    }
}
