//! Replayable bundler: packages a terminated Selection's
//! frozen Catalog, its Runner's archived workdir and a templated
//! README into one self-contained archive. All paths inside are
//! relative, so the bundle stays valid after being moved or extracted
//! elsewhere.

use std::path::Path;

use chrono::Utc;

use crate::archive;
use crate::blob_store::BlobStore;
use crate::catalog::Catalog;
use crate::collection::Collection;
use crate::error::Error;
use crate::runner::Runner;
use crate::selection::Selection;

/// Builds the replayable bundle for `collection_name`'s latest
/// Selection. Returns the compressed archive bytes and its basename
/// (e.g. `replayable.col1.20260726-091500`), matching
/// `replayable.<collection>.<timestamp>/` as the archive's sole
/// top-level entry.
pub async fn build(
    collection_name: &str,
    workdir_root: &Path,
    blobs: &BlobStore,
    pool: &sqlx::PgPool,
) -> Result<(Vec<u8>, String), Error> {
    let collection = Collection::load_by_name(collection_name, pool).await?;
    let selection = Selection::load_latest(collection.id, pool).await?;
    let runner = Runner::load_by_selection(selection.id, pool)
        .await?
        .ok_or_else(|| {
            Error::IoFailure(format!(
                "selection {} has not been run yet, nothing to replay",
                selection.id
            ))
        })?;
    let workdir_archive_id = runner.workdir_archive_blob_id.ok_or_else(|| {
        Error::IoFailure(format!(
            "runner {} has no archived workdir (not yet terminal?)",
            runner.id
        ))
    })?;
    let catalog = Catalog::fetch(selection.catalog_id_at_creation, pool).await?;

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    let bundle_basename = format!("replayable.{collection_name}.{timestamp}");
    let workdir_basename = format!("{collection_name}.{timestamp}");
    let catalog_basename = catalog.dir_basename();

    let staging = tempfile::tempdir_in(workdir_root)?;
    let bundle_dir = staging.path().join(&bundle_basename);
    std::fs::create_dir_all(&bundle_dir)?;

    let catalog_dir = bundle_dir.join(&catalog_basename);
    std::fs::create_dir_all(&catalog_dir)?;
    catalog.extract_to(&catalog_dir, blobs).await?;

    let workdir_dir = bundle_dir.join(&workdir_basename);
    std::fs::create_dir_all(&workdir_dir)?;
    let archive_bytes = blobs.get(workdir_archive_id).await?;
    archive::extract_to(&archive_bytes, &workdir_dir)?;

    let readme = render_readme(&catalog_basename, &workdir_basename);
    std::fs::write(bundle_dir.join("README.md"), readme)?;

    let bytes = archive::compress_dir_as(&bundle_dir, &bundle_basename)?;
    Ok((bytes, bundle_basename))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaSource;
    use crate::facade::Facade;
    use crate::test_support;
    use colpipe_models::EntityState;

    #[test]
    fn readme_references_both_relative_directories() {
        let readme = render_readme("catalog-default", "col1.20260726-091500");
        assert!(readme.contains("catalog-default/"));
        assert!(readme.contains("col1.20260726-091500/"));
        assert!(readme.contains("CollectionEdit.Launch.sh"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn build_produces_a_self_contained_relative_bundle() {
        let pool = test_support::pool().await;
        let blobs = BlobStore::new(pool.clone());
        let catalog_name = test_support::unique_name("cat");
        let collection_name = test_support::unique_name("col");
        let workdir_root = tempfile::tempdir().unwrap();
        let engines_dir = test_support::passthrough_engines_dir();

        let facade = Facade::new(
            pool.clone(),
            engines_dir.path().to_path_buf(),
            workdir_root.path().to_path_buf(),
            true, // legacy discipline
            SchemaSource::StoredArchive,
        );

        facade
            .new_catalog(&catalog_name, &test_support::tiny_catalog_archive())
            .await
            .unwrap();
        facade
            .new_collection(&collection_name, &catalog_name)
            .await
            .unwrap();
        facade
            .edit_save(
                &collection_name,
                b"{}",
                serde_json::json!({}),
                serde_json::json!({"n": 1}),
                "erin",
            )
            .await
            .unwrap();

        // edit_save launches the run in the background; poll briefly for
        // its terminal state rather than assuming a fixed delay.
        let collection = wait_for_terminal(&collection_name, &pool).await;
        assert_eq!(collection.cell.state, EntityState::Completed);

        let (bytes, basename) = build(&collection_name, workdir_root.path(), &blobs, &pool)
            .await
            .unwrap();
        assert!(basename.starts_with(&format!("replayable.{collection_name}.")));

        let extract_dir = tempfile::tempdir().unwrap();
        archive::extract_to(&bytes, extract_dir.path()).unwrap();
        let bundle_dir = extract_dir.path().join(&basename);
        assert!(bundle_dir.join(format!("catalog-{catalog_name}")).join("Schema.json").is_file());
        assert!(bundle_dir.join("README.md").is_file());
        let entries: Vec<_> = std::fs::read_dir(&bundle_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(entries
            .iter()
            .any(|e| e.starts_with(&format!("{collection_name}."))));
    }

    async fn wait_for_terminal(
        collection_name: &str,
        pool: &sqlx::PgPool,
    ) -> crate::collection::Collection {
        for _ in 0..100 {
            let collection = crate::collection::Collection::load_by_name(collection_name, pool)
                .await
                .unwrap();
            if collection.cell.state.is_terminal() {
                return collection;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("collection {collection_name} never reached a terminal state");
    }
}

fn render_readme(catalog_dir: &str, workdir_dir: &str) -> String {
    format!(
        "# Replayable bundle\n\
         \n\
         This archive is a self-contained replay of one Collection edit: a frozen\n\
         copy of the Catalog used (`{catalog_dir}/`) and the exact workdir tree the\n\
         engines ran against (`{workdir_dir}/`).\n\
         \n\
         To re-run the pipeline against the captured workdir, from this directory:\n\
         \n\
         ```sh\n\
         {catalog_dir}/bin/internal/bash -c \"{catalog_dir}/bin/CollectionEdit.Launch.sh {workdir_dir}\"\n\
         ```\n\
         \n\
         All paths above are relative to this README, so the bundle stays valid\n\
         after being moved or extracted elsewhere.\n"
    )
}
