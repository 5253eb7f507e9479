//! Versioned bundle of engine binaries plus `Schema.json`, frozen at
//! Selection creation and extracted into per-Runner working directories.

use std::path::Path;

use colpipe_models::{validate_dns_label, Id};

use crate::archive;
use crate::blob_store::BlobStore;
use crate::error::Error;

pub struct Catalog {
    pub id: Id,
    pub name: String,
    pub archive_blob_id: Id,
    pub deprecated: bool,
}

/// Boot-time choice between reading `Schema.json` from a configured
/// filesystem directory (a development aid) or from the stored archive.
/// The two modes are never mixed within one process.
#[derive(Clone)]
pub enum SchemaSource {
    StoredArchive,
    HotSync(std::path::PathBuf),
}

impl Catalog {
    /// Validates `name`, requires the archive to already contain
    /// `Schema.json` (YAML pre-arrangement is out of scope: an archive
    /// with only `Schema.yaml` is rejected), stores the archive as a
    /// Blob and persists the Catalog row.
    #[tracing::instrument(skip(archive_bytes, blobs, pool))]
    pub async fn new(
        name: &str,
        archive_bytes: &[u8],
        blobs: &BlobStore,
        pool: &sqlx::PgPool,
    ) -> Result<Catalog, Error> {
        validate_dns_label(name)?;

        if colpipe_sql::catalogs::fetch_by_name(name, pool).await.is_ok() {
            return Err(Error::DuplicateName {
                kind: "catalog",
                name: name.to_string(),
            });
        }

        if !archive::contains_file_named(archive_bytes, "Schema.json")? {
            return Err(Error::IoFailure(format!(
                "catalog {name:?} archive does not contain Schema.json (Schema.yaml-only uploads are not supported)"
            )));
        }

        let archive_blob_id = blobs.put(archive_bytes).await?;
        let id = colpipe_sql::catalogs::insert(name, archive_blob_id, pool).await?;

        Ok(Catalog {
            id,
            name: name.to_string(),
            archive_blob_id,
            deprecated: false,
        })
    }

    pub async fn fetch_by_name(name: &str, pool: &sqlx::PgPool) -> Result<Catalog, Error> {
        let row = colpipe_sql::catalogs::fetch_by_name(name, pool)
            .await
            .map_err(|_| Error::UnknownCatalog(name.to_string()))?;
        Ok(Catalog {
            id: row.id,
            name: row.name,
            archive_blob_id: row.archive_blob_id,
            deprecated: row.deprecated,
        })
    }

    pub async fn fetch(id: Id, pool: &sqlx::PgPool) -> Result<Catalog, Error> {
        let row = colpipe_sql::catalogs::fetch(id, pool).await?;
        Ok(Catalog {
            id: row.id,
            name: row.name,
            archive_blob_id: row.archive_blob_id,
            deprecated: row.deprecated,
        })
    }

    /// Extracts the archive's regular files, directories and relative
    /// symlinks into `dir`, which must already exist.
    pub async fn extract_to(
        &self,
        dir: &Path,
        blobs: &BlobStore,
    ) -> Result<(), Error> {
        let bytes = blobs.get(self.archive_blob_id).await?;
        archive::extract_to(&bytes, dir)
    }

    /// Returns a freshly extracted copy of `Schema.json`, or the
    /// hot-sync directory's copy when that mode is configured.
    pub async fn schema_json(
        &self,
        blobs: &BlobStore,
        source: &SchemaSource,
    ) -> Result<Vec<u8>, Error> {
        match source {
            SchemaSource::HotSync(dir) => Ok(std::fs::read(dir.join("Schema.json"))?),
            SchemaSource::StoredArchive => {
                let tmp = tempfile::tempdir()?;
                self.extract_to(tmp.path(), blobs).await?;
                Ok(std::fs::read(tmp.path().join("Schema.json"))?)
            }
        }
    }

    pub fn dir_basename(&self) -> String {
        format!("catalog-{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_basename_is_prefixed() {
        let catalog = Catalog {
            id: Id::generate(),
            name: "default".to_string(),
            archive_blob_id: Id::generate(),
            deprecated: false,
        };
        assert_eq!(catalog.dir_basename(), "catalog-default");
    }
}
