//! Content-addressed byte-blob persistence keyed by surrogate id.

use colpipe_models::Id;

use crate::error::Error;

#[derive(Clone)]
pub struct BlobStore {
    pool: sqlx::PgPool,
}

impl BlobStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        BlobStore { pool }
    }

    #[tracing::instrument(skip(self, data))]
    pub async fn put(&self, data: &[u8]) -> Result<Id, Error> {
        Ok(colpipe_sql::blobs::insert(data, &self.pool).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: Id) -> Result<Vec<u8>, Error> {
        Ok(colpipe_sql::blobs::fetch(id, &self.pool).await?)
    }
}
