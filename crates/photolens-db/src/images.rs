//! pgvector-backed whole-image index.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument};

use photolens_core::{Error, ImageEmbedding, ImageHit, ImageIndex, Result};

/// PostgreSQL implementation of [`ImageIndex`].
pub struct PgImageIndex {
    pool: Pool<Postgres>,
}

impl PgImageIndex {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageIndex for PgImageIndex {
    async fn get(&self, photo_uid: &str) -> Result<Option<ImageEmbedding>> {
        let row = sqlx::query(
            "SELECT photo_uid, vector, model, dim, created_at
             FROM image_embedding
             WHERE photo_uid = $1",
        )
        .bind(photo_uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let vector: Vector = row.get("vector");
            ImageEmbedding {
                photo_uid: row.get("photo_uid"),
                vector: vector.to_vec(),
                model: row.get("model"),
                dim: row.get::<i32, _>("dim") as usize,
                created_at: row.get("created_at"),
            }
        }))
    }

    async fn has(&self, photo_uid: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM image_embedding WHERE photo_uid = $1)")
                .bind(photo_uid)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_embedding")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(n as usize)
    }

    async fn list_photo_uids(&self) -> Result<Vec<String>> {
        let uids: Vec<String> =
            sqlx::query_scalar("SELECT photo_uid FROM image_embedding ORDER BY photo_uid")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(uids)
    }

    async fn save(&self, embedding: ImageEmbedding) -> Result<()> {
        if embedding.vector.is_empty() {
            return Err(Error::InvalidInput(format!(
                "empty image embedding for {}",
                embedding.photo_uid
            )));
        }

        sqlx::query(
            "INSERT INTO image_embedding (photo_uid, vector, model, dim, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (photo_uid) DO UPDATE
             SET vector = EXCLUDED.vector,
                 model = EXCLUDED.model,
                 dim = EXCLUDED.dim,
                 created_at = EXCLUDED.created_at",
        )
        .bind(&embedding.photo_uid)
        .bind(Vector::from(embedding.vector))
        .bind(&embedding.model)
        .bind(embedding.dim as i32)
        .bind(embedding.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    #[instrument(skip(self, vector), fields(subsystem = "db", component = "pgvector", op = "image_neighbors"))]
    async fn find_similar_with_distance(
        &self,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<ImageHit>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let rows = sqlx::query(
            "SELECT photo_uid, (vector <=> $1) AS distance
             FROM image_embedding
             WHERE (vector <=> $1) <= $2
             ORDER BY vector <=> $1
             LIMIT $3",
        )
        .bind(Vector::from(vector.to_vec()))
        .bind(max_distance as f64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let hits: Vec<ImageHit> = rows
            .into_iter()
            .map(|row| ImageHit {
                photo_uid: row.get("photo_uid"),
                distance: row.get::<f64, _>("distance") as f32,
            })
            .collect();

        debug!(hit_count = hits.len(), "Image neighbour query complete");
        Ok(hits)
    }
}
