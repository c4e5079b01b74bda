//! pgvector-backed face index.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, instrument};

use photolens_core::{
    Error, FaceHit, FaceIndex, FaceMarkerUpdate, PixelBox, Result, StoredFace,
};

const FACE_COLUMNS: &str = "photo_uid, face_index, vector, bbox_x1, bbox_y1, bbox_x2, bbox_y2,
    det_score, marker_uid, subject_uid, subject_name, file_uid,
    photo_width, photo_height, orientation";

/// PostgreSQL implementation of [`FaceIndex`].
pub struct PgFaceIndex {
    pool: Pool<Postgres>,
}

impl PgFaceIndex {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn face_from_row(row: &PgRow) -> StoredFace {
    let vector: Option<Vector> = row.get("vector");
    StoredFace {
        photo_uid: row.get("photo_uid"),
        face_index: row.get::<i32, _>("face_index") as u32,
        vector: vector.map(|v| v.to_vec()).unwrap_or_default(),
        bbox: PixelBox::new(
            row.get("bbox_x1"),
            row.get("bbox_y1"),
            row.get("bbox_x2"),
            row.get("bbox_y2"),
        ),
        det_score: row.get("det_score"),
        marker_uid: row.get("marker_uid"),
        subject_uid: row.get("subject_uid"),
        subject_name: row.get("subject_name"),
        file_uid: row.get("file_uid"),
        photo_width: row.get::<i32, _>("photo_width") as u32,
        photo_height: row.get::<i32, _>("photo_height") as u32,
        orientation: row.get::<i16, _>("orientation") as u8,
    }
}

#[async_trait]
impl FaceIndex for PgFaceIndex {
    async fn get_faces(&self, photo_uid: &str) -> Result<Vec<StoredFace>> {
        let query = format!(
            "SELECT {} FROM face_embedding WHERE photo_uid = $1 ORDER BY face_index",
            FACE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(photo_uid)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(face_from_row).collect())
    }

    async fn has(&self, photo_uid: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM face_photo WHERE photo_uid = $1)")
                .bind(photo_uid)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM face_embedding")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(n as usize)
    }

    async fn faces_for_subject(&self, name: &str) -> Result<Vec<StoredFace>> {
        let query = format!(
            "SELECT {} FROM face_embedding
             WHERE lower(subject_name) = lower($1)
             ORDER BY photo_uid, face_index",
            FACE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows.iter().map(face_from_row).collect())
    }

    async fn save_faces(&self, photo_uid: &str, faces: Vec<StoredFace>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO face_photo (photo_uid, face_count, processed_at)
             VALUES ($1, $2, now())
             ON CONFLICT (photo_uid) DO UPDATE
             SET face_count = EXCLUDED.face_count, processed_at = EXCLUDED.processed_at",
        )
        .bind(photo_uid)
        .bind(faces.len() as i32)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM face_embedding WHERE photo_uid = $1")
            .bind(photo_uid)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for face in faces {
            let vector = (!face.vector.is_empty()).then(|| Vector::from(face.vector));
            sqlx::query(
                "INSERT INTO face_embedding (
                    photo_uid, face_index, vector, bbox_x1, bbox_y1, bbox_x2, bbox_y2,
                    det_score, marker_uid, subject_uid, subject_name, file_uid,
                    photo_width, photo_height, orientation
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(photo_uid)
            .bind(face.face_index as i32)
            .bind(vector)
            .bind(face.bbox.x1)
            .bind(face.bbox.y1)
            .bind(face.bbox.x2)
            .bind(face.bbox.y2)
            .bind(face.det_score)
            .bind(&face.marker_uid)
            .bind(&face.subject_uid)
            .bind(&face.subject_name)
            .bind(&face.file_uid)
            .bind(face.photo_width as i32)
            .bind(face.photo_height as i32)
            .bind(face.orientation as i16)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn update_face_marker(
        &self,
        photo_uid: &str,
        face_index: u32,
        update: FaceMarkerUpdate,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE face_embedding
             SET marker_uid = $3,
                 subject_uid = $4,
                 subject_name = $5,
                 file_uid = COALESCE($6, file_uid)
             WHERE photo_uid = $1 AND face_index = $2",
        )
        .bind(photo_uid)
        .bind(face_index as i32)
        .bind(&update.marker_uid)
        .bind(&update.subject_uid)
        .bind(&update.subject_name)
        .bind(update.file_uid.as_deref())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "face {} of photo {}",
                face_index, photo_uid
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, vector), fields(subsystem = "db", component = "pgvector", op = "face_neighbors"))]
    async fn find_similar_with_distance(
        &self,
        vector: &[f32],
        limit: usize,
        max_distance: f32,
    ) -> Result<Vec<FaceHit>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let query = format!(
            "SELECT {}, (vector <=> $1) AS distance
             FROM face_embedding
             WHERE vector IS NOT NULL AND (vector <=> $1) <= $2
             ORDER BY vector <=> $1
             LIMIT $3",
            FACE_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(Vector::from(vector.to_vec()))
            .bind(max_distance as f64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let hits: Vec<FaceHit> = rows
            .iter()
            .map(|row| FaceHit {
                face: face_from_row(row),
                distance: row.get::<f64, _>("distance") as f32,
            })
            .collect();

        debug!(hit_count = hits.len(), "Face neighbour query complete");
        Ok(hits)
    }
}
