use serde::Serialize;
use serde_json::json;
use sqlx::{self, postgres::PgRow, FromRow, PgPool};

use crate::database::manager::DatabaseError;
use crate::database::models::SoftDelete;
use crate::database::query_builder::QueryBuilder;
use crate::filter::FilterData;

/// Read and retire access to one soft-deletable table.
///
/// Every read goes through `QueryBuilder`, which hides rows with `deleted_at` set.
pub struct Repository<T> {
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin + Serialize + SoftDelete,
{
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn select_any(&self, filter_data: FilterData) -> Result<Vec<T>, DatabaseError> {
        QueryBuilder::<T>::new(T::TABLE)?
            .filter(filter_data)?
            .select_all(&self.pool)
            .await
    }

    pub async fn select_one(&self, filter_data: FilterData) -> Result<Option<T>, DatabaseError> {
        QueryBuilder::<T>::new(T::TABLE)?
            .filter(filter_data)?
            .select_optional(&self.pool)
            .await
    }

    pub async fn select_404(&self, filter_data: FilterData) -> Result<T, DatabaseError> {
        self.select_one(filter_data)
            .await?
            .ok_or_else(|| DatabaseError::NotFound("Record not found".to_string()))
    }

    pub async fn select_id(&self, id: i64) -> Result<T, DatabaseError> {
        self.select_404(FilterData {
            where_clause: Some(json!({ "id": id })),
            ..Default::default()
        })
        .await
    }

    /// Stamp `deleted_at`. Rows that are missing or already retired are NotFound.
    pub async fn soft_delete(&self, id: i64) -> Result<(), DatabaseError> {
        let sql = format!(
            "UPDATE \"{}\" SET \"deleted_at\" = NOW(), \"updated_at\" = NOW() WHERE \"id\" = $1 AND \"deleted_at\" IS NULL",
            T::TABLE
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("{} {} not found", T::TABLE, id)));
        }
        Ok(())
    }
}
