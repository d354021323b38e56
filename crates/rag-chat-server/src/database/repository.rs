use super::{DbPool, PassageRow};
use anyhow::Result;
use pgvector::Vector;
use tracing::debug;

/// Read-only access to the pre-built passage collection
pub struct Repository {
    pub pool: DbPool,
    schema: String,
    table: String,
}

impl Repository {
    pub fn new(pool: DbPool, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
            table: table.into(),
        }
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// True when the collection table exists in the configured schema
    pub async fn collection_exists(&self) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )"#,
        )
        .bind(&self.schema)
        .bind(&self.table)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(exists)
    }

    /// Cosine-similarity search, most similar first
    pub async fn search_passages(&self, query_embedding: Vector, limit: i64) -> Result<Vec<PassageRow>> {
        let sql = format!(
            r#"SELECT
                content,
                source,
                (1 - (embedding <=> $1))::float8 AS similarity
               FROM {}
               ORDER BY embedding <=> $1
               LIMIT $2"#,
            self.qualified_table()
        );

        let rows = sqlx::query_as::<_, PassageRow>(&sql)
            .bind(query_embedding)
            .bind(limit)
            .persistent(false)
            .fetch_all(self.pool.get_pool())
            .await?;

        debug!("Vector search returned {} rows", rows.len());
        Ok(rows)
    }
}

/// Quote a PostgreSQL identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
