
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::marker::PhantomData;
use tracing::debug;

use super::models::{Document, Metadata, Page, Point, vec_to_blob};
use crate::config::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::{Result, StoreError};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 1000;

/// A persisted record kind: its table, its fixed column set and how to bind a row.
///
/// Table and column names are the only text ever interpolated into statements;
/// every value goes through a bind parameter.
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
    /// Human-readable kind used in errors and logs
    const KIND: &'static str;
    const TABLE_NAME: &'static str;
    const ID_COLUMN: &'static str;

    type Filter: Filter;

    /// Idempotent DDL
    fn schema() -> &'static [&'static str];

    /// Projected columns; the embedding column is only included on request
    fn columns(with_embedding: bool) -> &'static [&'static str];

    fn id(&self) -> &str;

    /// Bring the entity into its stored form before it is validated and written
    fn normalize(&mut self) {}

    fn validate(&self, dimensions: usize) -> Result<()>;

    /// Push the bound values of an INSERT, in `columns(true)` order
    fn push_values(&self, builder: &mut QueryBuilder<'_, Sqlite>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
}

impl Comparison {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Gt => " > ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub column: &'static str,
    pub comparison: Comparison,
    pub value: String,
}

impl Condition {
    #[inline]
    pub fn eq(column: &'static str, value: impl Into<String>) -> Self {
        Self {
            column,
            comparison: Comparison::Eq,
            value: value.into(),
        }
    }

    #[inline]
    pub fn gt(column: &'static str, value: impl Into<String>) -> Self {
        Self {
            column,
            comparison: Comparison::Gt,
            value: value.into(),
        }
    }
}

/// Conjunctive row filter for [`QuerySet::list`] and [`QuerySet::count`]
pub trait Filter: Send + Sync {
    fn conditions(&self) -> Vec<Condition>;
}

/// Documents have no filterable fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentFilter;

impl Filter for DocumentFilter {
    #[inline]
    fn conditions(&self) -> Vec<Condition> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointFilter {
    pub document_id: Option<String>,
    pub content_md5: Option<String>,
}

impl PointFilter {
    #[inline]
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self {
            document_id: Some(document_id.into()),
            content_md5: None,
        }
    }

    #[inline]
    pub fn with_content_md5(mut self, content_md5: impl Into<String>) -> Self {
        self.content_md5 = Some(content_md5.into());
        self
    }
}

impl Filter for PointFilter {
    #[inline]
    fn conditions(&self) -> Vec<Condition> {
        let mut conditions = Vec::new();
        if let Some(document_id) = &self.document_id {
            conditions.push(Condition::eq("document_id", document_id.as_str()));
        }
        if let Some(content_md5) = &self.content_md5 {
            conditions.push(Condition::eq("content_md5", content_md5.as_str()));
        }
        conditions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    /// Exclusive cursor: only ids strictly greater are returned
    pub after: Option<String>,
    pub limit: usize,
    pub with_embedding: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            after: None,
            limit: DEFAULT_LIST_LIMIT,
            with_embedding: false,
        }
    }
}

impl ListParams {
    #[inline]
    pub fn after(mut self, after: Option<String>) -> Self {
        self.after = after;
        self
    }

    #[inline]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[inline]
    pub fn with_embedding(mut self, with_embedding: bool) -> Self {
        self.with_embedding = with_embedding;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub name: Option<String>,
    pub content: Option<String>,
    /// Merged key by key into the stored metadata
    pub metadata: Option<Metadata>,
}

impl DocumentUpdate {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.content.is_none() && self.metadata.is_none()
    }
}

/// Accepted for symmetry with documents; points can never be updated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointUpdate {
    pub document_id: Option<String>,
    pub content_md5: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// CRUD and cursor pagination over one entity table.
///
/// A query set holds no connection and no state besides the embedding
/// dimensionality; every call runs on the connection the caller passes in.
#[derive(Debug)]
pub struct QuerySet<E> {
    dimensions: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for QuerySet<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for QuerySet<E> {}

impl<E: Entity> Default for QuerySet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> QuerySet<E> {
    #[inline]
    pub fn new() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            _entity: PhantomData,
        }
    }

    #[inline]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Create the backing table if it does not exist yet
    #[inline]
    pub async fn touch(&self, conn: &mut SqliteConnection) -> Result<()> {
        for statement in E::schema() {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        debug!("Ensured table {} exists", E::TABLE_NAME);
        Ok(())
    }

    /// Insert a new row, returning the entity as stored
    #[inline]
    pub async fn create(&self, conn: &mut SqliteConnection, mut entity: E) -> Result<E> {
        entity.normalize();
        entity.validate(self.dimensions)?;

        let mut builder = QueryBuilder::<Sqlite>::new("INSERT INTO ");
        builder
            .push(E::TABLE_NAME)
            .push(" (")
            .push(E::columns(true).join(", "))
            .push(") VALUES (");
        entity.push_values(&mut builder)?;
        builder.push(")");

        debug!(sql = builder.sql(), "Creating {} {}", E::KIND, entity.id());

        builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| write_error::<E>(e, entity.id()))?;

        Ok(entity)
    }

    /// Fetch one row by primary key
    #[inline]
    pub async fn retrieve(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        with_embedding: bool,
    ) -> Result<E> {
        let mut builder = select_from::<E>(with_embedding);
        builder
            .push(" WHERE ")
            .push(E::ID_COLUMN)
            .push(" = ")
            .push_bind(id.to_string());

        debug!(sql = builder.sql(), "Retrieving {} {}", E::KIND, id);

        builder
            .build_query_as::<E>()
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| not_found::<E>(id))
    }

    /// Delete one row by primary key; a missing row is `NotFound`
    #[inline]
    pub async fn remove(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM ");
        builder
            .push(E::TABLE_NAME)
            .push(" WHERE ")
            .push(E::ID_COLUMN)
            .push(" = ")
            .push_bind(id.to_string());

        debug!(sql = builder.sql(), "Removing {} {}", E::KIND, id);

        let result = builder.build().execute(&mut *conn).await?;
        if result.rows_affected() == 0 {
            return Err(not_found::<E>(id));
        }
        Ok(())
    }

    /// One page in ascending id order, strictly after `params.after`.
    ///
    /// Fetches `limit + 1` rows; the extra row only decides `has_more`.
    #[inline]
    pub async fn list(
        &self,
        conn: &mut SqliteConnection,
        filter: &E::Filter,
        params: &ListParams,
    ) -> Result<Page<E>> {
        if !(1..=MAX_LIST_LIMIT).contains(&params.limit) {
            return Err(StoreError::InvalidArgument(format!(
                "List limit must be between 1 and {}, got {}",
                MAX_LIST_LIMIT, params.limit
            )));
        }

        let mut conditions = filter.conditions();
        if let Some(after) = &params.after {
            conditions.push(Condition::gt(E::ID_COLUMN, after.as_str()));
        }

        let mut builder = select_from::<E>(params.with_embedding);
        push_conditions(&mut builder, conditions);
        builder
            .push(" ORDER BY ")
            .push(E::ID_COLUMN)
            .push(" ASC LIMIT ")
            .push_bind(i64::try_from(params.limit + 1).unwrap_or(i64::MAX));

        debug!(sql = builder.sql(), "Listing {}s", E::KIND);

        let mut data = builder
            .build_query_as::<E>()
            .fetch_all(&mut *conn)
            .await?;

        let has_more = data.len() > params.limit;
        data.truncate(params.limit);
        let last_id = data.last().map(|entity| entity.id().to_string());

        Ok(Page {
            data,
            last_id,
            has_more,
        })
    }

    /// Number of matching rows, ignoring pagination
    #[inline]
    pub async fn count(&self, conn: &mut SqliteConnection, filter: &E::Filter) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM ");
        builder.push(E::TABLE_NAME);
        push_conditions(&mut builder, filter.conditions());

        debug!(sql = builder.sql(), "Counting {}s", E::KIND);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }
}

impl QuerySet<Document> {
    /// Replace `name`/`content` when given and merge `metadata` key by key.
    ///
    /// Content goes through [`Document::strip`], so `content_md5` and
    /// `updated_at` only move when the stripped content actually changed.
    #[inline]
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<Document> {
        let mut document = self.retrieve(conn, id, false).await?;
        if update.is_empty() {
            return Ok(document);
        }

        let DocumentUpdate {
            name,
            content,
            metadata,
        } = update;

        if let Some(name) = name.clone() {
            document.name = name;
        }
        let content_changed = match content {
            Some(content) => {
                document.content = content;
                document.strip()
            }
            None => false,
        };
        if let Some(metadata) = &metadata {
            for (key, value) in metadata {
                document.metadata.insert(key.clone(), value.clone());
            }
        }
        Entity::validate(&document, self.dimensions)?;

        if name.is_none() && !content_changed && metadata.is_none() {
            return Ok(document);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE documents SET ");
        {
            let mut assignments = builder.separated(", ");
            if name.is_some() {
                assignments.push("name = ");
                assignments.push_bind_unseparated(document.name.clone());
            }
            if content_changed {
                assignments.push("content = ");
                assignments.push_bind_unseparated(document.content.clone());
                assignments.push("content_md5 = ");
                assignments.push_bind_unseparated(document.content_md5.clone());
                assignments.push("updated_at = ");
                assignments.push_bind_unseparated(document.updated_at);
            }
            if metadata.is_some() {
                assignments.push("metadata = ");
                assignments.push_bind_unseparated(serde_json::to_string(&document.metadata)?);
            }
        }
        builder
            .push(" WHERE document_id = ")
            .push_bind(id.to_string());

        debug!(sql = builder.sql(), "Updating document {}", id);

        let result = builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| write_error::<Document>(e, id))?;
        if result.rows_affected() == 0 {
            return Err(not_found::<Document>(id));
        }

        Ok(document)
    }
}

impl QuerySet<Point> {
    /// Points are immutable; re-embedding creates a new point instead
    #[inline]
    pub async fn update(
        &self,
        _conn: &mut SqliteConnection,
        id: &str,
        _update: PointUpdate,
    ) -> Result<Point> {
        debug!("Rejected update of point {}", id);
        Err(StoreError::NotSupported {
            entity: Point::KIND,
            operation: "update",
        })
    }
}

impl Document {
    /// Query set for the `documents` table
    #[inline]
    pub fn objects() -> QuerySet<Document> {
        QuerySet::new()
    }
}

impl Point {
    /// Query set for the `points` table with the default dimensionality
    #[inline]
    pub fn objects() -> QuerySet<Point> {
        QuerySet::new()
    }
}

const DOCUMENT_COLUMNS: [&str; 7] = [
    "document_id",
    "name",
    "content",
    "content_md5",
    "metadata",
    "created_at",
    "updated_at",
];

impl Entity for Document {
    const KIND: &'static str = "document";
    const TABLE_NAME: &'static str = "documents";
    const ID_COLUMN: &'static str = "document_id";

    type Filter = DocumentFilter;

    fn schema() -> &'static [&'static str] {
        &[r#"
            CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                content TEXT NOT NULL,
                content_md5 TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#]
    }

    fn columns(_with_embedding: bool) -> &'static [&'static str] {
        &DOCUMENT_COLUMNS
    }

    fn id(&self) -> &str {
        &self.document_id
    }

    fn normalize(&mut self) {
        self.strip();
    }

    fn validate(&self, _dimensions: usize) -> Result<()> {
        Document::validate(self)?;
        if self.content_md5 != Document::hash_content(&self.content) {
            return Err(StoreError::InvalidArgument(format!(
                "Document {} content_md5 does not match its content",
                self.document_id
            )));
        }
        Ok(())
    }

    fn push_values(&self, builder: &mut QueryBuilder<'_, Sqlite>) -> Result<()> {
        let metadata = serde_json::to_string(&self.metadata)?;
        let mut values = builder.separated(", ");
        values.push_bind(self.document_id.clone());
        values.push_bind(self.name.clone());
        values.push_bind(self.content.clone());
        values.push_bind(self.content_md5.clone());
        values.push_bind(metadata);
        values.push_bind(self.created_at);
        values.push_bind(self.updated_at);
        Ok(())
    }
}

const POINT_COLUMNS: [&str; 4] = ["point_id", "document_id", "content_md5", "embedding"];

impl Entity for Point {
    const KIND: &'static str = "point";
    const TABLE_NAME: &'static str = "points";
    const ID_COLUMN: &'static str = "point_id";

    type Filter = PointFilter;

    fn schema() -> &'static [&'static str] {
        &[
            r#"
            CREATE TABLE IF NOT EXISTS points (
                point_id TEXT PRIMARY KEY NOT NULL,
                document_id TEXT NOT NULL,
                content_md5 TEXT NOT NULL,
                embedding BLOB NOT NULL DEFAULT X''
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_points_document_id ON points(document_id)",
        ]
    }

    fn columns(with_embedding: bool) -> &'static [&'static str] {
        if with_embedding {
            &POINT_COLUMNS
        } else {
            &POINT_COLUMNS[..3]
        }
    }

    fn id(&self) -> &str {
        &self.point_id
    }

    fn validate(&self, dimensions: usize) -> Result<()> {
        Point::validate(self, dimensions)
    }

    fn push_values(&self, builder: &mut QueryBuilder<'_, Sqlite>) -> Result<()> {
        let mut values = builder.separated(", ");
        values.push_bind(self.point_id.clone());
        values.push_bind(self.document_id.clone());
        values.push_bind(self.content_md5.clone());
        values.push_bind(vec_to_blob(&self.embedding));
        Ok(())
    }
}

fn select_from<'args, E: Entity>(with_embedding: bool) -> QueryBuilder<'args, Sqlite> {
    let mut builder = QueryBuilder::new("SELECT ");
    builder
        .push(E::columns(with_embedding).join(", "))
        .push(" FROM ")
        .push(E::TABLE_NAME);
    builder
}

fn push_conditions(builder: &mut QueryBuilder<'_, Sqlite>, conditions: Vec<Condition>) {
    for (index, condition) in conditions.into_iter().enumerate() {
        builder
            .push(if index == 0 { " WHERE " } else { " AND " })
            .push(condition.column)
            .push(condition.comparison.as_sql())
            .push_bind(condition.value);
    }
}

fn not_found<E: Entity>(id: &str) -> StoreError {
    StoreError::NotFound {
        entity: E::KIND,
        id: id.to_string(),
    }
}

fn write_error<E: Entity>(error: sqlx::Error, id: &str) -> StoreError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => StoreError::Conflict {
            entity: E::KIND,
            message: format!("{} {}: {}", E::KIND, id, db_error.message()),
        },
        _ => StoreError::Database(error),
    }
}
