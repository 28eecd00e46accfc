
use chrono::Utc;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, FromRow, Row, TypeInfo, ValueRef};
use std::collections::{BTreeMap, HashMap};

use crate::embeddings::Embedder;
use crate::ids::prefixed_id;
use crate::{Result, StoreError};

pub const DOCUMENT_ID_PREFIX: &str = "doc";
pub const POINT_ID_PREFIX: &str = "pt";
pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_CONTENT_LENGTH: usize = 5000;

pub type Metadata = serde_json::Map<String, Value>;

/// A named text document. `content` is always stored stripped and
/// `content_md5` always equals `md5(content.trim())`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub name: String,
    pub content: String,
    pub content_md5: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An embedding derived from a document's content at a given hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub point_id: String,
    pub document_id: String,
    pub content_md5: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// A point ranked by a similarity query.
///
/// Columns the engine returns beyond the point schema and the score (the `rank`
/// of the search statement, for instance) land in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointWithScore {
    #[serde(flatten)]
    pub point: Point,
    pub relevance_score: f32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: Option<String>,
    pub matches: Vec<PointWithScore>,
    pub documents: Vec<Document>,
    pub total_results: usize,
    /// Seconds
    pub execution_time: f64,
    pub relevance_score: Option<f32>,
    pub highlight: Option<HashMap<String, Vec<String>>>,
    pub facets: Option<HashMap<String, HashMap<String, i64>>>,
    pub suggestions: Option<Vec<String>>,
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl<T> Page<T> {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl Document {
    /// Canonical constructor: strips the content, hashes it and stamps both timestamps
    #[inline]
    pub fn from_content(
        name: impl Into<String>,
        content: &str,
        metadata: Option<Metadata>,
    ) -> Result<Self> {
        let now = Utc::now().timestamp();
        let content = content.trim().to_string();

        let document = Self {
            document_id: prefixed_id(DOCUMENT_ID_PREFIX),
            name: name.into(),
            content_md5: Self::hash_content(&content),
            content,
            metadata: metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        document.validate()?;

        Ok(document)
    }

    /// MD5 hex digest of the stripped content
    #[inline]
    pub fn hash_content(content: &str) -> String {
        hex::encode(Md5::digest(content.trim().as_bytes()))
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        let name_length = self.name.chars().count();
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "Document name cannot be empty".to_string(),
            ));
        }
        if name_length > MAX_NAME_LENGTH {
            return Err(StoreError::InvalidArgument(format!(
                "Document name is {} characters, the limit is {}",
                name_length, MAX_NAME_LENGTH
            )));
        }

        let content_length = self.content.trim().chars().count();
        if content_length == 0 {
            return Err(StoreError::InvalidArgument(format!(
                "Document '{}' has no content",
                self.name
            )));
        }
        if content_length > MAX_CONTENT_LENGTH {
            return Err(StoreError::InvalidArgument(format!(
                "Document '{}' content is {} characters, the limit is {}",
                self.name, content_length, MAX_CONTENT_LENGTH
            )));
        }

        Ok(())
    }

    /// Re-normalize content in place. The hash and `updated_at` only change
    /// when the stripped content hashes differently; returns whether it did.
    #[inline]
    pub fn strip(&mut self) -> bool {
        let trimmed = self.content.trim();
        if trimmed.len() != self.content.len() {
            self.content = trimmed.to_string();
        }

        let new_md5 = Self::hash_content(&self.content);
        if self.content_md5 == new_md5 {
            return false;
        }

        self.content_md5 = new_md5;
        self.updated_at = Utc::now().timestamp();
        true
    }

    /// Stripped copy, leaving `self` untouched
    #[inline]
    pub fn stripped(&self) -> Self {
        let mut copy = self.clone();
        copy.strip();
        copy
    }

    #[inline]
    pub fn to_document_cards(&self) -> Vec<String> {
        vec![self.content.trim().to_string()]
    }

    #[inline]
    pub fn to_query_cards(query: &str) -> Vec<String> {
        vec![query.trim().to_string()]
    }

    /// Derive points for the current content. Without an embedder the point is an
    /// unembedded placeholder.
    #[inline]
    pub async fn to_points(&mut self, embedder: Option<&Embedder>) -> Result<Vec<Point>> {
        self.strip();

        let embedding = match embedder {
            Some(embedder) => embedder
                .embed(&self.to_document_cards())
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    StoreError::Embedding(format!(
                        "No embedding returned for document {}",
                        self.document_id
                    ))
                })?,
            None => Vec::new(),
        };

        Ok(vec![Point::new(
            &self.document_id,
            &self.content_md5,
            embedding,
        )])
    }

    /// Derive points using an embedding computed elsewhere
    #[inline]
    pub fn to_points_with_embedding(&mut self, embedding: Vec<f32>) -> Vec<Point> {
        self.strip();
        vec![Point::new(&self.document_id, &self.content_md5, embedding)]
    }
}

impl Point {
    #[inline]
    pub fn new(document_id: &str, content_md5: &str, embedding: Vec<f32>) -> Self {
        Self {
            point_id: prefixed_id(POINT_ID_PREFIX),
            document_id: document_id.to_string(),
            content_md5: content_md5.to_string(),
            embedding,
        }
    }

    #[inline]
    pub fn is_embedded(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// A point reflects `document` iff it was embedded from the same content hash
    #[inline]
    pub fn is_current_for(&self, document: &Document) -> bool {
        self.document_id == document.document_id && self.content_md5 == document.content_md5
    }

    /// Embeddings are either empty or exactly `dimensions` long
    #[inline]
    pub fn validate(&self, dimensions: usize) -> Result<()> {
        if self.document_id.trim().is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "Point {} has no document_id",
                self.point_id
            )));
        }
        if self.is_embedded() && self.embedding.len() != dimensions {
            return Err(StoreError::InvalidArgument(format!(
                "Point {} embedding has {} dimensions, expected {}",
                self.point_id,
                self.embedding.len(),
                dimensions
            )));
        }
        if self.embedding.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidArgument(format!(
                "Point {} embedding contains non-finite values",
                self.point_id
            )));
        }
        Ok(())
    }
}

/// Encode a float vector as little-endian bytes for BLOB storage
#[inline]
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]
#[inline]
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

impl<'r> FromRow<'r, SqliteRow> for Document {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let raw_metadata: Option<String> = row.try_get("metadata")?;
        let metadata = match raw_metadata.as_deref() {
            None | Some("") => Metadata::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: "metadata".to_string(),
                source: Box::new(e),
            })?,
        };

        Ok(Self {
            document_id: row.try_get("document_id")?,
            name: row.try_get("name")?,
            content: row.try_get("content")?,
            content_md5: row.try_get("content_md5")?,
            metadata,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl<'r> FromRow<'r, SqliteRow> for Point {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        // The embedding column is only projected on request
        let embedding = match row.try_get::<Option<Vec<u8>>, _>("embedding") {
            Ok(blob) => blob.as_deref().map(blob_to_vec).unwrap_or_default(),
            Err(sqlx::Error::ColumnNotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            point_id: row.try_get("point_id")?,
            document_id: row.try_get("document_id")?,
            content_md5: row.try_get("content_md5")?,
            embedding,
        })
    }
}

const SCORED_POINT_COLUMNS: [&str; 5] = [
    "point_id",
    "document_id",
    "content_md5",
    "embedding",
    "relevance_score",
];

impl<'r> FromRow<'r, SqliteRow> for PointWithScore {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        let point = Point::from_row(row)?;
        let relevance_score: f64 = row.try_get("relevance_score")?;

        let mut extra = BTreeMap::new();
        for column in row.columns() {
            if SCORED_POINT_COLUMNS.contains(&column.name()) {
                continue;
            }
            extra.insert(
                column.name().to_string(),
                decode_dynamic(row, column.ordinal())?,
            );
        }

        Ok(Self {
            point,
            relevance_score: relevance_score as f32,
            extra,
        })
    }
}

/// Decode a column of unknown type by its runtime storage class
fn decode_dynamic(row: &SqliteRow, index: usize) -> std::result::Result<Value, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
        "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(index)?)
            .map_or(Value::Null, Value::Number),
        "BLOB" => Value::String(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
        _ => Value::String(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
