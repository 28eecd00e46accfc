
use futures::TryStreamExt;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;
use tracing::{debug, info};

use super::models::{Document, Point, PointWithScore, SearchResult, blob_to_vec};
use super::queries::Entity;
use crate::embeddings::Embedder;
use crate::{Result, StoreError};

pub const DEFAULT_TOP_K: usize = 100;
pub const MAX_TOP_K: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub top_k: usize,
    pub with_embedding: bool,
    pub with_documents: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            with_embedding: false,
            with_documents: false,
        }
    }
}

impl SearchOptions {
    #[inline]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn with_embedding(mut self, with_embedding: bool) -> Self {
        self.with_embedding = with_embedding;
        self
    }

    #[inline]
    pub fn with_documents(mut self, with_documents: bool) -> Self {
        self.with_documents = with_documents;
        self
    }
}

/// Cosine similarity of two vectors; 0.0 when either is empty, zero or the
/// lengths differ
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

impl Document {
    /// Vectorise `query` through the embedding cache and rank points against it
    #[inline]
    pub async fn search(
        conn: &mut SqliteConnection,
        query: &str,
        embedder: &Embedder,
        options: &SearchOptions,
    ) -> Result<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StoreError::InvalidArgument(
                "Search query cannot be empty".to_string(),
            ));
        }

        let vector = embedder
            .embed(&Document::to_query_cards(query))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Embedding(format!("No embedding returned for '{query}'")))?;

        let mut result =
            Self::search_single_vector(conn, &vector, embedder.dimensions(), options).await?;
        result.query = Some(query.to_string());
        Ok(result)
    }

    /// Rank embedded points by cosine similarity to `vector`.
    ///
    /// Scores are computed while streaming the stored embeddings; only the
    /// `top_k` best are hydrated, in rank order, by a single joined statement.
    #[inline]
    pub async fn search_single_vector(
        conn: &mut SqliteConnection,
        vector: &[f32],
        dimensions: usize,
        options: &SearchOptions,
    ) -> Result<SearchResult> {
        let started = Instant::now();

        if vector.len() != dimensions {
            return Err(StoreError::InvalidArgument(format!(
                "Query vector has {} dimensions, expected {}",
                vector.len(),
                dimensions
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(StoreError::InvalidArgument(
                "Query vector contains non-finite values".to_string(),
            ));
        }
        if !(1..=MAX_TOP_K).contains(&options.top_k) {
            return Err(StoreError::InvalidArgument(format!(
                "top_k must be between 1 and {}, got {}",
                MAX_TOP_K, options.top_k
            )));
        }

        let ranked = score_points(conn, vector, options.top_k).await?;
        let matches = hydrate_matches(conn, &ranked, options.with_embedding).await?;

        let documents = if options.with_documents {
            fetch_documents(conn, &matches).await?
        } else {
            Vec::new()
        };

        let execution_time = started.elapsed().as_secs_f64();
        info!(
            "Similarity search returned {} matches in {:.3}s",
            matches.len(),
            execution_time
        );

        Ok(SearchResult {
            query: None,
            relevance_score: matches.first().map(|m| m.relevance_score),
            total_results: matches.len(),
            matches,
            documents,
            execution_time,
            ..SearchResult::default()
        })
    }
}

/// A scored point; ties rank the earlier scanned point higher
struct Scored {
    score: f32,
    seq: usize,
    point_id: String,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Best `top_k` points by similarity, highest first. Only a min-heap of
/// `top_k` entries is kept while the embeddings stream past.
async fn score_points(
    conn: &mut SqliteConnection,
    vector: &[f32],
    top_k: usize,
) -> Result<Vec<(String, f32)>> {
    let blob_length = i64::try_from(vector.len() * 4).unwrap_or(i64::MAX);
    let mut best: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(top_k + 1);
    let mut scanned = 0usize;

    let mut rows = sqlx::query(
        "SELECT point_id, embedding FROM points WHERE length(embedding) = ?",
    )
    .bind(blob_length)
    .fetch(&mut *conn);

    while let Some(row) = rows.try_next().await? {
        let blob: Vec<u8> = row.try_get("embedding")?;
        let candidate = Scored {
            score: cosine_similarity(vector, &blob_to_vec(&blob)),
            seq: scanned,
            point_id: String::new(),
        };
        scanned += 1;

        let admit = best.len() < top_k
            || best.peek().is_some_and(|Reverse(worst)| candidate > *worst);
        if admit {
            best.push(Reverse(Scored {
                point_id: row.try_get("point_id")?,
                ..candidate
            }));
            if best.len() > top_k {
                best.pop();
            }
        }
    }

    debug!("Scored {} embedded points", scanned);

    Ok(best
        .into_sorted_vec()
        .into_iter()
        .map(|Reverse(scored)| (scored.point_id, scored.score))
        .collect())
}

async fn hydrate_matches(
    conn: &mut SqliteConnection,
    ranked: &[(String, f32)],
    with_embedding: bool,
) -> Result<Vec<PointWithScore>> {
    if ranked.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder =
        QueryBuilder::<Sqlite>::new("WITH ranked(point_id, relevance_score, rank) AS (");
    builder.push_values(
        ranked.iter().enumerate(),
        |mut values, (rank, (point_id, score))| {
            values
                .push_bind(point_id.clone())
                .push_bind(f64::from(*score))
                .push_bind(i64::try_from(rank + 1).unwrap_or(i64::MAX));
        },
    );
    builder
        .push(") SELECT ")
        .push(
            Point::columns(with_embedding)
                .iter()
                .map(|column| format!("p.{column}"))
                .join(", "),
        )
        .push(", r.relevance_score, r.rank FROM ranked r JOIN points p ON p.point_id = r.point_id ORDER BY r.rank");

    debug!(sql = builder.sql(), "Hydrating {} ranked points", ranked.len());

    let matches = builder
        .build_query_as::<PointWithScore>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(matches)
}

/// Parent documents of `matches`, deduplicated in order of first appearance
async fn fetch_documents(
    conn: &mut SqliteConnection,
    matches: &[PointWithScore],
) -> Result<Vec<Document>> {
    let ids: Vec<&str> = matches
        .iter()
        .map(|m| m.point.document_id.as_str())
        .unique()
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
    builder
        .push(Document::columns(false).join(", "))
        .push(" FROM documents WHERE document_id IN (");
    {
        let mut in_list = builder.separated(", ");
        for id in &ids {
            in_list.push_bind((*id).to_string());
        }
    }
    builder.push(")");

    let mut by_id: HashMap<String, Document> = builder
        .build_query_as::<Document>()
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|document| (document.document_id.clone(), document))
        .collect();

    Ok(ids.into_iter().filter_map(|id| by_id.remove(id)).collect())
}
