#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::models::{Document, Point};
use super::queries::{ListParams, MAX_LIST_LIMIT, PointFilter, QuerySet};
use crate::Result;
use crate::embeddings::Embedder;

/// Outcome of [`Document::refresh_points`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub created: usize,
    pub retired: usize,
}

impl RefreshReport {
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.retired == 0
    }
}

/// Point counts of one document split by staleness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointReport {
    pub total: usize,
    pub current: usize,
    pub stale: usize,
}

impl Document {
    #[inline]
    pub async fn has_points(&self, conn: &mut SqliteConnection) -> Result<bool> {
        let count = Point::objects()
            .count(conn, &PointFilter::for_document(self.document_id.as_str()))
            .await?;
        Ok(count > 0)
    }

    /// True iff the document has points and every one of them was embedded
    /// from the current content hash. Pages are drained until `has_more` is false.
    #[inline]
    pub async fn are_points_current(&self, conn: &mut SqliteConnection) -> Result<bool> {
        let filter = PointFilter::for_document(self.document_id.as_str());
        let mut params = ListParams::default().limit(MAX_LIST_LIMIT);
        let mut seen = 0usize;

        loop {
            let page = Point::objects().list(conn, &filter, &params).await?;
            seen += page.len();

            if let Some(stale) = page.data.iter().find(|p| !p.is_current_for(self)) {
                debug!(
                    "Point {} of document {} is stale ({} != {})",
                    stale.point_id, self.document_id, stale.content_md5, self.content_md5
                );
                return Ok(false);
            }
            if !page.has_more {
                break;
            }
            params = params.after(page.last_id);
        }

        Ok(seen > 0)
    }

    /// Bring the document's points up to date with its content.
    ///
    /// Current points are left alone. Otherwise fresh points are created first
    /// and only then are the stale ones removed, so a reader never sees the
    /// document without points.
    #[inline]
    pub async fn refresh_points(
        &mut self,
        conn: &mut SqliteConnection,
        embedder: &Embedder,
    ) -> Result<RefreshReport> {
        if self.are_points_current(conn).await? {
            debug!("Points of document {} are current", self.document_id);
            return Ok(RefreshReport::default());
        }

        let points: QuerySet<Point> = Point::objects().with_dimensions(embedder.dimensions());
        let mut report = RefreshReport::default();

        for point in self.to_points(Some(embedder)).await? {
            points.create(conn, point).await?;
            report.created += 1;
        }

        for stale in self.stale_points(conn).await? {
            points.remove(conn, &stale.point_id).await?;
            report.retired += 1;
        }

        info!(
            "Refreshed points of document {}: {} created, {} retired",
            self.document_id, report.created, report.retired
        );
        Ok(report)
    }

    /// Total, current and stale point counts
    #[inline]
    pub async fn point_report(&self, conn: &mut SqliteConnection) -> Result<PointReport> {
        let total = Point::objects()
            .count(conn, &PointFilter::for_document(self.document_id.as_str()))
            .await?;
        let current = Point::objects()
            .count(
                conn,
                &PointFilter::for_document(self.document_id.as_str())
                    .with_content_md5(self.content_md5.as_str()),
            )
            .await?;

        let total = usize::try_from(total).unwrap_or_default();
        let current = usize::try_from(current).unwrap_or_default();
        Ok(PointReport {
            total,
            current,
            stale: total.saturating_sub(current),
        })
    }

    async fn stale_points(&self, conn: &mut SqliteConnection) -> Result<Vec<Point>> {
        let filter = PointFilter::for_document(self.document_id.as_str());
        let mut params = ListParams::default().limit(MAX_LIST_LIMIT);
        let mut stale = Vec::new();

        loop {
            let page = Point::objects().list(conn, &filter, &params).await?;
            stale.extend(page.data.into_iter().filter(|p| !p.is_current_for(self)));
            if !page.has_more {
                break;
            }
            params = params.after(page.last_id);
        }

        Ok(stale)
    }
}
