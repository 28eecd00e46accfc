use super::*;
use crate::database::Database;
use crate::documents::queries::DocumentUpdate;
use crate::embeddings::test_support::{FixedProvider, test_embedder};
use anyhow::Result;
use std::sync::Arc;

const DIMENSIONS: usize = 4;

async fn stored_document(conn: &mut SqliteConnection, name: &str, content: &str) -> Result<Document> {
    let document = Document::from_content(name, content, None)?;
    Ok(Document::objects().create(conn, document).await?)
}

#[tokio::test]
async fn document_without_points() -> Result<()> {
    let database = Database::in_memory().await?;
    let mut conn = database.acquire().await?;
    let document = stored_document(&mut conn, "A", "hello world").await?;

    assert!(!document.has_points(&mut conn).await?);
    assert!(!document.are_points_current(&mut conn).await?);
    assert_eq!(document.point_report(&mut conn).await?, PointReport::default());

    Ok(())
}

#[tokio::test]
async fn points_become_stale_after_content_change() -> Result<()> {
    let database = Database::in_memory().await?;
    let mut conn = database.acquire().await?;
    let mut document = stored_document(&mut conn, "A", "hello world").await?;

    for point in document.to_points(None).await? {
        Point::objects().create(&mut conn, point).await?;
    }
    assert!(document.has_points(&mut conn).await?);
    assert!(document.are_points_current(&mut conn).await?);

    let document = Document::objects()
        .update(
            &mut conn,
            &document.document_id,
            DocumentUpdate {
                content: Some("goodbye world".to_string()),
                ..DocumentUpdate::default()
            },
        )
        .await?;

    assert!(document.has_points(&mut conn).await?);
    assert!(!document.are_points_current(&mut conn).await?);
    assert_eq!(
        document.point_report(&mut conn).await?,
        PointReport {
            total: 1,
            current: 0,
            stale: 1,
        }
    );

    Ok(())
}

#[tokio::test]
async fn staleness_is_detected_beyond_the_first_page() -> Result<()> {
    let database = Database::in_memory().await?;
    let mut conn = database.acquire().await?;
    let document = stored_document(&mut conn, "A", "hello world").await?;

    for _ in 0..MAX_LIST_LIMIT {
        Point::objects()
            .create(
                &mut conn,
                Point::new(&document.document_id, &document.content_md5, Vec::new()),
            )
            .await?;
    }
    assert!(document.are_points_current(&mut conn).await?);

    // Sorts after every generated id, so it lands on the second page
    let mut stale = Point::new(&document.document_id, "outdated", Vec::new());
    stale.point_id = "pt_zzzzzzzzzzzzzzzzzzzzzzzzzzz".to_string();
    Point::objects().create(&mut conn, stale).await?;

    assert!(!document.are_points_current(&mut conn).await?);

    Ok(())
}

#[tokio::test]
async fn points_of_other_documents_are_ignored() -> Result<()> {
    let database = Database::in_memory().await?;
    let mut conn = database.acquire().await?;
    let first = stored_document(&mut conn, "A", "alpha").await?;
    let second = stored_document(&mut conn, "B", "beta").await?;

    Point::objects()
        .create(
            &mut conn,
            Point::new(&first.document_id, &first.content_md5, Vec::new()),
        )
        .await?;
    Point::objects()
        .create(&mut conn, Point::new(&second.document_id, "stale", Vec::new()))
        .await?;

    assert!(first.are_points_current(&mut conn).await?);
    assert!(!second.are_points_current(&mut conn).await?);

    Ok(())
}

#[tokio::test]
async fn refresh_replaces_stale_points() -> Result<()> {
    let database = Database::in_memory().await?;
    let mut conn = database.acquire().await?;
    let provider = Arc::new(FixedProvider::default());
    let (_cache_dir, embedder) = test_embedder(Arc::clone(&provider), DIMENSIONS).await;

    let mut document = stored_document(&mut conn, "A", "hello world").await?;
    Point::objects()
        .create(&mut conn, Point::new(&document.document_id, "old-hash", Vec::new()))
        .await?;

    let report = document.refresh_points(&mut conn, &embedder).await?;
    assert_eq!(
        report,
        RefreshReport {
            created: 1,
            retired: 1,
        }
    );
    assert!(document.are_points_current(&mut conn).await?);

    let page = Point::objects()
        .with_dimensions(DIMENSIONS)
        .list(
            &mut conn,
            &PointFilter::for_document(document.document_id.as_str()),
            &ListParams::default().with_embedding(true),
        )
        .await?;
    assert_eq!(page.len(), 1);
    assert_eq!(page.data[0].embedding, vec![1.0; DIMENSIONS]);

    let again = document.refresh_points(&mut conn, &embedder).await?;
    assert!(again.is_noop());
    assert_eq!(provider.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn refresh_creates_first_points() -> Result<()> {
    let database = Database::in_memory().await?;
    let mut conn = database.acquire().await?;
    let (_cache_dir, embedder) = test_embedder(Arc::new(FixedProvider::default()), DIMENSIONS).await;

    let mut document = stored_document(&mut conn, "A", "hello world").await?;
    let report = document.refresh_points(&mut conn, &embedder).await?;

    assert_eq!(
        report,
        RefreshReport {
            created: 1,
            retired: 0,
        }
    );
    assert_eq!(
        document.point_report(&mut conn).await?,
        PointReport {
            total: 1,
            current: 1,
            stale: 0,
        }
    );

    Ok(())
}
