use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use console::style;
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::documents::{
    Document, DocumentFilter, DocumentUpdate, ListParams, Metadata, Point, PointFilter,
    SearchOptions,
};
use crate::embeddings::Embedder;
use crate::ids::ksuid_timestamp;

/// Parse a `--metadata` argument, which must be a JSON object
#[inline]
pub fn parse_metadata(raw: &str) -> Result<Metadata> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("Metadata must be valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(anyhow::anyhow!(
            "Metadata must be a JSON object, got: {}",
            other
        )),
    }
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::initialize_from_config(config)
        .await
        .context("Failed to initialize database")
}

fn format_timestamp(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| seconds.to_string())
}

fn preview(content: &str, limit: usize) -> String {
    let mut preview: String = content.chars().take(limit).collect();
    if content.chars().count() > limit {
        preview.push('…');
    }
    preview.replace('\n', " ")
}

/// Write a default configuration if none exists and create the store tables
#[inline]
pub async fn init_store(config: &Config) -> Result<()> {
    if config.config_file_path().exists() {
        println!(
            "Configuration already exists: {}",
            config.config_file_path().display()
        );
    } else {
        config.save().context("Failed to write configuration")?;
        println!(
            "{} {}",
            style("✓ Configuration written to").green(),
            config.config_file_path().display()
        );
    }

    let database = open_database(config).await?;
    database.close().await;
    println!(
        "{} {}",
        style("✓ Document store ready at").green(),
        config.database_path().display()
    );

    Ok(())
}

/// Store a new document, optionally embedding it right away
#[inline]
pub async fn add_document(
    config: &Config,
    name: String,
    content: &str,
    metadata: Option<Metadata>,
    embed: bool,
) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let document = Document::from_content(name, content, metadata)?;
    let mut document = Document::objects()
        .create(&mut conn, document)
        .await
        .context("Failed to create document")?;

    println!("Created document: {} (ID: {})", document.name, document.document_id);
    println!("Content MD5: {}", document.content_md5);

    if embed {
        let embedder = Embedder::from_config(config).await?;
        let report = document.refresh_points(&mut conn, &embedder).await?;
        println!("Embedded {} point(s)", report.created);
    }

    Ok(())
}

/// Print one page of documents
#[inline]
pub async fn list_documents(config: &Config, after: Option<String>, limit: usize) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let params = ListParams::default().after(after).limit(limit);
    let page = Document::objects()
        .list(&mut conn, &DocumentFilter, &params)
        .await
        .context("Failed to list documents")?;

    if page.is_empty() {
        println!("No documents found.");
        println!("Use 'vecdocs add <name> --content <text>' to add one.");
        return Ok(());
    }

    let total = Document::objects().count(&mut conn, &DocumentFilter).await?;
    println!("Documents ({} of {} total):", page.len(), total);
    println!();

    for document in &page.data {
        println!("📄 {} (ID: {})", document.name, document.document_id);
        println!("   {}", preview(&document.content, 80));
        println!("   Updated: {}", format_timestamp(document.updated_at));
    }

    if page.has_more {
        println!();
        if let Some(last_id) = &page.last_id {
            println!("More documents available: --after {}", last_id);
        }
    }

    Ok(())
}

/// Print a document and its point summary
#[inline]
pub async fn show_document(config: &Config, document_id: &str) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let document = Document::objects()
        .retrieve(&mut conn, document_id, false)
        .await?;
    let report = document.point_report(&mut conn).await?;

    println!("{}", style(&document.name).bold().cyan());
    println!("ID: {}", document.document_id);
    println!("Content MD5: {}", document.content_md5);
    println!("Created: {}", format_timestamp(document.created_at));
    println!("Updated: {}", format_timestamp(document.updated_at));
    if let Ok(issued) = ksuid_timestamp(&document.document_id) {
        println!("ID issued: {}", format_timestamp(issued));
    }
    if !document.metadata.is_empty() {
        println!(
            "Metadata: {}",
            serde_json::to_string_pretty(&document.metadata)?
        );
    }
    println!(
        "Points: {} total, {} current, {} stale",
        report.total, report.current, report.stale
    );
    println!();
    println!("{}", document.content);

    Ok(())
}

/// Apply a partial update to a document
#[inline]
pub async fn update_document(config: &Config, document_id: &str, update: DocumentUpdate) -> Result<()> {
    if update.is_empty() {
        println!("Nothing to update.");
        return Ok(());
    }

    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let document = Document::objects()
        .update(&mut conn, document_id, update)
        .await
        .with_context(|| format!("Failed to update document {}", document_id))?;

    println!("Updated document: {} (ID: {})", document.name, document.document_id);
    if !document.are_points_current(&mut conn).await? && document.has_points(&mut conn).await? {
        println!(
            "{}",
            style("⚠ Points are stale; run 'vecdocs refresh' to re-embed").yellow()
        );
    }

    Ok(())
}

/// Remove a document together with all of its points
#[inline]
pub async fn remove_document(config: &Config, document_id: &str) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let document = Document::objects()
        .retrieve(&mut conn, document_id, false)
        .await?;

    let filter = PointFilter::for_document(document.document_id.as_str());
    let mut point_ids = Vec::new();
    let mut params = ListParams::default().limit(crate::documents::MAX_LIST_LIMIT);
    loop {
        let page = Point::objects().list(&mut conn, &filter, &params).await?;
        point_ids.extend(page.data.into_iter().map(|p| p.point_id));
        if !page.has_more {
            break;
        }
        params = params.after(page.last_id);
    }

    for point_id in &point_ids {
        Point::objects().remove(&mut conn, point_id).await?;
    }
    Document::objects()
        .remove(&mut conn, &document.document_id)
        .await?;

    info!(
        "Removed document {} and {} points",
        document.document_id,
        point_ids.len()
    );
    println!(
        "{} {} ({} point(s))",
        style("✓ Removed").green(),
        document.name,
        point_ids.len()
    );

    Ok(())
}

/// List the points derived from a document
#[inline]
pub async fn list_points(config: &Config, document_id: &str) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let document = Document::objects()
        .retrieve(&mut conn, document_id, false)
        .await?;
    let filter = PointFilter::for_document(document.document_id.as_str());

    let mut params = ListParams::default()
        .limit(crate::documents::MAX_LIST_LIMIT)
        .with_embedding(true);
    let mut shown = 0usize;
    loop {
        let page = Point::objects().list(&mut conn, &filter, &params).await?;
        for point in &page.data {
            let state = if point.is_current_for(&document) {
                style("current").green()
            } else {
                style("stale").yellow()
            };
            println!(
                "🔹 {} [{}] {} dims, md5 {}",
                point.point_id,
                state,
                point.embedding.len(),
                point.content_md5
            );
        }
        shown += page.len();
        if !page.has_more {
            break;
        }
        params = params.after(page.last_id);
    }

    if shown == 0 {
        println!("Document {} has no points.", document.document_id);
    }

    Ok(())
}

/// Re-embed a document whose points are missing or stale
#[inline]
pub async fn refresh_document(config: &Config, document_id: &str) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let mut document = Document::objects()
        .retrieve(&mut conn, document_id, false)
        .await?;
    let embedder = Embedder::from_config(config).await?;

    let report = document.refresh_points(&mut conn, &embedder).await?;
    if report.is_noop() {
        println!("Points of {} are already current.", document.name);
    } else {
        println!(
            "Refreshed {}: {} created, {} retired",
            document.name, report.created, report.retired
        );
    }

    Ok(())
}

/// Print the staleness report of a document
#[inline]
pub async fn show_status(config: &Config, document_id: &str) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;

    let document = Document::objects()
        .retrieve(&mut conn, document_id, false)
        .await?;
    let report = document.point_report(&mut conn).await?;

    println!("📊 Status of {} ({})", document.name, document.document_id);
    println!("{}", "=".repeat(50));
    println!("   Points: {}", report.total);
    println!("   Current: {}", report.current);
    println!("   Stale: {}", report.stale);

    if report.total == 0 {
        println!("   {}", style("No points; run 'vecdocs refresh'").yellow());
    } else if document.are_points_current(&mut conn).await? {
        println!("   {}", style("✅ Points are current").green());
    } else {
        println!("   {}", style("⚠️  Points need refreshing").yellow());
    }

    Ok(())
}

/// Rank stored points against a text query
#[inline]
pub async fn search_documents(
    config: &Config,
    query: &str,
    top_k: usize,
    with_documents: bool,
) -> Result<()> {
    let database = open_database(config).await?;
    let mut conn = database.acquire().await?;
    let embedder = Embedder::from_config(config).await?;

    let options = SearchOptions::default()
        .top_k(top_k)
        .with_documents(with_documents);
    let result = Document::search(&mut conn, query, &embedder, &options).await?;

    println!(
        "🔍 {} result(s) for '{}' in {:.3}s",
        result.total_results,
        result.query.as_deref().unwrap_or(query),
        result.execution_time
    );
    println!();

    for scored in &result.matches {
        println!(
            "{:>7.4}  {} (document {})",
            scored.relevance_score, scored.point.point_id, scored.point.document_id
        );
    }

    if with_documents && !result.documents.is_empty() {
        println!();
        println!("{}", style("Documents:").bold().yellow());
        for document in &result.documents {
            println!("📄 {} (ID: {})", document.name, document.document_id);
            println!("   {}", preview(&document.content, 120));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_must_be_an_object() {
        let metadata = parse_metadata(r#"{"source": "wire", "rank": 2}"#).expect("object");
        assert_eq!(metadata["source"], json!("wire"));
        assert_eq!(metadata["rank"], json!(2));

        assert!(parse_metadata("[1, 2]").is_err());
        assert!(parse_metadata("not json").is_err());
    }

    #[test]
    fn preview_truncates_on_characters() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé…");
        assert_eq!(preview("a\nb", 10), "a b");
    }

    #[test]
    fn timestamps_are_formatted_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }
}
