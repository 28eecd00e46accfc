// Documents module
// Entity models, their query sets, similarity search and point staleness checks

pub mod consistency;
pub mod models;
pub mod queries;
pub mod search;

pub use consistency::{PointReport, RefreshReport};
pub use models::{
    DOCUMENT_ID_PREFIX, Document, MAX_CONTENT_LENGTH, MAX_NAME_LENGTH, Metadata, POINT_ID_PREFIX,
    Page, Point, PointWithScore, SearchResult, blob_to_vec, vec_to_blob,
};
pub use queries::{
    Condition, DEFAULT_LIST_LIMIT, DocumentFilter, DocumentUpdate, Entity, Filter, ListParams,
    MAX_LIST_LIMIT, PointFilter, PointUpdate, QuerySet,
};
pub use search::{DEFAULT_TOP_K, MAX_TOP_K, SearchOptions, cosine_similarity};
