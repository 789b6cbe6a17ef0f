//! Search index access for Brewbook records.
//!
//! [`SearchIndexService`] is the API the pipeline and the web service use. It
//! validates records, keeps created/updated bookkeeping and delegates storage
//! to a [`SearchIndexProvider`]: [`AlgoliaProvider`] in production,
//! [`InMemoryIndexProvider`] for dry runs and tests.

pub mod algolia;
pub mod error;
pub mod facets;
pub mod memory;
pub mod provider;
pub mod service;
pub mod settings;

pub use algolia::{AlgoliaConfig, AlgoliaProvider};
pub use error::SearchIndexError;
pub use facets::{facet_chips, FacetChip, FacetSelection};
pub use memory::InMemoryIndexProvider;
pub use provider::{
    FacetCounts, IndexSettings, SearchIndexProvider, SearchQuery, SearchResponse, Synonym, TaskId,
};
pub use service::{
    IndexingOutcome, SearchIndexService, SearchIndexServiceConfig, ValidationIssue, ValidationOutcome,
};
pub use settings::{
    default_index_settings, default_synonyms, load_search_config, merge_settings, SearchConfigFile,
    FACET_ATTRIBUTES,
};

pub const CRATE_NAME: &str = "brewbook-search";
