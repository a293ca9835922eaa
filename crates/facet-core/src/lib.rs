//! facet-core: face descriptors, descriptor matching and descriptor indexes.
//!
//! Descriptors are compared on the unit sphere. Indexes are HNSW graphs with
//! an exact scan for small populations, kept either in a mutable dynamic form
//! or an immutable dense form, and serialized with a checksummed envelope.

pub mod batch;
mod codec;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod matcher;
pub mod metric;
pub mod settings;

pub use batch::DescriptorBatch;
pub use descriptor::{Descriptor, SaveMode};
pub use error::{ErrorKind, FacetError, Result};
pub use index::{
    DenseIndex, DynamicIndex, Index, IndexBuilder, IndexConfig, MutableIndex, SearchResult,
};
pub use matcher::{BestMatch, CosineMatcher, Matcher, MatchingResult};
pub use settings::{SettingValue, Settings, SettingsError};
