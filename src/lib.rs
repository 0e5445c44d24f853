//! Card Forge Core - Template-Driven Vector Card Renderer
//!
//! # The Laws
//! 1. Templates Are Contracts: a card is only rendered against a template
//!    that declares everything its variant needs.
//! 2. Records Are Validated: composition always validates first.
//! 3. Layout Is Deterministic: same record, template and metrics, same document.
//! 4. Boundaries Never Render: they only shape text.

pub mod geometry;
pub mod error;
pub mod card;
pub mod validation;
pub mod svg_source;
pub mod classify;
pub mod templates;
pub mod template_validation;
pub mod layout;
pub mod art;
pub mod metadata;
pub mod svg_writer;
pub mod hashing;
pub mod pipeline;
pub mod emit;
pub mod ingest;
pub mod config;
pub mod store;
pub mod postgres;

pub use card::{CardRecord, CardType, CardVariant, CardWire};
pub use error::{Classify, ErrorKind};
pub use validation::{validate, ValidationError, ValidationKind};
pub use templates::{Template, TemplateCache, TemplateError};
pub use layout::{AdvanceTable, FontMetrics, LayoutSolver, Placement};
pub use art::{ArtReference, ArtSource, ArtWorkers, FileArtSource, MemoryArtSource, PlaceholderArtSource};
pub use metadata::CardSidecar;
pub use pipeline::{ComposeError, ComposeOptions, ComposedCard, Composer, CompositionPipeline};
pub use emit::{emit, EmitError, EmitReport};
pub use config::{ConfigError, DbConfig};
pub use store::{CardStore, MemoryStore, StoreError};
pub use postgres::PgCardStore;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
