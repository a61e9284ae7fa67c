//! Relational persistence for the document QA system.
//!
//! Provides the SQLite document/segment repository and the lifecycle state
//! machine that guards every status mutation.

pub mod documents;
pub mod schema;
pub mod status;

pub use documents::DocumentRepository;
pub use schema::init_schema;
pub use status::DocumentStatusManager;
