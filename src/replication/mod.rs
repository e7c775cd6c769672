//! # Replication
//!
//! Dirty-tracked entity state and per-connection visibility.
//!
//! ## Components
//! - **Property**: the closed value enum and its tagged wire encoding
//! - **Entity**: the ordered, dirty-tracked property table with snapshot
//!   and delta codecs
//! - **Scope**: the per-connection visible-entity set
//!
//! ## Consistency
//! Scope (full snapshot) always precedes the first delta for a given
//! (entity, connection) pair; deltas carry only dirty properties indexed
//! by registration order.

pub mod entity;
pub mod property;
pub mod scope;

pub use entity::{DeltaBody, EntityFactory, EntityId, EntityTypeId, ReplicatedEntity};
pub use property::PropertyValue;
pub use scope::ScopeSet;
