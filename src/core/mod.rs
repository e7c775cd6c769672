//! # Core Protocol Components
//!
//! Low-level wire handling and the message catalog.
//!
//! ## Components
//! - **Wire**: the cursor-based binary buffer all encoding goes through
//! - **Message**: the closed tagged enum of everything that crosses the
//!   wire
//!
//! ## Wire Format
//! ```text
//! [type_tag(4)] [sequence_id(4)] [payload(N)]
//! ```
//!
//! ## Security
//! - Length prefixes are validated before allocation
//! - Every read is bounds-checked; truncated payloads error, never panic

pub mod message;
pub mod wire;
