//! Container Module
//!
//! Reading and writing `.baw` containers.
//!
//! ## Responsibilities
//! - Validate signature, version and structural layout on open
//! - Upgrade legacy containers in memory
//! - Random access to stored blob bytes by handle
//! - Produce tightly packed containers from decompressed blob data

mod reader;
mod writer;

pub use reader::{BlobSource, Container};
pub use writer::ContainerWriter;
