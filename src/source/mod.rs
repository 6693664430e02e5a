//! Image sources.
//!
//! A [`SourceOpener`] turns a location into a backend driver; an
//! [`ImageSession`] owns the driver's handle pool; the [`SourceRegistry`]
//! keeps sessions open, keyed by location and [`OpenOptions`], and shuts
//! their pools down when they are evicted or invalidated.

mod opener;
mod registry;
mod session;

pub use opener::{LocalOpener, S3Opener, SourceOpener, StoreOpener, SyntheticOpener};
pub use registry::{SourceRegistry, DEFAULT_SESSION_CAPACITY};
pub use session::{ImageSession, OpenOptions, SourceKey};
