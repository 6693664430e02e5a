//! Factory trait for pooled resources.
//!
//! The pool never constructs, clones or closes resources itself. It calls
//! back into a [`ResourceFactory`] supplied at construction time, which keeps
//! the pool free of any backend knowledge.

use async_trait::async_trait;

use crate::error::BackendError;

/// Strategy for constructing, cloning and closing one kind of resource.
///
/// Resources only need to be `Send`: the pool hands each one to exactly one
/// owner at a time, so they are never shared between tasks.
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource type.
    type Resource: Send + 'static;

    /// Construct a fresh resource from scratch.
    ///
    /// This is expected to be expensive (open a file, parse an index,
    /// perform a remote round trip).
    async fn create(&self) -> Result<Self::Resource, BackendError>;

    /// Whether [`ResourceFactory::clone_resource`] is implemented.
    ///
    /// The pool probes this once per construction; when it returns `true` the
    /// pool builds its first member with `create` and derives the others
    /// from it.
    fn supports_clone(&self) -> bool {
        false
    }

    /// Derive a new resource from an already-initialised template.
    ///
    /// The template is borrowed mutably because resources are not required to
    /// be `Sync`; the pool guarantees nobody else touches it meanwhile.
    async fn clone_resource(
        &self,
        _template: &mut Self::Resource,
    ) -> Result<Self::Resource, BackendError> {
        Err(BackendError::Unsupported("clone_resource"))
    }

    /// Release a resource for good.
    fn close(&self, resource: Self::Resource) {
        drop(resource);
    }
}
