use miette::Diagnostic;
use thiserror::Error;

use crate::context::ContextError;
use crate::resolvable::ResolvableError;
use crate::types::NormalizedPackageName;

/// The ways a resolve can fail.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// The intersection of compatible packages for a name became empty. The
    /// contributors are every resolvable that constrained the name.
    #[error("cannot satisfy requirements for '{name}': {}", .contributors.join(", "))]
    Unsatisfiable {
        /// The name whose candidate set emptied.
        name: NormalizedPackageName,
        /// Display forms of every contributing resolvable.
        contributors: Vec<String>,
    },

    /// A selected package could not be turned into a distribution.
    #[error("package {package} is not translateable")]
    Untranslateable {
        /// Display form of the package.
        package: String,
    },

    /// A name was re-selected to a different package in a later round; this
    /// resolver reports the conflict instead of backtracking.
    #[error("'{name}' resolves ambiguously: committed to {previous}, later narrowed to {conflicting}")]
    Ambiguous {
        /// The conflicted name.
        name: NormalizedPackageName,
        /// The package committed to first.
        previous: String,
        /// The package a later round would select instead.
        conflicting: String,
    },

    /// An input string could not be parsed as any resolvable form.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolvable(#[from] ResolvableError),

    /// Transport failure outside the crawl (fetching a selected package).
    #[error(transparent)]
    #[diagnostic(transparent)]
    Context(#[from] ContextError),

    /// Filesystem failure preparing the cache or scratch space.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
