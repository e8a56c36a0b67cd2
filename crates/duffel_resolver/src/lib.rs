//! duffel_resolver turns a list of requirement expressions into the smallest
//! compatible set of fully materialized Python distributions, resolved
//! transitively against a target interpreter identity and platform. It is the
//! engine behind a tool that packs those distributions into self-contained
//! executable archives; this crate is only the plumbing, not the packer.
//!
//! The pieces compose leaves-first: [`types::Link`] and the
//! [`types::Package`] taxonomy describe what can be found, the crawler and
//! iterator pipeline finds and ranks it, translators materialize what was
//! chosen, and the [`Resolver`] drives the narrow-then-expand iteration with
//! optional on-disk caching.

#![deny(missing_docs)]

pub mod types;

pub mod context;
pub mod crawler;
pub mod fetcher;
pub mod iterator;
pub mod translator;

pub mod distribution;
pub mod interpreter;
pub mod marker;
pub mod metadata;
pub mod tags;

pub mod requirements_txt;
pub mod resolvable;
pub mod resolve;

mod reqparse;
#[cfg(test)]
mod testing;

pub use context::{Context, ContextError, IntegrityError};
pub use distribution::Distribution;
pub use fetcher::{normalize_index_url, Fetcher};
pub use interpreter::{InterpreterIdentity, ProbeError, PythonVersion};
pub use iterator::{PackageIter, PackageIterator, Precedence};
pub use marker::{MarkerEnv, MarkerExpr, MarkerSnapshot};
pub use requirements_txt::{requirements_from_file, requirements_from_lines, RequirementsTxtError};
pub use resolvable::{Resolvable, ResolvableError};
pub use resolve::{resolve, ResolveError, Resolver, ResolverOptions, ResolverOptionsBuilder};
pub use tags::{CompatibilityTag, CompatibilityTags, Platform};
pub use types::{Package, PackageName, Requirement};
