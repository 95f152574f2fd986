// SPDX-License-Identifier: MIT OR Apache-2.0
//! YAML pipeline loading and validation.
//!
//! [`Loader`] turns a `YAMLpipeline`/`YAMLpipelines` document into one or
//! more [`rag_core::PipelineDef`]s, resolving `extends` by deep-merge.
//! [`validate`] checks the loaded shape for dangling references and
//! produces non-fatal lint warnings.

mod loader;
mod validator;

pub use loader::Loader;
pub use validator::{validate, LintWarning};
