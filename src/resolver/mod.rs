// src/resolver/mod.rs

//! Dependency version resolution
//!
//! The generic backtracking engine lives in [`engine`]; [`upgrade`] binds
//! it to a concrete project, its package manager, its selections and the
//! configured package suppliers.

pub mod engine;
pub mod upgrade;

pub use engine::{ChildDependency, ResolveContext, TreeNode, resolve};
pub use upgrade::{DependencyVersionResolver, UpgradeOptions, resolve_versions};
