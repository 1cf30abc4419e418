//! # runlist
//!
//! Ordered run lists of configuration units for a convergence tool.
//!
//! A run list names which recipes of which units (cookbooks) the tool
//! executes, and in what order. This crate provides:
//! - Parsing and rendering entries (`unit`, `unit::lib`, `unit::validate`)
//! - The category ordering rule: all `lib` entries, then all `default`
//!   entries, then all `validate` entries, across the whole list
//! - Merging, single-unit insertion, priority sorting, and unit removal
//! - Reading and writing the `solo.json` run list document
//!
//! Recipe existence is checked on disk at
//! `{root}/cookbooks/{unit}/recipes/{category}.rb`; recipe contents are
//! never read.
//!
//! ## Example
//!
//! ```no_run
//! use runlist::{RunList, RunListDocument};
//! use std::path::Path;
//!
//! let root = Path::new("/home/chef/chef");
//! let mut doc = RunListDocument::load_or_default(root)?;
//! doc.run_list.insert_app("newapp", root)?;
//! assert!(doc.run_list.is_category_ordered());
//! doc.save_in(root)?;
//! # Ok::<(), runlist::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod entry;
pub mod error;
pub mod runlist;

pub use document::{RunListDocument, SOLO_JSON};
pub use entry::{COOKBOOKS_DIR, Category, UnitRef, recipe_exists, recipe_path, validate_unit_name};
pub use error::{Error, Result};
pub use runlist::{Prioritized, RunList};
