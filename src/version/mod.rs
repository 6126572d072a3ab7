//! Version values, constraints and templates
//!
//! - [`value`]: [`VersionValue`] parsing and comparison under a [`Scheme`]
//! - [`constraint`]: [`ConstraintSet`] built from the `versions` option
//! - [`template`]: placeholder expansion for URL and tag templates
//! - [`error`]: errors for the above

pub mod constraint;
pub mod error;
pub mod template;
pub mod value;

pub use constraint::{ConstraintSet, Operator};
pub use error::{TemplateError, VersionError};
pub use template::{TemplateVars, expand};
pub use value::{Scheme, VersionValue};
