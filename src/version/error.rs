use thiserror::Error;

use crate::version::value::Scheme;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Cannot parse {raw:?} as a {scheme} version")]
    Parse { raw: String, scheme: Scheme },

    #[error("Cannot compare a {left} version with a {right} version")]
    IncomparableScheme { left: Scheme, right: Scheme },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Unknown placeholder ${0}")]
    UnknownPlaceholder(String),

    #[error("Invalid placeholder at offset {offset} in {template:?}")]
    InvalidPlaceholder { template: String, offset: usize },
}
