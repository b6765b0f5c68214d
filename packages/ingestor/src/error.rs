//! Crate-level error type for the binary edge.

use thiserror::Error;

use crate::config::ConfigError;
use crate::decoder::DecodeError;
use crate::store::StoreError;
use crate::stream::StreamError;
use crate::tokens::TokenError;
use crate::transform::TransformError;

#[derive(Error, Debug)]
pub enum IngestorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tokens(#[from] TokenError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
