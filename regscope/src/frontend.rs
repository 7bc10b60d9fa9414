//! Frontends for reading memory map descriptions
pub(crate) mod svd;
