pub(crate) mod access;
pub(crate) mod cache;
pub(crate) mod catalog;
pub(crate) mod errors;
pub(crate) mod lifecycle;
pub(crate) mod scoring;
pub(crate) mod statistics;
