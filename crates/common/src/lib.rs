// pagepatch-common: shared wire types and pure helpers for the pagepatch workspace

pub mod locator;
pub mod scope;
pub mod style;
pub mod transfer;
pub mod types;
