pub(crate) mod answers;
pub(crate) mod attempts;
pub(crate) mod catalog;
pub(crate) mod memory;
pub(crate) mod postgres;
pub(crate) mod store;

pub(crate) use store::{AttemptStore, StoreError};
