pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod monitoring;
pub(crate) mod router;
pub(crate) mod ws;
