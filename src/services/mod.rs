pub(crate) mod attempt_lifecycle;
pub(crate) mod attempt_timing;
pub(crate) mod realtime;
pub(crate) mod scoring;
