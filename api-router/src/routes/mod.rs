pub mod books;
pub mod enrichment;
pub mod events;
pub mod liveness;
pub mod readiness;
