pub mod enrichment_lock;
pub mod image;
