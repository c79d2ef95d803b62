pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesStorage;
pub use memory::MemoryStorage;
