// Хранилище: in-memory реализации каталога ключей и источника параметров

pub mod memory;

pub use memory::{MemoryKeyDirectory, StaticParameterSource};
