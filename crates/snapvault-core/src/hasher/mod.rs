pub mod content;

pub use content::{hash_file, hash_reader, HashingWriter};
