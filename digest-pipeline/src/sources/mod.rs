pub mod local_file;

pub use local_file::{LocalFileSource, SampleEmail};
