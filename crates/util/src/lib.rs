pub mod path_processing;
pub mod persistence;

pub use path_processing::*;
pub use persistence::*;
