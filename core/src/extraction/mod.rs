pub mod header;
pub mod tags;

pub use header::{extract_image_type, extract_series_header, read_series_header};
pub use tags::*;
