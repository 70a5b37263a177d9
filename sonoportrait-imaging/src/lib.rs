pub mod adjust;
pub mod preprocess;

pub use preprocess::{
    MIN_DIMENSION, PreprocessError, PreprocessedImage, preprocess, preprocess_all_variants,
};
