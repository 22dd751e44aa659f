pub mod args;
pub mod binio;
pub mod dictionary;
pub mod fasttext;
pub mod loss;
pub mod matrix;
pub mod meter;
pub mod model;
pub mod quant;
pub mod rng;
pub mod vector;

pub use args::{Args, LossName, ModelName};
pub use dictionary::Dictionary;
pub use fasttext::FastText;
pub use loss::{Loss, Predictions};
pub use matrix::{DenseMatrix, Matrix, QuantMatrix};
pub use meter::Meter;
pub use model::{Model, State};
pub use quant::ProductQuantizer;
pub use rng::Rng;
pub use vector::Vector;
