pub mod best_fit;
pub mod similarity;
