pub mod model;
pub mod score;

pub use model::{build_model, CigarModel, EditModel, MarkovModel, ModelKind, StratifiedModel, TrainingRecord};
pub use score::score_cigar;
