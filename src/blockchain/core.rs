// Block construction and persistence live in `chain`; integrity checks in `validation`.
pub mod chain;
pub mod validation;

pub use chain::*;
pub use validation::*;
