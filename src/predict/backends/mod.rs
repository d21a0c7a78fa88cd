pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubPredictor;

#[cfg(feature = "backend-tract")]
pub use tract::TractPredictor;
