//! Database models

pub mod credential;
pub mod swipe;

pub use credential::Credential;
pub use swipe::SwipeSample;
