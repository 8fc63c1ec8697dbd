pub mod engine;
pub mod guardrails;
pub mod regime;
pub mod session;

pub use engine::ConfluenceEngine;
pub use guardrails::Guardrails;
pub use regime::{detect_regime, regime_weight_multiplier};
pub use session::SessionMultiplier;
