pub mod manager;

pub use manager::{GateFailure, RiskManager, SizingInputs};
