//! Per-message nickname rotation.

pub mod activation;
pub mod generator;
pub mod inflight;
pub mod selector;
pub mod session;

pub use activation::{ActivationCommand, ActivationGate, CommandOutcome};
pub use inflight::{InFlightPermit, InFlightSet};
pub use selector::{NameSelector, RandomSource, ThreadRandom, MAX_DRAW_ATTEMPTS};
pub use session::{MessageOutcome, NicknameSession};
