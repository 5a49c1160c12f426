//! Runtime for driving conversations
//!
//! The controller is the single owner of session state and is shared by
//! reference between requests. Appends are serialized on its session lock;
//! model and remote calls run outside it.

mod controller;
mod explain;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use controller::{ChatController, ChatError, SendInput, UserProfile};
pub use explain::Explainer;
pub use traits::*;

use crate::remote::RemoteSource;
use std::sync::Arc;

/// Controller wired to real services
pub type ProductionController = ChatController<Arc<dyn LlmClient>, Arc<dyn RemoteSource>>;
