//! Node health: probe history, classification and the shared status view.

mod history;
mod state;

pub use history::*;
pub use state::*;
