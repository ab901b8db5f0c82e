pub mod cancel;
pub mod prompt;
pub mod respond;

pub use respond::{respond, spawn_respond};
