//! Request handlers.

pub mod fonts;
pub mod health;
pub mod tasks;
pub mod upload;

pub use fonts::*;
pub use health::*;
pub use tasks::*;
pub use upload::*;
