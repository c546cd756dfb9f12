// ABOUTME: Command implementations for the flashback-capture CLI
// ABOUTME: Exports validate, discover, capture, and reset commands

pub mod capture;
pub mod discover;
pub mod reset;
pub mod validate;

pub use capture::capture;
pub use discover::discover;
pub use reset::reset;
pub use validate::validate;
