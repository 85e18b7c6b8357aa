//! Client-side session layer for the framed-TCP chat protocol.

pub mod session;

pub use session::Session;
