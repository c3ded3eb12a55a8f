//! Vertex credential handling: resolution, token minting, header
//! composition and the background refresh loop.

pub mod credentials;
pub mod headers;
pub mod refresher;
pub mod token;
