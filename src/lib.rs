//! MCP gateway in front of one Weaviate cluster, with optional Vertex AI
//! multimodal embeddings. All ranking and similarity math happens in the
//! external services; this crate does credential resolution, header
//! composition, token refresh and request/response marshalling.

pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod vertex;
pub mod weaviate;
