//! Weaviate connection factory and query/response marshalling. All search
//! semantics (BM25, vector similarity, hybrid fusion) live in the cluster;
//! this module only builds requests and reshapes responses.

pub mod client;
pub mod query;

pub use client::{Connection, ConnectionFactory, GrpcMetadata, MetadataSink};
