//! Persistence module
//!
//! Graph document save/load to JSON.

pub mod document;

pub use document::{
    ConnectionData, DocumentError, GraphDocument, NodeData, DOCUMENT_VERSION,
};
