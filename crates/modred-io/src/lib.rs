//! I/O support for the modal reduction engine.
//!
//! This crate provides:
//! - **Model documents** describing a flexible subassembly (items, beams, links)
//! - **JSON helpers** for configuration and document persistence
//! - **Matrix dumps** (dense row-major text and 1-based sparse triplets)

pub mod document;
pub mod error;
mod json;
pub mod matrix_dump;

pub use document::{
    BeamDoc, ItemDoc, ItemKindDoc, LinkDoc, LinkKindDoc, MaterialDoc, ModelDocument,
    PartitionDoc, SectionDoc, SectionShapeDoc,
};
pub use error::{IoError, Result};
pub use json::{load_json, save_json};
pub use matrix_dump::{DenseMatrixData, read_dense_matrix, write_dense_matrix, write_triplets};
