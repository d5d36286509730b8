//! On-disk proxy bundles: XML documents, directory layout, archives.

pub mod archive;
pub mod filesystem;
pub mod parser;
pub mod writer;
pub mod xml;

pub use parser::parse_bundle;
