mod blobsize;
mod emit;
pub mod error;
mod filter;
mod gitutil;
mod lfs;
mod marks;
pub mod opts;
mod parser;
pub mod pathutil;
mod pipes;
mod reader;
mod record;
mod stream;

pub use error::{Result, RewriteError};
pub use opts::Options;

/// Rewrite the repository described by `opts`: export every object, drop or
/// convert the targeted blobs and every reference to them, and feed the
/// stitched-up stream to the importer.
pub fn run(opts: &Options) -> Result<()> {
  stream::run(opts)
}
