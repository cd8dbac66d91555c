// Declare the library modules
pub mod args;
pub mod bloom;
pub mod config;
pub mod count;
pub mod dump;
pub mod encode;
pub mod error;
pub mod fasta;
pub mod filter;
pub mod io;
pub mod logging;
pub mod merge;
pub mod parallel;
pub mod table;
pub mod utils;

pub use config::RunConfig;
pub use encode::MerCodec;
pub use error::{MerError, Result};
