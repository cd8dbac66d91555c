// Utility functions
pub mod hash;
pub mod io;
pub mod timing;
