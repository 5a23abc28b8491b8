pub mod block;
pub mod fs;
pub mod fuse;
pub mod kernel;
