pub mod chunk;
pub mod program;
