//! Shader programs and their named sources.

mod library;
mod shader;

pub use library::{ShaderLibrary, ShaderSource, BUILTIN_BASIC};
pub use shader::Shader;
