pub mod error;
pub mod gemini;
pub mod generator;
pub mod media;

pub use error::GenerationError;
pub use gemini::GeminiApi;
pub use generator::MediaGenerator;
