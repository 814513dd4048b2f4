pub mod gemini;

pub use gemini::{GeminiClient, GeminiEmbedder, DEFAULT_GEMINI_URL};
