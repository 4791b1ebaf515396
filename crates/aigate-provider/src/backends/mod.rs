pub mod claude;
pub mod gemini;
pub mod kiro;
pub mod openai;
pub mod qwen;

pub use claude::ClaudeAdapter;
pub use gemini::GeminiAdapter;
pub use kiro::KiroAdapter;
pub use openai::OpenAIAdapter;
pub use qwen::QwenAdapter;
