pub mod batch_api_client;
pub mod qdrant_client;
pub mod qwen_client;
pub mod voyage_client;
