pub mod advice;
pub mod app;
pub mod config;
pub mod detection;
pub mod draw;
pub mod error;
pub mod intake;
pub mod model;
pub mod openai;
pub mod overrides;
pub mod pipeline;
pub mod render;
pub mod storage;
pub mod utils;
