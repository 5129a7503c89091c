pub mod app;
pub mod config;
pub mod domain;
pub mod entrez;
pub mod error;
pub mod geo;
pub mod keywords;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod writer;
