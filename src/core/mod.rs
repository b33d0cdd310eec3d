pub mod archive;
pub mod commands;
pub mod competency_loader;
pub mod document_matcher;
pub mod errors;
pub mod field_synthesizer;
pub mod identity_extractor;
pub mod llm_client;
pub mod models;
pub mod name_normalizer;
pub mod ocr;
pub mod pdf;
pub mod prompts;
pub mod report;
pub mod result_assembler;
pub mod service;
pub mod settings_store;
pub mod similarity;
pub mod slide_renderer;
pub mod spreadsheet;
