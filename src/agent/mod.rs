// SYNOID Agent Modules
// Copyright (c) 2026 Xing_The_Creator | SYNOID

pub mod aligner;
pub mod classifier;
pub mod gpt_oss_bridge;
pub mod memory_index;
pub mod pipeline;
pub mod query_builder;
pub mod retry;
pub mod rewriter;
pub mod script;
pub mod services;
pub mod transcription;
pub mod vision_tools;
