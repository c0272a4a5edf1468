mod fusion;
mod pipeline;
mod prompt;

pub use fusion::fuse;
pub use pipeline::HybridRanker;
pub use prompt::{build_batch_prompt, debias_multiple_of_five, listing_summary, parse_llm_scores};
