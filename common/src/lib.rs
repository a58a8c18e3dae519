//! Trial Match Common Library
//!
//! CLIと将来のフロントエンドで共有される型とユーティリティ

pub mod types;
pub mod table;
pub mod ranking;
pub mod prompts;
pub mod parser;
pub mod error;

pub use types::{CandidateRow, ReviewFlag, ScoredTrial, SimilarityScores, Trial};
pub use table::{parse_records, Header};
pub use ranking::rank_candidates;
pub use prompts::{build_review_prompt, REVIEW_SYSTEM_PROMPT};
pub use parser::{parse_verdict, VerdictToken};
pub use error::{Error, Result};
