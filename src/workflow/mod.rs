//! 入力 → 類似度取得 → 候補作成 → レビュー の流れを管理する
//!
//! 状態遷移は `WorkflowState::apply` に集約し、I/O を伴う処理は
//! `Controller` が副作用として実行する。

mod controller;
mod state;

pub use controller::{Controller, RunOutcome, WorkflowNotice, WorkflowSettings, WorkflowSnapshot};
pub use state::{Candidates, Effect, Screen, WorkflowEvent, WorkflowFlags, WorkflowState};
