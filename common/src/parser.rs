//! LLMレスポンスパーサー
//!
//! 推論文の末尾に付く `Yes!` / `No!` トークンから判定を取り出す。
//! 大文字小文字は区別する。

use crate::prompts::{NO_TOKEN, YES_TOKEN};
use serde::{Deserialize, Serialize};

/// レスポンス中に見つかった回答トークン
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictToken {
    Yes,
    No,
    /// どちらのトークンも無い
    Missing,
}

impl VerdictToken {
    /// 「検討に値する」と判定されたか
    ///
    /// トークンが無い場合は false（不採用）として扱う。
    pub fn accepted(&self) -> bool {
        matches!(self, VerdictToken::Yes)
    }
}

/// レスポンスから判定を取り出す
///
/// `Yes!` がどこかにあれば Yes（`No!` が併存していても優先）、
/// 無ければ `No!` で No、どちらも無ければ Missing。
pub fn parse_verdict(response: &str) -> VerdictToken {
    if response.contains(YES_TOKEN) {
        VerdictToken::Yes
    } else if response.contains(NO_TOKEN) {
        VerdictToken::No
    } else {
        VerdictToken::Missing
    }
}
