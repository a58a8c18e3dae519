//! ログ初期化
//!
//! 画面向けの進捗・結果は println!、診断ログは tracing に出す。
//! `RUST_LOG` が優先、未設定なら warn（`--verbose` で debug）。

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };

    // 二重初期化（テスト等）は無視
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
