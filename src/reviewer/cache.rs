//! レビュー結果キャッシュモジュール
//!
//! (患者記述, 試験サマリ) の完全一致テキストをキーにLLMの判定を保存し、
//! 同じ組み合わせの再問い合わせをスキップする。エントリは追記のみで失効しない。

use crate::error::{Result, TrialMatchError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tempfile::NamedTempFile;

/// ファイルの読み込み→マージ→書き込みをプロセス内で直列化する
static SAVE_LOCK: Mutex<()> = Mutex::new(());

/// キャッシュファイルの構造
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    /// バージョン（互換性チェック用）
    version: u32,
    /// キー（SHA-256） → 判定
    entries: HashMap<String, CacheEntry>,
}

/// キャッシュエントリ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 「検討に値する」か
    pub verdict: bool,
    /// 記録日時（RFC 3339）
    pub reviewed_at: String,
}

impl CacheFile {
    const CURRENT_VERSION: u32 = 1;

    fn read(path: &Path) -> Option<Self> {
        let file = File::open(path).ok()?;
        let cache: CacheFile = match serde_json::from_reader(BufReader::new(file)) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "キャッシュを読めません、空で開始します");
                return None;
            }
        };
        // バージョンチェック
        if cache.version != Self::CURRENT_VERSION {
            tracing::warn!(version = cache.version, "キャッシュバージョン不一致、再生成します");
            return None;
        }
        Some(cache)
    }
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            entries: HashMap::new(),
        }
    }
}

/// レビュー結果キャッシュ
///
/// 同一プロセス内の複数セッションから共有できる。書き込みはプロセス内で
/// 直列化し、プロセス間はロックしない（同じ内容の重複書き込みになるだけ）。
#[derive(Debug)]
pub struct ReviewCache {
    path: PathBuf,
    file: RwLock<CacheFile>,
}

impl ReviewCache {
    /// キャッシュファイルを読み込み（無い・壊れている場合は空）
    pub fn load(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: RwLock::new(CacheFile::read(path).unwrap_or_default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// キャッシュをルックアップ
    pub fn get(&self, patient_text: &str, trial_text: &str) -> Option<bool> {
        let key = cache_key(patient_text, trial_text);
        let file = self.file.read().unwrap_or_else(|e| e.into_inner());
        file.entries.get(&key).map(|e| e.verdict)
    }

    /// キャッシュに追加して即座に保存
    pub fn put(&self, patient_text: &str, trial_text: &str, verdict: bool) -> Result<()> {
        let key = cache_key(patient_text, trial_text);
        let entry = CacheEntry {
            verdict,
            reviewed_at: chrono::Utc::now().to_rfc3339(),
        };

        self.file
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .insert(key, entry);
        self.save()
    }

    /// `put` をブロッキング用スレッドで実行する（非同期タスクから呼ぶ用）
    pub async fn record(self: &Arc<Self>, patient_text: &str, trial_text: &str, verdict: bool) -> Result<()> {
        let cache = Arc::clone(self);
        let (patient_text, trial_text) = (patient_text.to_string(), trial_text.to_string());
        tokio::task::spawn_blocking(move || cache.put(&patient_text, &trial_text, verdict))
            .await
            .map_err(|e| TrialMatchError::Internal(e.to_string()))?
    }

    /// 保存（他のインスタンス・プロセスが書いたエントリを取り込んでから置き換える）
    ///
    /// ファイル入出力の間はメモリ上のキャッシュをロックしない。
    fn save(&self) -> Result<()> {
        let _guard = SAVE_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let on_disk = CacheFile::read(&self.path).map(|f| f.entries).unwrap_or_default();
        let mut snapshot = self.file.read().unwrap_or_else(|e| e.into_inner()).clone();
        for (key, entry) in &on_disk {
            snapshot.entries.entry(key.clone()).or_insert_with(|| entry.clone());
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        // 書き込みごとに別名の一時ファイルを作り、最後に置き換える
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, &snapshot)?;
            writer.flush()?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;

        let mut file = self.file.write().unwrap_or_else(|e| e.into_inner());
        for (key, entry) in on_disk {
            file.entries.entry(key).or_insert(entry);
        }
        Ok(())
    }

    /// キャッシュ件数
    pub fn len(&self) -> usize {
        self.file.read().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// キャッシュファイルを削除
    pub fn clear(path: &Path) -> Result<bool> {
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// キャッシュキー: 長さ付きで連結した2つのテキストのSHA-256
///
/// 境界をずらした組 ("ab", "c") と ("a", "bc") は別キーになる。
pub fn cache_key(patient_text: &str, trial_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((patient_text.len() as u64).to_le_bytes());
    hasher.update(patient_text.as_bytes());
    hasher.update((trial_text.len() as u64).to_le_bytes());
    hasher.update(trial_text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_is_exact() {
        let base = cache_key("patient", "trial");
        assert_eq!(base, cache_key("patient", "trial"));
        assert_ne!(base, cache_key("patienT", "trial"));
        assert_ne!(base, cache_key("patient", "trial "));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_cache_key_boundary() {
        assert_ne!(cache_key("ab", "c"), cache_key("a", "bc"));
    }

    #[test]
    fn test_put_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("cache.json");

        let cache = ReviewCache::load(&path);
        cache.put("p", "t", true).expect("保存失敗");
        assert!(path.exists());
    }

    #[test]
    fn test_save_merges_other_writers() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("cache.json");

        // 2つのセッションが同じファイルを使う
        let first = ReviewCache::load(&path);
        let second = ReviewCache::load(&path);
        first.put("p1", "t1", true).unwrap();
        second.put("p2", "t2", false).unwrap();

        let reloaded = ReviewCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("p1", "t1"), Some(true));
        assert_eq!(reloaded.get("p2", "t2"), Some(false));
    }

    #[test]
    fn test_parallel_writers_keep_all_entries() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("cache.json");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = ReviewCache::load(&path);
                std::thread::spawn(move || {
                    for j in 0..5 {
                        cache.put(&format!("p{}", i), &format!("t{}", j), j % 2 == 0).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reloaded = ReviewCache::load(&path);
        assert_eq!(reloaded.len(), 20);
        assert_eq!(reloaded.get("p3", "t4"), Some(true));
        // 一時ファイルは残らない
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_record_from_async_task() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("cache.json");
        let cache = Arc::new(ReviewCache::load(&path));

        cache.record("p", "t", true).await.unwrap();

        assert_eq!(cache.get("p", "t"), Some(true));
        assert_eq!(ReviewCache::load(&path).get("p", "t"), Some(true));
    }
}
