//! データファイルの取得（ローカルに無ければオブジェクトストレージから）

use crate::config::Config;
use crate::error::{Result, TrialMatchError};
use reqwest::Client;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// これより小さいファイルは取得に失敗した残骸とみなす
const MIN_FILE_SIZE: u64 = 50;

const SERVICE_NAME: &str = "オブジェクトストレージ";

/// 取得結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub downloaded: Vec<PathBuf>,
    pub present: Vec<PathBuf>,
}

/// 再取得が必要か
pub fn needs_fetch(path: &Path, force: bool) -> bool {
    if force {
        return true;
    }
    match std::fs::metadata(path) {
        Ok(meta) => !meta.is_file() || meta.len() < MIN_FILE_SIZE,
        Err(_) => true,
    }
}

/// 3つのデータファイルを揃える
pub async fn ensure_data_files(config: &Config, force: bool) -> Result<SyncReport> {
    let files = [&config.patients_file, &config.trials_file, &config.similarity_file];
    let mut report = SyncReport::default();
    let client = Client::builder().build()?;

    for name in files {
        let local = config.data_dir.join(name);
        if !needs_fetch(&local, force) {
            report.present.push(local);
            continue;
        }

        let Some(base_url) = config.object_store_url.as_deref() else {
            return Err(TrialMatchError::DataLoad(format!(
                "{} がありません（OBJECT_STORE_URL 未設定のため取得できません）",
                local.display()
            )));
        };

        download(&client, base_url, config.object_store_token.as_deref(), name, &local).await?;
        report.downloaded.push(local);
    }

    Ok(report)
}

async fn download(client: &Client, base_url: &str, token: Option<&str>, name: &str, local: &Path) -> Result<()> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), name);
    tracing::info!(url = %url, "データファイルを取得します");

    let mut request = client.get(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TrialMatchError::RemoteService {
            service: SERVICE_NAME,
            status: status.as_u16(),
            body,
        });
    }
    let bytes = response.bytes().await?;
    let size = bytes.len();

    let target = local.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
        .await
        .map_err(|e| TrialMatchError::Internal(e.to_string()))??;

    tracing::debug!(path = %local.display(), bytes = size, "保存しました");
    Ok(())
}

/// 同じディレクトリの一時ファイルに書いてから置き換える（途中で失敗しても壊れたファイルを残さない）
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
