//! 区切りテキスト（CSV）の読み込み
//!
//! 試験の詳細説明は複数行にわたるため、引用符内の改行・カンマを
//! 1フィールドとして扱う。`""` は引用符1文字のエスケープ。

use crate::error::{Error, Result};
use std::collections::HashMap;

/// CSV文字列をレコード（フィールド配列）の列に分解
///
/// - 空行はスキップ
/// - CRLF改行も受け付ける
/// - 引用符が閉じられないまま終端に達した場合はエラー
pub fn parse_records(content: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1usize;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push('\n');
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                line += 1;
                finish_record(&mut records, &mut record, &mut field);
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(Error::Parse(format!("{}行目: 引用符が閉じられていません", line)));
    }
    finish_record(&mut records, &mut record, &mut field);

    Ok(records)
}

fn finish_record(records: &mut Vec<Vec<String>>, record: &mut Vec<String>, field: &mut String) {
    record.push(std::mem::take(field));
    let fields = std::mem::take(record);
    // 空行
    if fields.len() == 1 && fields[0].trim().is_empty() {
        return;
    }
    records.push(fields);
}

/// ヘッダー行（列名 → 列番号）
#[derive(Debug, Clone, Default)]
pub struct Header {
    columns: HashMap<String, usize>,
}

impl Header {
    pub fn from_record(record: &[String]) -> Self {
        let columns = record
            .iter()
            .enumerate()
            // BOM付きファイルの先頭列
            .map(|(i, name)| (name.trim().trim_start_matches('\u{feff}').to_string(), i))
            .collect();
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    /// 必須列の位置を取得
    pub fn require(&self, name: &str) -> Result<usize> {
        self.get(name).ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    /// 列名の一覧（列番号順）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, usize)> = self
            .columns
            .iter()
            .map(|(name, &i)| (name.as_str(), i))
            .collect();
        names.sort_by_key(|&(_, i)| i);
        names.into_iter().map(|(name, _)| name).collect()
    }
}

/// レコードからフィールドを取得（列が足りない行は空文字）
pub fn field(record: &[String], index: usize) -> &str {
    record.get(index).map(|s| s.as_str()).unwrap_or("")
}
