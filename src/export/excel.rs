//! Excel生成（rust_xlsxwriter）
//!
//! 1シートに候補1件1行。先頭に患者記述と閾値を置く。

use super::ExportDocument;
use crate::error::{Result, TrialMatchError};
use rust_xlsxwriter::*;
use std::path::Path;

const HEADERS: [(&str, f64); 8] = [
    ("順位", 6.0),
    ("NCT ID", 14.0),
    ("試験名", 60.0),
    ("状態", 22.0),
    ("開始日", 12.0),
    ("類似度", 10.0),
    ("レビュー", 10.0),
    ("URL", 44.0),
];

/// 表の開始行（0始まり）
const TABLE_ROW: u32 = 3;

fn xlsx_err(context: &str) -> impl Fn(XlsxError) -> TrialMatchError + '_ {
    move |e| TrialMatchError::Export(format!("{}: {}", context, e))
}

pub fn generate_excel(document: &ExportDocument, output_path: &Path) -> Result<()> {
    let buffer = generate_excel_buffer(document)?;
    std::fs::write(output_path, buffer)
        .map_err(|e| TrialMatchError::Export(format!("{}: {}", output_path.display(), e)))?;
    Ok(())
}

/// Excelをバッファに生成
pub fn generate_excel_buffer(document: &ExportDocument) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();

    let label_format = Format::new()
        .set_bold()
        .set_font_color(Color::RGB(0x555555));

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0xF5F5F5))
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin)
        .set_border_color(Color::RGB(0xAAAAAA));

    let cell_format = Format::new()
        .set_align(FormatAlign::VerticalCenter)
        .set_border(FormatBorder::Hair)
        .set_border_color(Color::RGB(0xCCCCCC));

    let wrap_format = cell_format.clone().set_text_wrap();
    let score_format = cell_format.clone().set_num_format("0.000");
    let accepted_format = cell_format.clone().set_font_color(Color::RGB(0x1B7F3B)).set_bold();
    let rejected_format = cell_format.clone().set_font_color(Color::RGB(0xB00020));

    let worksheet = workbook.add_worksheet();
    worksheet.set_name("候補試験").map_err(xlsx_err("シート名設定エラー"))?;

    worksheet
        .write_string_with_format(0, 0, "患者", &label_format)
        .map_err(xlsx_err("書き込みエラー"))?;
    worksheet
        .write_string(0, 1, &document.patient_summary)
        .map_err(xlsx_err("書き込みエラー"))?;
    worksheet
        .write_string_with_format(1, 0, "閾値", &label_format)
        .map_err(xlsx_err("書き込みエラー"))?;
    worksheet
        .write_number(1, 1, document.minimum_similarity)
        .map_err(xlsx_err("書き込みエラー"))?;

    for (col, (title, width)) in HEADERS.iter().enumerate() {
        let col = col as u16;
        worksheet
            .set_column_width(col, *width)
            .map_err(xlsx_err("列幅設定エラー"))?;
        worksheet
            .write_string_with_format(TABLE_ROW, col, *title, &header_format)
            .map_err(xlsx_err("ヘッダー書き込みエラー"))?;
    }

    for (i, record) in document.candidates.iter().enumerate() {
        let row = TABLE_ROW + 1 + i as u32;
        let review_format = match record.review {
            trial_match_common::ReviewFlag::Accepted => &accepted_format,
            trial_match_common::ReviewFlag::Rejected => &rejected_format,
            trial_match_common::ReviewFlag::Unknown => &cell_format,
        };

        worksheet
            .write_number_with_format(row, 0, record.rank as f64, &cell_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        worksheet
            .write_string_with_format(row, 1, &record.nct_id, &cell_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        worksheet
            .write_string_with_format(row, 2, &record.title, &wrap_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        worksheet
            .write_string_with_format(row, 3, &record.status, &cell_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        worksheet
            .write_string_with_format(row, 4, &record.start_date, &cell_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        worksheet
            .write_number_with_format(row, 5, record.score, &score_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        worksheet
            .write_string_with_format(row, 6, record.review.as_str(), review_format)
            .map_err(xlsx_err("書き込みエラー"))?;
        if !record.url.is_empty() {
            worksheet
                .write_url(row, 7, record.url.as_str())
                .map_err(xlsx_err("URL書き込みエラー"))?;
        }
    }

    worksheet
        .set_freeze_panes(TABLE_ROW + 1, 0)
        .map_err(xlsx_err("ウィンドウ枠固定エラー"))?;

    workbook
        .save_to_buffer()
        .map_err(xlsx_err("Excel保存エラー"))
}
