//! HTML 预览
//!
//! 只读: 把工作表投影成一个 `<table>`, 合并区域用 colspan/rowspan 表示。
//! 列宽统一为 100% / 列数。

use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use handlebars::{Handlebars, handlebars_helper};
use serde::Serialize;

use crate::cell::{CachedValue, CellStyle, CellValue};
use crate::errors::XlsxError;
use crate::sheet::{Sheet, format_number};
use crate::utils::CellRange;

const PREVIEW_TEMPLATE: &str = concat!(
    r#"<table class="xlsx-preview" data-sheet="{{sheet}}" style="border-collapse:collapse;table-layout:fixed;width:100%">"#,
    "<colgroup>{{#each columns}}<col style=\"width:{{../col_width}}\">{{/each}}</colgroup>",
    "<tbody>{{#each rows}}<tr>{{#each cells}}",
    "<td{{#if (gt colspan 1)}} colspan=\"{{colspan}}\"{{/if}}{{#if (gt rowspan 1)}} rowspan=\"{{rowspan}}\"{{/if}}",
    "{{#if style}} style=\"{{style}}\"{{/if}}>{{text}}</td>",
    "{{/each}}</tr>{{/each}}</tbody></table>"
);

#[derive(Debug, Serialize)]
struct PreviewTable {
    sheet: String,
    col_width: String,
    columns: Vec<u32>,
    rows: Vec<PreviewRow>,
}

#[derive(Debug, Serialize)]
struct PreviewRow {
    cells: Vec<PreviewCell>,
}

#[derive(Debug, Serialize)]
struct PreviewCell {
    text: String,
    colspan: u32,
    rowspan: u32,
    style: String,
}

/// 渲染一个工作表
pub fn preview_sheet(sheet: &Sheet) -> Result<String, XlsxError> {
    let table = build_table(sheet);

    let mut handlebars = Handlebars::new();
    handlebars_helper!(gt: |x: i64, y: i64| x > y);
    handlebars.register_helper("gt", Box::new(gt));
    handlebars
        .register_template_string("preview", PREVIEW_TEMPLATE)
        .map_err(|e| XlsxError::TemplateRenderError(e.to_string()))?;
    handlebars
        .render("preview", &table)
        .map_err(|e| XlsxError::TemplateRenderError(e.to_string()))
}

fn build_table(sheet: &Sheet) -> PreviewTable {
    let merges = sheet.merges();
    let max_row = merges
        .iter()
        .map(|m| m.last_row)
        .chain(sheet.last_row())
        .max()
        .unwrap_or(0);
    let max_col = merges
        .iter()
        .map(|m| m.last_col)
        .chain(sheet.last_col())
        .max()
        .unwrap_or(0);

    let mut consumed: HashSet<(u32, u32)> = HashSet::new();
    let mut rows = Vec::with_capacity(max_row as usize);
    for r in 1..=max_row {
        let mut cells = Vec::new();
        for c in 1..=max_col {
            if consumed.contains(&(r, c)) {
                continue;
            }
            let (colspan, rowspan) = match merges.iter().find(|m| m.first_row == r && m.first_col == c) {
                Some(merge) => {
                    consume(&mut consumed, merge);
                    (merge.width(), merge.height())
                }
                None => (1, 1),
            };
            let (text, style) = match sheet.cell(r, c) {
                Some(cell) => (display_text(&cell.value, &cell.style), css(&cell.style)),
                None => (String::new(), String::new()),
            };
            cells.push(PreviewCell {
                text,
                colspan,
                rowspan,
                style,
            });
        }
        rows.push(PreviewRow { cells });
    }

    let col_width = if max_col == 0 {
        "100%".to_string()
    } else {
        format!("{}%", format_number(((100.0 / max_col as f64) * 10000.0).round() / 10000.0))
    };
    PreviewTable {
        sheet: sheet.name.clone(),
        col_width,
        columns: (1..=max_col).collect(),
        rows,
    }
}

fn consume(consumed: &mut HashSet<(u32, u32)>, merge: &CellRange) {
    for r in merge.first_row..=merge.last_row {
        for c in merge.first_col..=merge.last_col {
            if (r, c) != (merge.first_row, merge.first_col) {
                consumed.insert((r, c));
            }
        }
    }
}

/// 单元格显示的文本
fn display_text(value: &CellValue, style: &CellStyle) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::Text(text) => text.clone(),
        CellValue::RichText(runs) => runs.iter().map(|r| r.text.as_str()).collect(),
        CellValue::Formula { cached, .. } => match cached {
            Some(CachedValue::Number(n)) => display_number(*n, style),
            Some(CachedValue::Text(text)) | Some(CachedValue::Error(text)) => text.clone(),
            Some(CachedValue::Boolean(b)) => display_bool(*b),
            None => String::new(),
        },
        CellValue::Number(n) => display_number(*n, style),
        CellValue::Date(serial) => display_date(*serial),
        CellValue::Boolean(b) => display_bool(*b),
        CellValue::Error(text) => text.clone(),
    }
}

fn display_number(n: f64, style: &CellStyle) -> String {
    match style.number_format.as_deref() {
        Some(format) if format.contains("0.00") => format!("{n:.2}"),
        _ => format_number(n),
    }
}

fn display_bool(b: bool) -> String {
    if b { "TRUE" } else { "FALSE" }.to_string()
}

/// Excel 日期序列号 -> DD-MM-YYYY (1900 日期系统)
fn display_date(serial: f64) -> String {
    let days = serial.floor();
    if !(0.0..2_958_466.0).contains(&days) {
        return format_number(serial);
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|base| base.checked_add_days(Days::new(days as u64)))
        .map(|date| date.format("%d-%m-%Y").to_string())
        .unwrap_or_else(|| format_number(serial))
}

/// 内联样式, 默认值、白色和黑色都省略
fn css(style: &CellStyle) -> String {
    let mut decls = Vec::new();
    if let Some(font) = &style.font {
        if font.bold {
            decls.push("font-weight:bold".to_string());
        }
        if font.italic {
            decls.push("font-style:italic".to_string());
        }
        if let Some(size) = font.size {
            decls.push(format!("font-size:{}pt", format_number(size)));
        }
        if let Some(color) = font.color.as_deref().and_then(css_color) {
            decls.push(format!("color:{color}"));
        }
    }
    if let Some(fill) = style.fill.as_deref().and_then(css_color) {
        decls.push(format!("background-color:{fill}"));
    }
    if let Some(alignment) = &style.alignment {
        match alignment.horizontal.as_deref() {
            Some("center") | Some("centerContinuous") => decls.push("text-align:center".to_string()),
            Some("right") => decls.push("text-align:right".to_string()),
            Some("left") => decls.push("text-align:left".to_string()),
            Some("justify") | Some("distributed") => decls.push("text-align:justify".to_string()),
            _ => {}
        }
        if alignment.wrap_text {
            decls.push("white-space:pre-wrap".to_string());
        }
    }
    if let Some(border) = &style.border {
        for (side, line) in [
            ("left", &border.left),
            ("right", &border.right),
            ("top", &border.top),
            ("bottom", &border.bottom),
        ] {
            if let Some(line) = line {
                let width = match line.as_str() {
                    "medium" | "thick" | "double" => 2,
                    _ => 1,
                };
                decls.push(format!("border-{side}:{width}px solid #000"));
            }
        }
    }
    decls.join(";")
}

/// ARGB / RGB -> #RRGGBB; 白色和黑色返回 None
fn css_color(argb: &str) -> Option<String> {
    let rgb = match argb.len() {
        8 => &argb[2..],
        6 => argb,
        _ => return None,
    };
    if !rgb.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let rgb = rgb.to_ascii_uppercase();
    if rgb == "FFFFFF" || rgb == "000000" {
        return None;
    }
    Some(format!("#{rgb}"))
}
