//! 商品模板行和合计行的定位

use crate::cell::CellValue;
use crate::markers::{MARKER_RE, TOTALS_MARKERS, is_item_marker, marker_names};
use crate::sheet::Sheet;

/// 第一个含有任一 `anchor_markers` 的行
pub fn find_anchor_row<S: AsRef<str>>(sheet: &Sheet, anchor_markers: &[S]) -> Option<u32> {
    sheet
        .rows()
        .find(|(_, row)| {
            row.cells().any(|(_, cell)| {
                cell.value.marker_text().is_some_and(|text| {
                    marker_names(&text).any(|name| anchor_markers.iter().any(|m| m.as_ref() == name))
                })
            })
        })
        .map(|(index, _)| index)
}

/// `after` 之后第一个合计行: 含合计标记, 或文本中含有 "TOTAL" (不区分大小写)
pub fn find_totals_row(sheet: &Sheet, after: u32) -> Option<u32> {
    sheet
        .rows()
        .filter(|(index, _)| *index > after)
        .find(|(_, row)| row.cells().any(|(_, cell)| is_totals_cell(&cell.value)))
        .map(|(index, _)| index)
}

fn is_totals_cell(value: &CellValue) -> bool {
    let Some(text) = value.marker_text() else {
        return false;
    };
    if marker_names(&text).any(|name| TOTALS_MARKERS.contains(&name)) {
        return true;
    }
    // 公式里的 SUBTOTAL() 之类不算标签
    if matches!(value, CellValue::Formula { .. }) {
        return false;
    }
    // 商品标记 (如 PRODUCTO_TOTAL) 不算标签
    let label = MARKER_RE.replace_all(&text, |caps: &regex::Captures| {
        let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        if is_item_marker(name) { String::new() } else { caps[0].to_string() }
    });
    label.to_ascii_uppercase().contains("TOTAL")
}
