//! 商品行展开
//!
//! 替换之前先保存模板行的原始内容 ([`RowSnapshot`]), 每个商品都从这份快照生成一行。
//! 第一个商品写回模板行本身, 其余商品依次插入到上一行的下面。

use log::debug;

use crate::cell::{CachedValue, Cell, CellValue};
use crate::formula::{extend_ranges, offset_rows};
use crate::markers::{Item, Resolver};
use crate::scanner::substitute_value;
use crate::sheet::{Row, Sheet};
use crate::utils::CellRange;

/// 模板行的快照
#[derive(Debug, Clone)]
pub struct RowSnapshot {
    pub row: u32,
    cells: Vec<(u32, Cell)>,
    source: Row,
    /// 完全位于模板行内的合并区域
    merges: Vec<CellRange>,
}

impl RowSnapshot {
    pub fn capture(sheet: &Sheet, row: u32) -> Self {
        let source = sheet.row(row).cloned().unwrap_or_default();
        let cells = source.cells().map(|(col, cell)| (col, cell.clone())).collect();
        let merges = sheet
            .merges()
            .iter()
            .filter(|m| m.first_row == row && m.last_row == row)
            .copied()
            .collect();
        RowSnapshot {
            row,
            cells,
            source,
            merges,
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells.iter().map(|(col, cell)| (*col, cell))
    }
}

/// 展开选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpandOptions {
    /// 生成的行是否复制模板行的行高
    pub clone_row_height: bool,
}

/// 按商品展开模板行, 返回每个商品所在的行号 (与 items 顺序一致)
///
/// 有合计行时, 新行紧接在模板行下面, 位于合计行之前; 两者之间没有任何单元格的行直接填充,
/// 不再插入, 带样式的分隔行保留并下移。没有合计行时, 新行追加在最后一行之后。
/// 没有商品时, 模板行中的商品标记替换为空字符串, 不插入行。
///
/// 展开后, 商品行之外的公式中结束于模板行的区域 (`SUM(D6:D6)`) 延伸到最后一个商品行。
pub fn expand(
    sheet: &mut Sheet,
    snapshot: &RowSnapshot,
    totals_row: Option<u32>,
    items: &[Item],
    resolver: &Resolver,
    options: ExpandOptions,
) -> Vec<u32> {
    let anchor = snapshot.row;
    let Some((first, rest)) = items.split_first() else {
        fill_anchor(sheet, snapshot, &Item::new(), resolver);
        return Vec::new();
    };

    fill_anchor(sheet, snapshot, first, resolver);
    let mut rows = vec![anchor];

    let mut totals = totals_row;
    let mut previous = match totals {
        Some(_) => anchor,
        None => sheet.last_row().unwrap_or(anchor).max(anchor),
    };
    let mut inserted = 0;
    for item in rest {
        let target = previous + 1;
        let reusable = totals.is_some_and(|t| target < t) && sheet.row(target).is_none_or(Row::is_empty);
        if !reusable {
            sheet.insert_row(target);
            inserted += 1;
            if let Some(t) = totals.as_mut()
                && *t >= target
            {
                *t += 1;
            }
        }
        fill_row(sheet, snapshot, target, item, resolver, options);
        rows.push(target);
        previous = target;
    }

    // 只有商品行连续时才延伸, 追加到表尾的行中间隔着其它内容
    let extended = match rows.last() {
        Some(&last) if last > anchor && (last - anchor) as usize + 1 == rows.len() => {
            sheet.rewrite_formulas(|row| !rows.contains(&row), |formula| extend_ranges(formula, anchor, last))
        }
        _ => 0,
    };

    debug!(
        "expanded row {anchor} of {:?} into {} rows ({inserted} inserted, {extended} ranges extended), totals {totals_row:?} -> {totals:?}",
        sheet.name,
        rows.len()
    );
    rows
}

/// 第一个商品写回模板行, 没有标记的单元格保持原样
fn fill_anchor(sheet: &mut Sheet, snapshot: &RowSnapshot, item: &Item, resolver: &Resolver) {
    let mut changed = false;
    for (col, cell) in snapshot.cells() {
        if let Some(value) = substitute_value(&cell.value, resolver, Some(item)) {
            sheet.set_value(snapshot.row, col, value);
            changed = true;
        }
    }
    if changed {
        sheet.commit_row(snapshot.row);
    }
}

fn fill_row(
    sheet: &mut Sheet,
    snapshot: &RowSnapshot,
    target: u32,
    item: &Item,
    resolver: &Resolver,
    options: ExpandOptions,
) {
    for (col, cell) in snapshot.cells() {
        let value = substitute_value(&cell.value, resolver, Some(item)).unwrap_or_else(|| cell.value.clone());
        let value = relocate(value, snapshot.row, target);
        sheet.set_cell(target, col, cell.clone_with_value(value));
    }
    if options.clone_row_height {
        sheet.row_mut(target).copy_height_from(&snapshot.source);
    }
    for merge in &snapshot.merges {
        sheet.add_merge(CellRange {
            first_row: target,
            last_row: target,
            ..*merge
        });
    }
    sheet.commit_row(target);
}

/// 公式按复制语义移到新行: 相对行号整体偏移; 共享公式的从属单元格没有源码, 改用缓存值
fn relocate(value: CellValue, from: u32, to: u32) -> CellValue {
    match value {
        CellValue::Formula { formula, cached } if formula.is_empty() => match cached {
            Some(CachedValue::Number(n)) => CellValue::Number(n),
            Some(CachedValue::Text(text)) => CellValue::Text(text),
            Some(CachedValue::Boolean(b)) => CellValue::Boolean(b),
            Some(CachedValue::Error(e)) => CellValue::Error(e),
            None => CellValue::Empty,
        },
        CellValue::Formula { formula, cached } => CellValue::Formula {
            formula: offset_rows(&formula, i64::from(to) - i64::from(from)),
            cached,
        },
        other => other,
    }
}
