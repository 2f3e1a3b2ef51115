//! 扫描与替换
//!
//! 分两步: [`scan`] 只读地遍历工作表, 收集 `(row, col, 新值)`;
//! [`apply`] 再按坐标写入, 最后逐行提交。

use std::collections::BTreeSet;

use crate::cell::{CellValue, RichTextRun};
use crate::markers::{Item, Resolver};
use crate::sheet::Sheet;

/// 一处修改
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

/// 一次扫描得到的全部修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn push(&mut self, row: u32, col: u32, value: CellValue) {
        self.changes.push(Change { row, col, value });
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }
}

/// 替换一个值中的标记, 没有变化时返回 None
///
/// 文本: 替换全部匹配; 富文本: 逐段替换, 至少一段变化时才重建;
/// 公式: 只替换公式源码, 缓存的结果保持不动。数字、日期等不处理。
pub fn substitute_value(value: &CellValue, resolver: &Resolver, item: Option<&Item>) -> Option<CellValue> {
    match value {
        CellValue::Text(text) => resolver.substitute(text, item).map(CellValue::Text),
        CellValue::RichText(runs) => {
            let mut changed = false;
            let runs: Vec<RichTextRun> = runs
                .iter()
                .map(|run| match resolver.substitute(&run.text, item) {
                    Some(text) => {
                        changed = true;
                        RichTextRun { text, ..run.clone() }
                    }
                    None => run.clone(),
                })
                .collect();
            changed.then_some(CellValue::RichText(runs))
        }
        CellValue::Formula { formula, cached } => resolver
            .substitute(formula, item)
            .map(|formula| CellValue::Formula { formula, cached: cached.clone() }),
        _ => None,
    }
}

/// 只读扫描, `skip_row` 指定的行不处理
pub fn scan(sheet: &Sheet, resolver: &Resolver, skip_row: Option<u32>) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (row_index, row) in sheet.rows() {
        if Some(row_index) == skip_row {
            continue;
        }
        for (col, cell) in row.cells() {
            if cell.value.is_empty() {
                continue;
            }
            if let Some(value) = substitute_value(&cell.value, resolver, None) {
                changes.push(row_index, col, value);
            }
        }
    }
    changes
}

/// 写入全部修改, 然后逐行提交
pub fn apply(sheet: &mut Sheet, changes: ChangeSet) {
    let mut touched = BTreeSet::new();
    for Change { row, col, value } in changes.changes {
        sheet.set_value(row, col, value);
        touched.insert(row);
    }
    for row in touched {
        sheet.commit_row(row);
    }
}
