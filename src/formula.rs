//! 公式中单元格引用的行号改写
//!
//! 只处理 A1 样式的引用。字符串常量、函数名 (LOG10) 和名称 (Tax_2024) 中形似引用的部分不改。

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// 工作表最大行号
const MAX_ROW: i64 = 1_048_576;

static CELL_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\$?[A-Z]{1,3})(\$?)([0-9]+)").unwrap());

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\$?[A-Z]{1,3}\$?)([0-9]+):(\$?[A-Z]{1,3}\$?)([0-9]+)").unwrap());

/// 公式中的一个单元格引用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowRef {
    pub row: u32,
    /// 行号前有 `$`
    pub absolute: bool,
    /// 指向其它工作表 (`Hoja2!A1`, `'Hoja 2'!A1:B2`)
    pub qualified: bool,
}

/// 用 `map` 计算每个引用的新行号
pub(crate) fn map_rows<F>(formula: &str, mut map: F) -> String
where
    F: FnMut(RowRef) -> u32,
{
    map_outside_strings(formula, |out, segment| {
        let mut last = 0;
        // 上一个引用的结束位置及其是否带工作表前缀, 区域的后半段沿用
        let mut previous: Option<(usize, bool)> = None;
        for caps in CELL_REF_RE.captures_iter(segment) {
            let Some(whole) = caps.get(0) else { continue };
            if !is_standalone(segment, whole.start(), whole.end()) {
                continue;
            }
            let Ok(row) = caps[3].parse::<u32>() else { continue };
            let before = segment[..whole.start()].chars().next_back();
            let qualified = before == Some('!')
                || (before == Some(':') && previous.is_some_and(|(end, q)| q && end + 1 == whole.start()));
            previous = Some((whole.end(), qualified));

            let mapped = map(RowRef {
                row,
                absolute: !caps[2].is_empty(),
                qualified,
            });
            if mapped == row {
                continue;
            }
            out.push_str(&segment[last..whole.start()]);
            out.push_str(&caps[1]);
            out.push_str(&caps[2]);
            out.push_str(&mapped.to_string());
            last = whole.end();
        }
        out.push_str(&segment[last..]);
    })
}

/// 复制公式到 `delta` 行之外: 相对行号整体偏移, 绝对行号不变
pub(crate) fn offset_rows(formula: &str, delta: i64) -> String {
    map_rows(formula, |r| {
        if r.absolute {
            r.row
        } else {
            (i64::from(r.row) + delta).clamp(1, MAX_ROW) as u32
        }
    })
}

/// 在 `at` 处插入 `count` 行之后, 本表中指向 `at` 及以下的引用 (包括绝对引用) 下移
pub(crate) fn insert_rows(formula: &str, at: u32, count: u32) -> String {
    map_rows(formula, |r| if !r.qualified && r.row >= at { r.row + count } else { r.row })
}

/// 商品行展开后延伸区域: 起始行不晚于 `first`、结束行落在 `first..last` 之间的区域,
/// 结束行改为 `last`。`SUM(D6:D6)` 展开到第 8 行后为 `SUM(D6:D8)`。
pub(crate) fn extend_ranges(formula: &str, first: u32, last: u32) -> String {
    map_outside_strings(formula, |out, segment| {
        let replaced = RANGE_RE.replace_all(segment, |caps: &Captures| {
            let whole = &caps[0];
            let (Some(m), Ok(start), Ok(end)) = (caps.get(0), caps[2].parse::<u32>(), caps[4].parse::<u32>()) else {
                return whole.to_string();
            };
            let qualified = segment[..m.start()].ends_with('!');
            if qualified || !is_standalone(segment, m.start(), m.end()) {
                return whole.to_string();
            }
            if start <= first && (first..last).contains(&end) {
                format!("{}{start}:{}{last}", &caps[1], &caps[3])
            } else {
                whole.to_string()
            }
        });
        out.push_str(&replaced);
    })
}

/// 按双引号切分, 只对引号外的部分调用 `f`
fn map_outside_strings<F>(formula: &str, mut f: F) -> String
where
    F: FnMut(&mut String, &str),
{
    let mut out = String::with_capacity(formula.len() + 8);
    for (i, segment) in formula.split('"').enumerate() {
        if i > 0 {
            out.push('"');
        }
        if i % 2 == 1 {
            out.push_str(segment);
        } else {
            f(&mut out, segment);
        }
    }
    out
}

fn is_standalone(segment: &str, start: usize, end: usize) -> bool {
    let before = segment[..start].chars().next_back();
    let after = segment[end..].chars().next();
    !before.is_some_and(is_name_char) && !after.is_some_and(|c| is_name_char(c) || c == '(')
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}
