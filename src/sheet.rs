//! 工作表: 稀疏的行列网格, 合并区域, 以及 sheet.xml 的读写
//!
//! 读取时 sheetData 之前和之后的 XML 原样保留, 只有 sheetData 和 mergeCells 会重新生成。
//! 未修改的单元格保留原始 XML, 写回时只重新计算 r 属性。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use regex::{Captures, Regex};

use crate::cell::{CachedValue, Cell, CellValue, RawCell, RichTextRun};
use crate::errors::XlsxError;
use crate::formula::insert_rows;
use crate::shared_strings::parse_string_item;
use crate::styles::StyleSheet;
use crate::utils::{
    CellRange, cell_ref, escape_xml, extract_and_remove_merge_cells, find_tag, needs_preserve, parse_cell_ref,
    raw_attrs, read_inner, read_text, replace_attr_in_tag, xml_attr,
};

/// 单元格内的 `<f>`, 共享公式的从属单元格是自闭合的, 不匹配
static FORMULA_ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(<(?:[A-Za-z0-9_]+:)?f\b)([^>]*?)>([^<]*)(</(?:[A-Za-z0-9_]+:)?f>)").unwrap());

/// ref / sqref 属性, 超链接、条件格式、数据验证、autoFilter 用
static REF_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(\s(?:sq)?ref=")([^"]*)(")"#).unwrap());

/// 条件格式和数据验证中的公式, 以及 extLst 中的 xm:sqref / xm:f
static TAIL_FORMULA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(<(?:[A-Za-z0-9_]+:)?(?:formula[12]?|sqref|f)>)([^<]*)(</)").unwrap()
});

/// mergeCells 在 worksheet 中必须位于这些元素之前
const AFTER_MERGE_CELLS: &[&str] = &[
    "phoneticPr",
    "conditionalFormatting",
    "dataValidations",
    "hyperlinks",
    "printOptions",
    "pageMargins",
    "pageSetup",
    "headerFooter",
    "rowBreaks",
    "colBreaks",
    "drawing",
    "legacyDrawing",
    "tableParts",
    "extLst",
];

/// 一行
#[derive(Debug, Clone, Default)]
pub struct Row {
    cells: BTreeMap<u32, Cell>,
    /// 行高 (ht), 没有时使用工作表默认行高
    pub height: Option<f64>,
    /// 除 r 之外的原始属性
    attrs: Vec<(String, String)>,
}

impl Row {
    pub fn cells(&self) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells.iter().map(|(col, cell)| (*col, cell))
    }

    pub fn cell(&self, col: u32) -> Option<&Cell> {
        self.cells.get(&col)
    }

    /// 没有任何单元格; 只有样式的空单元格也算内容
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// 提交一行的修改: 刷新 spans 提示, 使其覆盖当前所有单元格
    pub fn commit(&mut self) {
        let (Some(first), Some(last)) = (self.cells.keys().next().copied(), self.cells.keys().last().copied()) else {
            self.attrs.retain(|(k, _)| k != "spans");
            return;
        };
        if let Some((_, spans)) = self.attrs.iter_mut().find(|(k, _)| k == "spans") {
            *spans = format!("{first}:{last}");
        }
    }

    /// 复制行高属性 (ht / customHeight)
    pub(crate) fn copy_height_from(&mut self, other: &Row) {
        self.height = other.height;
        for (key, value) in &other.attrs {
            if key == "ht" || key == "customHeight" {
                self.attrs.retain(|(k, _)| k != key);
                self.attrs.push((key.clone(), value.clone()));
            }
        }
    }
}

/// 工作表
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub(crate) path: String,
    rows: BTreeMap<u32, Row>,
    merges: Vec<CellRange>,
    pub default_row_height: Option<f64>,
    /// <sheetData> 之前的 XML
    head: String,
    /// </sheetData> 之后的 XML, 不含 mergeCells
    tail: String,
    /// mergeCells 原来在 tail 中的位置
    merge_slot: Option<usize>,
    /// 命名空间前缀, 如 "x:"
    prefix: String,
    modified: bool,
}

impl Sheet {
    /// 创建一个空白工作表
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            path: String::new(),
            rows: BTreeMap::new(),
            merges: Vec::new(),
            default_row_height: None,
            head: concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                "\n",
                r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#
            )
            .to_string(),
            tail: "</worksheet>".to_string(),
            merge_slot: None,
            prefix: String::new(),
            modified: true,
        }
    }

    /// 解析 sheet.xml
    pub(crate) fn parse(
        name: &str,
        path: &str,
        xml: &str,
        shared_strings: &[CellValue],
        styles: &StyleSheet,
    ) -> Result<Self, XlsxError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut sheet = Sheet::new(name);
        sheet.path = path.to_string();
        sheet.modified = false;

        let tail_start;
        loop {
            let pos = reader.buffer_position() as usize;
            match reader.read_event()? {
                Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheetFormatPr" => {
                    sheet.default_row_height =
                        xml_attr(&e, b"defaultRowHeight")?.and_then(|v| v.parse().ok());
                }
                Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                    sheet.prefix = qualified_prefix(&e, "sheetData")?;
                    sheet.head = xml[..pos].to_string();
                    sheet.read_rows(&mut reader, xml, shared_strings, styles)?;
                    tail_start = reader.buffer_position() as usize;
                    break;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                    sheet.prefix = qualified_prefix(&e, "sheetData")?;
                    sheet.head = xml[..pos].to_string();
                    tail_start = reader.buffer_position() as usize;
                    break;
                }
                Event::Eof => return Err(XlsxError::malformed(path, "missing <sheetData>")),
                _ => {}
            }
        }

        let (tail, merges, merge_slot) = extract_and_remove_merge_cells(&xml[tail_start..]);
        sheet.tail = tail;
        sheet.merges = merges;
        sheet.merge_slot = merge_slot;
        Ok(sheet)
    }

    fn read_rows<'a>(
        &mut self,
        reader: &mut Reader<&'a [u8]>,
        xml: &'a str,
        shared_strings: &[CellValue],
        styles: &StyleSheet,
    ) -> Result<(), XlsxError> {
        let mut last_row = 0u32;
        loop {
            match reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == b"row" => {
                    let (index, mut row) = row_from_tag(&e, last_row)?;
                    read_cells(reader, xml, &mut row, index, shared_strings, styles)?;
                    self.rows.insert(index, row);
                    last_row = index;
                }
                Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                    let (index, row) = row_from_tag(&e, last_row)?;
                    self.rows.insert(index, row);
                    last_row = index;
                }
                Event::End(e) if e.local_name().as_ref() == b"sheetData" => return Ok(()),
                Event::Eof => return Err(XlsxError::malformed(&self.path, "unterminated <sheetData>")),
                _ => {}
            }
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = (u32, &Row)> {
        self.rows.iter().map(|(index, row)| (*index, row))
    }

    pub fn row(&self, index: u32) -> Option<&Row> {
        self.rows.get(&index)
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.rows.get(&row).and_then(|r| r.cells.get(&col))
    }

    /// 最后一个存在的行号
    pub fn last_row(&self) -> Option<u32> {
        self.rows.keys().next_back().copied()
    }

    /// 最大列号
    pub fn last_col(&self) -> Option<u32> {
        self.rows.values().filter_map(|r| r.cells.keys().next_back().copied()).max()
    }

    pub fn merges(&self) -> &[CellRange] {
        &self.merges
    }

    pub fn add_merge(&mut self, range: CellRange) {
        if !self.merges.contains(&range) {
            self.merges.push(range);
            self.modified = true;
        }
    }

    /// 非空单元格数量
    pub fn non_empty_cells(&self) -> usize {
        self.rows
            .values()
            .flat_map(|r| r.cells.values())
            .filter(|c| !c.value.is_empty())
            .count()
    }

    /// 是否有任何修改
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// 按坐标写入值, 保留原有样式; 单元格不存在时新建
    pub fn set_value(&mut self, row: u32, col: u32, value: CellValue) {
        let cells = &mut self.rows.entry(row).or_default().cells;
        match cells.get_mut(&col) {
            Some(cell) => cell.set_value(value),
            None => {
                cells.insert(col, Cell::new(value, Default::default()));
            }
        }
        self.modified = true;
    }

    /// 按坐标写入完整的单元格
    pub fn set_cell(&mut self, row: u32, col: u32, cell: Cell) {
        self.rows.entry(row).or_default().cells.insert(col, cell);
        self.modified = true;
    }

    /// 提交一行的修改
    pub fn commit_row(&mut self, index: u32) {
        if let Some(row) = self.rows.get_mut(&index) {
            row.commit();
            self.modified = true;
        }
    }

    pub(crate) fn row_mut(&mut self, index: u32) -> &mut Row {
        self.modified = true;
        self.rows.entry(index).or_default()
    }

    /// 在 `at` 处插入一个空行, 原来 `at` 及之后的行整体下移一行
    ///
    /// 位于插入点之下的合并区域下移; 跨过插入点的合并区域向下扩展一行。
    pub fn insert_row(&mut self, at: u32) {
        let moved = self.rows.split_off(&at);
        for (index, row) in moved {
            self.rows.insert(index + 1, row);
        }
        self.rows.insert(at, Row::default());

        for merge in &mut self.merges {
            if merge.first_row >= at {
                merge.first_row += 1;
                merge.last_row += 1;
            } else if merge.last_row >= at {
                merge.last_row += 1;
            }
        }

        self.rewrite_formulas(|_| true, |formula| insert_rows(formula, at, 1));
        self.tail = rewrite_tail_refs(&self.tail, |refs| insert_rows(refs, at, 1));
        self.modified = true;
    }

    /// 改写 `rows` 所选行中单元格的公式, 返回改动的单元格数
    ///
    /// 原样保留的单元格直接修改原始 XML 中的 `<f>`, 共享公式主单元格的 ref 一并改写,
    /// 其它属性 (t="shared", si) 不变。
    pub(crate) fn rewrite_formulas<R, F>(&mut self, rows: R, rewrite: F) -> usize
    where
        R: Fn(u32) -> bool,
        F: Fn(&str) -> String,
    {
        let mut changed = 0;
        for (_, row) in self.rows.iter_mut().filter(|(index, _)| rows(**index)) {
            for cell in row.cells.values_mut() {
                let CellValue::Formula { formula, .. } = &mut cell.value else {
                    continue;
                };
                let rewritten = if formula.is_empty() {
                    None
                } else {
                    Some(rewrite(formula)).filter(|f| f.as_str() != formula.as_str())
                };
                let mut touched = rewritten.is_some();
                if let Some(f) = rewritten {
                    *formula = f;
                }

                let patched = cell
                    .raw
                    .as_ref()
                    .and_then(|raw| raw.inner.as_deref())
                    .map(|inner| patch_formula_element(inner, &rewrite).filter(|xml| xml != inner));
                match patched {
                    Some(Some(xml)) => {
                        if let Some(raw) = cell.raw.as_mut() {
                            raw.inner = Some(xml);
                        }
                        touched = true;
                    }
                    // 原始 XML 改不了, 改为按模型重新生成
                    Some(None) if touched => cell.mark_dirty(),
                    _ => {}
                }
                if touched {
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.modified = true;
        }
        changed
    }

    /// 生成 sheet.xml
    pub fn to_xml(&self) -> String {
        let p = &self.prefix;
        let mut out = String::with_capacity(self.head.len() + self.tail.len() + self.rows.len() * 256);

        match self.dimension() {
            Some(dimension) => {
                out.push_str(&replace_attr_in_tag(&self.head, "dimension", "ref", &dimension).unwrap_or_else(|| self.head.clone()))
            }
            None => out.push_str(&self.head),
        }

        if self.rows.is_empty() {
            let _ = write!(out, "<{p}sheetData/>");
        } else {
            let _ = write!(out, "<{p}sheetData>");
            for (index, row) in &self.rows {
                write_row(&mut out, p, *index, row);
            }
            let _ = write!(out, "</{p}sheetData>");
        }

        let merges = self.merge_cells_xml();
        match self.merge_slot.or_else(|| self.default_merge_slot()) {
            Some(slot) if !merges.is_empty() => {
                out.push_str(&self.tail[..slot]);
                out.push_str(&merges);
                out.push_str(&self.tail[slot..]);
            }
            _ => out.push_str(&self.tail),
        }
        out
    }

    fn dimension(&self) -> Option<String> {
        let first_row = *self.rows.iter().find(|(_, r)| !r.cells.is_empty())?.0;
        let last_row = *self.rows.iter().rev().find(|(_, r)| !r.cells.is_empty())?.0;
        let first_col = self.rows.values().filter_map(|r| r.cells.keys().next().copied()).min()?;
        let last_col = self.last_col()?;
        let range = CellRange {
            first_row,
            first_col,
            last_row,
            last_col,
        };
        if range.width() == 1 && range.height() == 1 {
            return Some(cell_ref(first_row, first_col));
        }
        Some(range.to_a1())
    }

    fn merge_cells_xml(&self) -> String {
        if self.merges.is_empty() {
            return String::new();
        }
        let p = &self.prefix;
        let mut out = format!(r#"<{p}mergeCells count="{}">"#, self.merges.len());
        for merge in &self.merges {
            let _ = write!(out, r#"<{p}mergeCell ref="{}"/>"#, merge.to_a1());
        }
        let _ = write!(out, "</{p}mergeCells>");
        out
    }

    /// 模板原本没有 mergeCells 时, 找到符合 schema 顺序的插入位置
    fn default_merge_slot(&self) -> Option<usize> {
        AFTER_MERGE_CELLS
            .iter()
            .filter_map(|name| find_tag(&self.tail, name))
            .min()
            .or_else(|| self.tail.rfind("</"))
    }
}

/// 改写单元格内 `<f>` 的文本和 ref 属性; 没有 `<f>` 或文本无法解码时返回 None
fn patch_formula_element<F: Fn(&str) -> String>(inner: &str, rewrite: &F) -> Option<String> {
    let caps = FORMULA_ELEMENT_RE.captures(inner)?;
    let whole = caps.get(0)?;
    let attrs = REF_ATTR_RE.replace(&caps[2], |c: &Captures| format!("{}{}{}", &c[1], rewrite(&c[2]), &c[3]));
    let text = unescape(&caps[3]).ok()?;
    let rewritten = rewrite(&text);
    let escaped = if rewritten == text { Cow::Borrowed(&caps[3]) } else { escape_xml(&rewritten) };
    Some(format!(
        "{}{}{}>{}{}{}",
        &inner[..whole.start()],
        &caps[1],
        attrs,
        escaped,
        &caps[4],
        &inner[whole.end()..]
    ))
}

/// 改写 sheetData 之后的区域引用和公式
fn rewrite_tail_refs<F: Fn(&str) -> String>(tail: &str, rewrite: F) -> String {
    let tail = REF_ATTR_RE.replace_all(tail, |c: &Captures| format!("{}{}{}", &c[1], rewrite(&c[2]), &c[3]));
    TAIL_FORMULA_RE
        .replace_all(&tail, |c: &Captures| match unescape(&c[2]) {
            Ok(text) => {
                let rewritten = rewrite(&text);
                if rewritten == text {
                    c[0].to_string()
                } else {
                    format!("{}{}{}", &c[1], escape_xml(&rewritten), &c[3])
                }
            }
            Err(_) => c[0].to_string(),
        })
        .into_owned()
}

fn qualified_prefix(e: &BytesStart, local: &str) -> Result<String, XlsxError> {
    let name = e.name();
    let qualified = std::str::from_utf8(name.as_ref())?;
    Ok(qualified.strip_suffix(local).unwrap_or("").to_string())
}

fn row_from_tag(e: &BytesStart, last_row: u32) -> Result<(u32, Row), XlsxError> {
    let mut row = Row::default();
    let mut index = last_row + 1;
    for (key, value) in raw_attrs(e)? {
        match key.as_str() {
            "r" => index = value.parse().unwrap_or(index),
            "ht" => {
                row.height = value.parse().ok();
                row.attrs.push((key, value));
            }
            _ => row.attrs.push((key, value)),
        }
    }
    Ok((index, row))
}

fn read_cells<'a>(
    reader: &mut Reader<&'a [u8]>,
    xml: &'a str,
    row: &mut Row,
    row_index: u32,
    shared_strings: &[CellValue],
    styles: &StyleSheet,
) -> Result<(), XlsxError> {
    let mut last_col = 0u32;
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let attrs = raw_attrs(&e)?;
                let inner = read_inner(reader, xml, &e)?;
                let (col, cell) = build_cell(attrs, Some(inner), row_index, last_col, shared_strings, styles)?;
                row.cells.insert(col, cell);
                last_col = col;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let attrs = raw_attrs(&e)?;
                let (col, cell) = build_cell(attrs, None, row_index, last_col, shared_strings, styles)?;
                row.cells.insert(col, cell);
                last_col = col;
            }
            Event::Start(e) => {
                reader.read_to_end(e.name())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => return Ok(()),
            Event::Eof => return Err(XlsxError::malformed("row", "unterminated <row>")),
            _ => {}
        }
    }
}

fn build_cell(
    attrs: Vec<(String, String)>,
    inner: Option<&str>,
    row_index: u32,
    last_col: u32,
    shared_strings: &[CellValue],
    styles: &StyleSheet,
) -> Result<(u32, Cell), XlsxError> {
    let mut col = last_col + 1;
    let mut cell_type: Option<&str> = None;
    let mut xf_index: Option<u32> = None;
    let mut kept = Vec::with_capacity(attrs.len());
    for (key, value) in &attrs {
        match key.as_str() {
            "r" => {
                if let Some((r, c)) = parse_cell_ref(value)
                    && r == row_index
                {
                    col = c;
                }
            }
            "t" => cell_type = Some(value.as_str()),
            "s" => xf_index = value.parse().ok(),
            _ => {}
        }
        if key != "r" {
            kept.push((key.clone(), value.clone()));
        }
    }

    let is_date = styles.is_date_style(xf_index);
    let value = match inner {
        Some(inner) => decode_value(cell_type, inner, shared_strings, is_date)?,
        None => CellValue::Empty,
    };

    let cell = Cell {
        value,
        style: styles.resolve(xf_index),
        raw: Some(RawCell {
            attrs: kept,
            inner: inner.map(str::to_string),
        }),
        extra_attrs: Vec::new(),
    };
    Ok((col, cell))
}

/// 按单元格类型 t 解析 <c> 的内容
fn decode_value(
    cell_type: Option<&str>,
    inner: &str,
    shared_strings: &[CellValue],
    is_date: bool,
) -> Result<CellValue, XlsxError> {
    let mut reader = Reader::from_str(inner);
    reader.config_mut().trim_text(false);

    let mut v: Option<String> = None;
    let mut formula: Option<String> = None;
    let mut inline: Option<CellValue> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"v" => v = Some(read_text(&mut reader, inner, &e)?),
                b"f" => formula = Some(read_text(&mut reader, inner, &e)?),
                b"is" => inline = Some(parse_string_item(&mut reader, inner, b"is")?),
                _ => {
                    reader.read_to_end(e.name())?;
                }
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"v" => v = Some(String::new()),
                b"f" => formula = Some(String::new()),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(formula) = formula {
        let cached = v.map(|v| match cell_type {
            Some("str") | Some("inlineStr") => CachedValue::Text(v),
            Some("b") => CachedValue::Boolean(v == "1"),
            Some("e") => CachedValue::Error(v),
            _ => match v.parse() {
                Ok(n) => CachedValue::Number(n),
                Err(_) => CachedValue::Text(v),
            },
        });
        return Ok(CellValue::Formula { formula, cached });
    }

    let value = match cell_type {
        Some("s") => {
            let index: usize = v
                .as_deref()
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| XlsxError::malformed("cell", "shared string cell without index"))?;
            shared_strings
                .get(index)
                .cloned()
                .ok_or_else(|| XlsxError::malformed("cell", format!("shared string index {index} out of range")))?
        }
        Some("inlineStr") => inline.unwrap_or_else(|| CellValue::Text(String::new())),
        Some("str") | Some("d") => CellValue::Text(v.unwrap_or_default()),
        Some("b") => CellValue::Boolean(v.as_deref() == Some("1")),
        Some("e") => CellValue::Error(v.unwrap_or_default()),
        _ => match v.as_deref().map(str::trim) {
            None | Some("") => CellValue::Empty,
            Some(text) => match text.parse::<f64>() {
                Ok(n) if is_date => CellValue::Date(n),
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::Text(text.to_string()),
            },
        },
    };
    Ok(value)
}

fn write_row(out: &mut String, p: &str, index: u32, row: &Row) {
    let _ = write!(out, r#"<{p}row r="{index}""#);
    for (key, value) in &row.attrs {
        let _ = write!(out, r#" {key}="{value}""#);
    }
    if row.cells.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for (col, cell) in &row.cells {
        write_cell(out, p, &cell_ref(index, *col), cell);
    }
    let _ = write!(out, "</{p}row>");
}

fn write_cell(out: &mut String, p: &str, reference: &str, cell: &Cell) {
    let _ = write!(out, r#"<{p}c r="{reference}""#);

    // 未修改的单元格: 原样输出
    if let Some(raw) = &cell.raw {
        for (key, value) in &raw.attrs {
            let _ = write!(out, r#" {key}="{value}""#);
        }
        match &raw.inner {
            Some(inner) => {
                let _ = write!(out, ">{inner}</{p}c>");
            }
            None => out.push_str("/>"),
        }
        return;
    }

    if let Some(xf) = cell.style.xf_index {
        let _ = write!(out, r#" s="{xf}""#);
    }
    let cell_type = match &cell.value {
        CellValue::Text(_) | CellValue::RichText(_) => Some("inlineStr"),
        CellValue::Boolean(_) => Some("b"),
        CellValue::Error(_) => Some("e"),
        CellValue::Formula { cached, .. } => match cached {
            Some(CachedValue::Text(_)) => Some("str"),
            Some(CachedValue::Boolean(_)) => Some("b"),
            Some(CachedValue::Error(_)) => Some("e"),
            _ => None,
        },
        _ => None,
    };
    if let Some(t) = cell_type {
        let _ = write!(out, r#" t="{t}""#);
    }
    for (key, value) in &cell.extra_attrs {
        let _ = write!(out, r#" {key}="{value}""#);
    }

    let mut body = String::new();
    match &cell.value {
        CellValue::Empty => {}
        CellValue::Text(text) => {
            let _ = write!(body, "<{p}is>");
            write_t(&mut body, p, text);
            let _ = write!(body, "</{p}is>");
        }
        CellValue::RichText(runs) => {
            let _ = write!(body, "<{p}is>");
            for run in runs {
                write_run(&mut body, p, run);
            }
            let _ = write!(body, "</{p}is>");
        }
        CellValue::Formula { formula, cached } => {
            // 共享公式的从属单元格没有公式文本, 只保留缓存值
            if !formula.is_empty() {
                let _ = write!(body, "<{p}f>{}</{p}f>", escape_xml(formula));
            }
            match cached {
                Some(CachedValue::Number(n)) => {
                    let _ = write!(body, "<{p}v>{}</{p}v>", format_number(*n));
                }
                Some(CachedValue::Text(text)) | Some(CachedValue::Error(text)) => {
                    let _ = write!(body, "<{p}v>{}</{p}v>", escape_xml(text));
                }
                Some(CachedValue::Boolean(b)) => {
                    let _ = write!(body, "<{p}v>{}</{p}v>", u8::from(*b));
                }
                None => {}
            }
        }
        CellValue::Number(n) | CellValue::Date(n) => {
            let _ = write!(body, "<{p}v>{}</{p}v>", format_number(*n));
        }
        CellValue::Boolean(b) => {
            let _ = write!(body, "<{p}v>{}</{p}v>", u8::from(*b));
        }
        CellValue::Error(text) => {
            let _ = write!(body, "<{p}v>{}</{p}v>", escape_xml(text));
        }
    }

    if body.is_empty() {
        out.push_str("/>");
    } else {
        let _ = write!(out, ">{body}</{p}c>");
    }
}

fn write_t(out: &mut String, p: &str, text: &str) {
    if needs_preserve(text) {
        let _ = write!(out, r#"<{p}t xml:space="preserve">{}</{p}t>"#, escape_xml(text));
    } else {
        let _ = write!(out, "<{p}t>{}</{p}t>", escape_xml(text));
    }
}

fn write_run(out: &mut String, p: &str, run: &RichTextRun) {
    let _ = write!(out, "<{p}r>");
    if let Some(props) = &run.raw_props {
        out.push_str(props);
    }
    write_t(out, p, &run.text);
    let _ = write!(out, "</{p}r>");
}

/// 数字输出: 整数不带小数点
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><dimension ref="A1:C3"/><sheetFormatPr defaultRowHeight="15"/><sheetData><row r="1" spans="1:3"><c r="A1" t="s"><v>0</v></c><c r="B1" s="1"><v>42</v></c><c r="C1" t="inlineStr"><is><t>{{VIAJE}}</t></is></c></row><row r="2" ht="20" customHeight="1"><c r="A2"><f>SUM(B1:B1)</f><v>42</v></c><c r="B2" s="1"/></row><row r="3"><c r="A3" t="b"><v>1</v></c><c r="B3" t="str"><f>"A"&amp;"B"</f><v>AB</v></c></row></sheetData><mergeCells count="1"><mergeCell ref="B2:C3"/></mergeCells><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#;

    fn parse() -> Sheet {
        let shared = vec![CellValue::Text("{{EXPORTADOR_NOMBRE}}".into())];
        Sheet::parse("Hoja1", "xl/worksheets/sheet1.xml", SHEET, &shared, &StyleSheet::default()).unwrap()
    }

    #[test]
    fn parses_all_value_shapes() {
        let sheet = parse();
        assert_eq!(sheet.cell(1, 1).unwrap().value, CellValue::Text("{{EXPORTADOR_NOMBRE}}".into()));
        assert_eq!(sheet.cell(1, 2).unwrap().value, CellValue::Number(42.0));
        assert_eq!(sheet.cell(1, 2).unwrap().style.xf_index, Some(1));
        assert_eq!(sheet.cell(1, 3).unwrap().value, CellValue::Text("{{VIAJE}}".into()));
        assert_eq!(
            sheet.cell(2, 1).unwrap().value,
            CellValue::Formula {
                formula: "SUM(B1:B1)".into(),
                cached: Some(CachedValue::Number(42.0))
            }
        );
        assert_eq!(sheet.cell(2, 2).unwrap().value, CellValue::Empty);
        assert_eq!(sheet.cell(3, 1).unwrap().value, CellValue::Boolean(true));
        assert_eq!(
            sheet.cell(3, 2).unwrap().value,
            CellValue::Formula {
                formula: "\"A\"&\"B\"".into(),
                cached: Some(CachedValue::Text("AB".into()))
            }
        );
        assert_eq!(sheet.non_empty_cells(), 6);
        assert_eq!(sheet.default_row_height, Some(15.0));
        assert_eq!(sheet.row(2).unwrap().height, Some(20.0));
        assert_eq!(sheet.merges(), &[CellRange::parse("B2:C3").unwrap()]);
    }

    #[test]
    fn untouched_sheet_round_trips() {
        let sheet = parse();
        assert!(!sheet.is_modified());
        assert_eq!(sheet.to_xml(), SHEET);
    }

    #[test]
    fn insert_row_shifts_rows_and_merges() {
        let mut sheet = parse();
        sheet.insert_row(2);
        assert!(sheet.row(2).unwrap().cells().next().is_none());
        assert_eq!(sheet.cell(3, 1).unwrap().value, CellValue::Formula {
            formula: "SUM(B1:B1)".into(),
            cached: Some(CachedValue::Number(42.0))
        });
        assert_eq!(sheet.cell(4, 1).unwrap().value, CellValue::Boolean(true));
        assert_eq!(sheet.merges(), &[CellRange::parse("B3:C4").unwrap()]);

        let xml = sheet.to_xml();
        assert!(xml.contains(r#"<dimension ref="A1:C4"/>"#));
        assert!(xml.contains(r#"<row r="2"/>"#));
        // 原样保留的单元格只更新引用
        assert!(xml.contains(r#"<c r="A3"><f>SUM(B1:B1)</f><v>42</v></c>"#));
        assert!(xml.contains(r#"<mergeCell ref="B3:C4"/>"#));
        assert!(xml.ends_with(r#"<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></worksheet>"#));
    }

    #[test]
    fn insert_row_inside_merge_grows_it() {
        let mut sheet = parse();
        sheet.insert_row(3);
        assert_eq!(sheet.merges(), &[CellRange::parse("B2:C4").unwrap()]);
    }

    #[test]
    fn insert_row_moves_references_below_the_insertion_point() {
        let xml = r#"<worksheet><sheetData><row r="6"><c r="D6"><f>A6*C6</f><v>10</v></c></row><row r="7"><c r="D7"><f>SUM(D6:D6)</f><v>10</v></c></row><row r="8"><c r="D8"><f>D7*0.19</f><v>1.9</v></c><c r="E8"><f t="shared" ref="E8:E9" si="0">D8&gt;$D$7</f><v>0</v></c></row><row r="9"><c r="E9"><f t="shared" si="0"/><v>0</v></c></row></sheetData><conditionalFormatting sqref="D6:D8"><cfRule type="expression" priority="1"><formula>$D7&gt;100</formula></cfRule></conditionalFormatting><hyperlinks><hyperlink ref="A9" location="Hoja2!A9"/></hyperlinks></worksheet>"#;
        let mut sheet = Sheet::parse("S", "x", xml, &[], &StyleSheet::default()).unwrap();
        sheet.insert_row(7);

        let formula = |row, col| match &sheet.cell(row, col).unwrap().value {
            CellValue::Formula { formula, .. } => formula.clone(),
            other => panic!("expected formula at {row},{col}, got {other:?}"),
        };
        assert_eq!(formula(6, 4), "A6*C6");
        assert_eq!(formula(8, 4), "SUM(D6:D6)");
        assert_eq!(formula(9, 4), "D8*0.19");
        assert_eq!(formula(9, 5), "D9>$D$8");
        assert!(sheet.cell(9, 5).unwrap().is_pristine());

        let out = sheet.to_xml();
        assert!(out.contains(r#"<c r="D6"><f>A6*C6</f><v>10</v></c>"#));
        assert!(out.contains(r#"<c r="D9"><f>D8*0.19</f><v>1.9</v></c>"#));
        // 共享公式的主单元格保持 t="shared", 范围随之下移
        assert!(out.contains(r#"<c r="E9"><f t="shared" ref="E9:E10" si="0">D9&gt;$D$8</f><v>0</v></c>"#));
        assert!(out.contains(r#"<c r="E10"><f t="shared" si="0"/><v>0</v></c>"#));
        assert!(out.contains(r#"<conditionalFormatting sqref="D6:D9">"#));
        assert!(out.contains("<formula>$D8&gt;100</formula>"));
        assert!(out.contains(r#"<hyperlink ref="A10" location="Hoja2!A9"/>"#));
    }

    #[test]
    fn rewriting_formulas_only_touches_selected_rows() {
        let mut sheet = parse();
        let changed = sheet.rewrite_formulas(|row| row == 3, |f| f.replace('A', "Z"));
        // 字符串公式 "A"&"B" 在第 3 行, 第 2 行的 SUM 不动
        assert_eq!(changed, 1);
        assert_eq!(sheet.cell(2, 1).unwrap().value, CellValue::Formula {
            formula: "SUM(B1:B1)".into(),
            cached: Some(CachedValue::Number(42.0))
        });
        assert!(sheet.to_xml().contains(r#"<c r="B3" t="str"><f>&quot;Z&quot;&amp;&quot;B&quot;</f><v>AB</v></c>"#));
    }

    #[test]
    fn styled_blank_cells_keep_a_row_occupied() {
        let sheet = parse();
        assert!(!sheet.row(2).unwrap().is_empty());
        assert!(Row::default().is_empty());
    }

    #[test]
    fn modified_cells_are_written_inline() {
        let mut sheet = parse();
        sheet.set_value(1, 1, CellValue::Text("AGRICOLA <SUR> & CIA".into()));
        sheet.set_value(1, 3, CellValue::RichText(vec![
            RichTextRun::plain(" 024W"),
            RichTextRun {
                text: "E".into(),
                font: None,
                raw_props: Some("<rPr><b/></rPr>".into()),
            },
        ]));
        sheet.commit_row(1);
        let xml = sheet.to_xml();
        assert!(xml.contains(r#"<row r="1" spans="1:3">"#));
        assert!(xml.contains(r#"<c r="A1" t="inlineStr"><is><t>AGRICOLA &lt;SUR&gt; &amp; CIA</t></is></c>"#));
        assert!(xml.contains(r#"<c r="C1" t="inlineStr"><is><r><t xml:space="preserve"> 024W</t></r><r><rPr><b/></rPr><t>E</t></r></is></c>"#));

        // 重新解析后值一致
        let reparsed = Sheet::parse("Hoja1", "x", &xml, &[], &StyleSheet::default()).unwrap();
        assert_eq!(reparsed.cell(1, 1).unwrap().value, CellValue::Text("AGRICOLA <SUR> & CIA".into()));
    }

    #[test]
    fn keeps_namespace_prefix() {
        let xml = r#"<x:worksheet xmlns:x="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><x:sheetData><x:row r="1"><x:c r="A1" t="inlineStr"><x:is><x:t>{{CSP}}</x:t></x:is></x:c></x:row></x:sheetData></x:worksheet>"#;
        let mut sheet = Sheet::parse("S", "x", xml, &[], &StyleSheet::default()).unwrap();
        assert_eq!(sheet.cell(1, 1).unwrap().value, CellValue::Text("{{CSP}}".into()));
        sheet.set_value(1, 1, CellValue::Text("CSP-1".into()));
        let out = sheet.to_xml();
        assert!(out.contains(r#"<x:c r="A1" t="inlineStr"><x:is><x:t>CSP-1</x:t></x:is></x:c>"#));
    }

    #[test]
    fn empty_sheet_data_is_supported() {
        let xml = r#"<worksheet><sheetData/><pageMargins/></worksheet>"#;
        let mut sheet = Sheet::parse("S", "x", xml, &[], &StyleSheet::default()).unwrap();
        assert_eq!(sheet.non_empty_cells(), 0);
        sheet.set_value(2, 2, CellValue::Number(1.5));
        assert_eq!(
            sheet.to_xml(),
            r#"<worksheet><sheetData><row r="2"><c r="B2"><v>1.5</v></c></row></sheetData><pageMargins/></worksheet>"#
        );
    }

    #[test]
    fn formats_numbers() {
        assert_eq!(format_number(35000.0), "35000");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-3.0), "-3");
    }
}
