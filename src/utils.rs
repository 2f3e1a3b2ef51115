use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::BytesStart;

use crate::errors::XlsxError;

/// 验证 XLSX 文件格式
/// 检查文件是否为非空并且具有 ZIP 文件签名
pub(crate) fn validate_xlsx_format(file_data: &[u8]) -> Result<(), XlsxError> {
    if file_data.is_empty() {
        return Err(XlsxError::TemplateLoad("template file is empty (0 bytes)".to_string()));
    }

    // 检查文件大小, ZIP 至少包含一个 22 字节的目录结束记录
    if file_data.len() < 22 {
        return Err(XlsxError::TemplateLoad(format!(
            "template file is truncated ({} bytes)",
            file_data.len()
        )));
    }

    // 检查 ZIP 文件签名
    // ZIP 文件的签名通常是 0x504B0304 (PK..) 或 0x504B0506 (PK.. 空文件)
    // 或者 0x504B0708 (PK.. 分割压缩包)
    let signature = u32::from_le_bytes([
        file_data[0], file_data[1], file_data[2], file_data[3]
    ]);

    match signature {
        0x04034b50 | 0x06054b50 | 0x08074b50 => Ok(()),
        _ => Err(XlsxError::TemplateLoad("template file is not a ZIP container".to_string())),
    }
}

/// 合并单元格范围, 行列均从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl CellRange {
    /// 解析 "B2:D4" 或者单个单元格 "B2"
    pub fn parse(reference: &str) -> Option<Self> {
        let (start, end) = reference.split_once(':').unwrap_or((reference, reference));
        let (first_row, first_col) = parse_cell_ref(start)?;
        let (last_row, last_col) = parse_cell_ref(end)?;
        Some(CellRange {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        })
    }

    pub fn width(&self) -> u32 {
        self.last_col - self.first_col + 1
    }

    pub fn height(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        row >= self.first_row && row <= self.last_row && col >= self.first_col && col <= self.last_col
    }

    pub fn to_a1(&self) -> String {
        format!(
            "{}:{}",
            cell_ref(self.first_row, self.first_col),
            cell_ref(self.last_row, self.last_col)
        )
    }
}

/// 从 worksheet 的尾部 XML 中提取并移除 mergeCells 标签
///
/// 返回:
/// 1. 去除标签后的 XML
/// 2. 合并范围列表
/// 3. 原标签所在位置, 写回时在这里重新生成 mergeCells
pub(crate) fn extract_and_remove_merge_cells(
    sheet_xml: &str,
) -> (String, Vec<CellRange>, Option<usize>) {
    let mut merges = Vec::new();

    let Some(start) = find_tag(sheet_xml, "mergeCells") else {
        return (sheet_xml.to_string(), merges, None);
    };
    let after_start = &sheet_xml[start..];

    // 完整标签 <mergeCells>...</mergeCells> 或者自闭合标签 <mergeCells ... />
    let close_tag = closing_tag_for(after_start, "mergeCells");
    let block_len = match after_start.find(&close_tag) {
        Some(end) => end + close_tag.len(),
        None => match after_start.find("/>") {
            Some(end) => end + "/>".len(),
            None => return (sheet_xml.to_string(), merges, None),
        },
    };
    let block = &after_start[..block_len];

    // 提取所有 ref 属性
    let mut pos = 0;
    while let Some(ref_pos) = block[pos..].find("ref=\"") {
        let abs_ref_pos = pos + ref_pos + 5;
        if let Some(quote_pos) = block[abs_ref_pos..].find('"') {
            let ref_value = &block[abs_ref_pos..abs_ref_pos + quote_pos];
            if let Some(range) = CellRange::parse(ref_value) {
                merges.push(range);
            }
            pos = abs_ref_pos + quote_pos;
        } else {
            break;
        }
    }

    let result_xml = format!("{}{}", &sheet_xml[..start], &sheet_xml[start + block_len..]);
    (result_xml, merges, Some(start))
}

/// 查找标签起始位置, 兼容带命名空间前缀的写法 (如 <x:mergeCells)
pub(crate) fn find_tag(xml: &str, local_name: &str) -> Option<usize> {
    let mut pos = 0;
    while let Some(offset) = xml[pos..].find('<') {
        let abs = pos + offset;
        let rest = &xml[abs + 1..];
        let name_end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        let local = name.rsplit(':').next().unwrap_or(name);
        if local == local_name && !name.starts_with('/') {
            return Some(abs);
        }
        pos = abs + 1;
    }
    None
}

/// 根据起始标签的前缀构造结束标签, "<x:mergeCells" -> "</x:mergeCells>"
fn closing_tag_for(tag_start: &str, local_name: &str) -> String {
    let qualified_len = tag_start[1..]
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(tag_start.len() - 1);
    let qualified = &tag_start[1..1 + qualified_len];
    if qualified.ends_with(local_name) {
        format!("</{qualified}>")
    } else {
        format!("</{local_name}>")
    }
}

/// 替换标签中某个属性的值, 标签或属性不存在时返回 None
pub(crate) fn replace_attr_in_tag(xml: &str, local_name: &str, attr: &str, value: &str) -> Option<String> {
    let tag_start = find_tag(xml, local_name)?;
    let tag_end = tag_start + xml[tag_start..].find('>')?;
    let pattern = format!(" {attr}=\"");
    let attr_pos = tag_start + xml[tag_start..tag_end].find(&pattern)? + pattern.len();
    let attr_end = attr_pos + xml[attr_pos..].find('"')?;
    let mut out = String::with_capacity(xml.len() + value.len());
    out.push_str(&xml[..attr_pos]);
    out.push_str(value);
    out.push_str(&xml[attr_end..]);
    Some(out)
}

/// 在 Excel 的 sheet.xml 中列名
/// 传入当前列名和一个增量，返回新的列名
/// 用于生成 Excel 列名，如 A, B, ..., Z, AA, AB, ..., ZZ, AAA, ...
pub fn to_column_name(current: &str, increment: u32) -> String {
  let col_index = to_column_index(current) + increment;

  let mut new_col_name = String::new();
  let mut n = col_index;
  while n > 0 {
    let rem = (n - 1) % 26;
    new_col_name.push((b'A' + rem as u8) as char);
    n = (n - 1) / 26;
  }

  new_col_name.chars().rev().collect()
}

/// 在 Excel 的 sheet.xml 中列名
/// 传入当前列名传入字母，返回对应的列索引 (1-based)
pub fn to_column_index(col_name: &str) -> u32 {
  let mut col_index = 0u32;
  for ch in col_name.chars() {
    if !ch.is_ascii_uppercase() {
      break;
    }
    col_index = col_index * 26 + (ch as u8 - b'A' + 1) as u32;
  }
  col_index
}

/// 单元格引用, (10, 2) -> "B10"
pub fn cell_ref(row: u32, col: u32) -> String {
  format!("{}{}", to_column_name("A", col.saturating_sub(1)), row)
}

/// 解析单元格引用, "B10" -> (10, 2), 允许 $ 绝对引用标记
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
  let reference = reference.trim().replace('$', "");
  let split = reference.find(|c: char| c.is_ascii_digit())?;
  let (letters, digits) = reference.split_at(split);
  if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_uppercase()) {
    return None;
  }
  let row: u32 = digits.parse().ok()?;
  let col = to_column_index(letters);
  if row == 0 || col == 0 {
    return None;
  }
  Some((row, col))
}

/// 读取元素的某个属性 (按本地名匹配), 返回反转义后的值
pub(crate) fn xml_attr(e: &BytesStart, name: &[u8]) -> Result<Option<String>, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name {
            let raw = std::str::from_utf8(&attr.value)?;
            return Ok(Some(quick_xml::escape::unescape(raw)?.into_owned()));
        }
    }
    Ok(None)
}

/// 元素的全部属性, 键保留前缀, 值保持转义后的原样
pub(crate) fn raw_attrs(e: &BytesStart) -> Result<Vec<(String, String)>, XlsxError> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        let value = std::str::from_utf8(&attr.value)?.to_string();
        attrs.push((key, value));
    }
    Ok(attrs)
}

/// 读取当前元素的内部原始内容 (起止标签之间), 读取后 reader 位于结束标签之后
pub(crate) fn read_inner<'a>(
    reader: &mut Reader<&'a [u8]>,
    xml: &'a str,
    e: &BytesStart,
) -> Result<&'a str, XlsxError> {
    let span = reader.read_to_end(e.name())?;
    Ok(&xml[span.start as usize..span.end as usize])
}

/// 读取文本元素 (如 <t>) 的内容并反转义
pub(crate) fn read_text<'a>(
    reader: &mut Reader<&'a [u8]>,
    xml: &'a str,
    e: &BytesStart,
) -> Result<String, XlsxError> {
    let inner = read_inner(reader, xml, e)?;
    Ok(quick_xml::escape::unescape(inner)?.into_owned())
}

/// 布尔属性, 缺省视为 true (如 <b/>), "0" 和 "false" 视为 false
pub(crate) fn xml_flag(e: &BytesStart) -> Result<bool, XlsxError> {
    Ok(!matches!(xml_attr(e, b"val")?.as_deref(), Some("0") | Some("false")))
}

/// XML 文本转义
pub(crate) fn escape_xml(text: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(text)
}

/// 判断文本首尾是否有空白, 需要 xml:space="preserve"
pub(crate) fn needs_preserve(text: &str) -> bool {
    text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) || text.contains('\n')
}
