//! styles.xml 解析
//!
//! 只读取解析单元格样式所需的部分: numFmts、fonts、fills、borders、cellXfs。
//! styles.xml 本身不会被改写, 复制样式时沿用 cellXfs 下标。

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::cell::{AlignmentStyle, BorderStyle, CellStyle, FontStyle};
use crate::errors::XlsxError;
use crate::utils::{xml_attr, xml_flag};

/// cellXfs 中的一条记录
#[derive(Debug, Clone, Default)]
struct XfRecord {
    num_fmt_id: u32,
    font_id: Option<usize>,
    fill_id: Option<usize>,
    border_id: Option<usize>,
    alignment: Option<AlignmentStyle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    None,
    Fonts,
    Fills,
    Borders,
    CellStyleXfs,
    CellXfs,
}

/// 解析后的样式表
#[derive(Debug, Clone, Default)]
pub struct StyleSheet {
    num_fmts: HashMap<u32, String>,
    fonts: Vec<FontStyle>,
    fills: Vec<Option<String>>,
    borders: Vec<BorderStyle>,
    cell_xfs: Vec<XfRecord>,
}

impl StyleSheet {
    pub fn parse(xml: &str) -> Result<Self, XlsxError> {
        let mut sheet = StyleSheet::default();
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut section = Section::None;
        // 当前正在读取的 font / fill / border / xf
        let mut font: Option<FontStyle> = None;
        let mut fill: Option<Option<String>> = None;
        let mut fill_solid = false;
        let mut border: Option<BorderStyle> = None;
        let mut xf: Option<XfRecord> = None;

        loop {
            let (e, empty) = match reader.read_event()? {
                Event::Start(e) => (e, false),
                Event::Empty(e) => (e, true),
                Event::End(e) => {
                    match e.local_name().as_ref() {
                        b"fonts" | b"fills" | b"borders" | b"cellXfs" | b"cellStyleXfs" => section = Section::None,
                        b"font" if section == Section::Fonts => sheet.fonts.extend(font.take()),
                        b"fill" if section == Section::Fills => sheet.fills.extend(fill.take()),
                        b"border" if section == Section::Borders => sheet.borders.extend(border.take()),
                        b"xf" if section == Section::CellXfs => sheet.cell_xfs.extend(xf.take()),
                        _ => {}
                    }
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };

            match (section, e.local_name().as_ref()) {
                (_, b"numFmt") => {
                    if let (Some(id), Some(code)) = (xml_attr(&e, b"numFmtId")?, xml_attr(&e, b"formatCode")?)
                        && let Ok(id) = id.parse()
                    {
                        sheet.num_fmts.insert(id, code);
                    }
                }
                (_, b"fonts") if !empty => section = Section::Fonts,
                (_, b"fills") if !empty => section = Section::Fills,
                (_, b"borders") if !empty => section = Section::Borders,
                (_, b"cellStyleXfs") if !empty => section = Section::CellStyleXfs,
                (_, b"cellXfs") if !empty => section = Section::CellXfs,

                (Section::Fonts, b"font") => {
                    if empty {
                        sheet.fonts.push(FontStyle::default());
                    } else {
                        font = Some(FontStyle::default());
                    }
                }
                (Section::Fonts, tag) => {
                    if let Some(font) = font.as_mut() {
                        read_font_tag(&e, tag, font)?;
                    }
                }

                (Section::Fills, b"fill") => {
                    if empty {
                        sheet.fills.push(None);
                    } else {
                        fill = Some(None);
                    }
                }
                (Section::Fills, b"patternFill") => {
                    fill_solid = matches!(xml_attr(&e, b"patternType")?.as_deref(), Some("solid"));
                }
                (Section::Fills, b"fgColor") => {
                    if fill_solid
                        && let Some(fill) = fill.as_mut()
                    {
                        *fill = xml_attr(&e, b"rgb")?;
                    }
                }

                (Section::Borders, b"border") => {
                    if empty {
                        sheet.borders.push(BorderStyle::default());
                    } else {
                        border = Some(BorderStyle::default());
                    }
                }
                (Section::Borders, side @ (b"left" | b"right" | b"top" | b"bottom")) => {
                    let style = xml_attr(&e, b"style")?;
                    if let Some(border) = border.as_mut() {
                        match side {
                            b"left" => border.left = style,
                            b"right" => border.right = style,
                            b"top" => border.top = style,
                            _ => border.bottom = style,
                        }
                    }
                }

                (Section::CellXfs, b"xf") => {
                    let record = read_xf(&e)?;
                    if empty {
                        sheet.cell_xfs.push(record);
                    } else {
                        xf = Some(record);
                    }
                }
                (Section::CellXfs, b"alignment") => {
                    if let Some(xf) = xf.as_mut() {
                        xf.alignment = Some(AlignmentStyle {
                            horizontal: xml_attr(&e, b"horizontal")?,
                            vertical: xml_attr(&e, b"vertical")?,
                            wrap_text: matches!(xml_attr(&e, b"wrapText")?.as_deref(), Some("1") | Some("true")),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(sheet)
    }

    /// 根据 cellXfs 下标解析出完整样式
    pub fn resolve(&self, xf_index: Option<u32>) -> CellStyle {
        let Some(index) = xf_index else {
            return CellStyle::default();
        };
        let Some(xf) = self.cell_xfs.get(index as usize) else {
            return CellStyle {
                xf_index,
                ..Default::default()
            };
        };
        let number_format = match xf.num_fmt_id {
            0 => None,
            id => self.number_format_code(id),
        };
        CellStyle {
            xf_index,
            font: xf.font_id.and_then(|id| self.fonts.get(id)).cloned(),
            alignment: xf.alignment.clone(),
            fill: xf.fill_id.and_then(|id| self.fills.get(id)).cloned().flatten(),
            border: xf
                .border_id
                .and_then(|id| self.borders.get(id))
                .filter(|b| !b.is_empty())
                .cloned(),
            number_format,
        }
    }

    /// 该样式是否为日期格式
    pub fn is_date_style(&self, xf_index: Option<u32>) -> bool {
        let Some(xf) = xf_index.and_then(|i| self.cell_xfs.get(i as usize)) else {
            return false;
        };
        match xf.num_fmt_id {
            14..=22 | 45..=47 => true,
            id => self.num_fmts.get(&id).is_some_and(|code| is_date_format(code)),
        }
    }

    /// 工作簿默认字体 (fonts 的第一项)
    pub fn default_font(&self) -> Option<&FontStyle> {
        self.fonts.first()
    }

    fn number_format_code(&self, id: u32) -> Option<String> {
        if let Some(code) = self.num_fmts.get(&id) {
            return Some(code.clone());
        }
        builtin_number_format(id).map(str::to_string)
    }
}

pub(crate) fn read_font_tag(e: &BytesStart, tag: &[u8], font: &mut FontStyle) -> Result<(), XlsxError> {
    match tag {
        b"b" => font.bold = xml_flag(e)?,
        b"i" => font.italic = xml_flag(e)?,
        b"sz" => font.size = xml_attr(e, b"val")?.and_then(|v| v.parse().ok()),
        b"color" => font.color = xml_attr(e, b"rgb")?,
        b"name" => font.name = xml_attr(e, b"val")?,
        _ => {}
    }
    Ok(())
}

fn read_xf(e: &BytesStart) -> Result<XfRecord, XlsxError> {
    let id = |name: &[u8]| -> Result<Option<usize>, XlsxError> {
        Ok(xml_attr(e, name)?.and_then(|v| v.parse().ok()))
    };
    Ok(XfRecord {
        num_fmt_id: xml_attr(e, b"numFmtId")?.and_then(|v| v.parse().ok()).unwrap_or(0),
        font_id: id(b"fontId")?,
        fill_id: id(b"fillId")?,
        border_id: id(b"borderId")?,
        alignment: None,
    })
}

/// 内置数字格式
fn builtin_number_format(id: u32) -> Option<&'static str> {
    Some(match id {
        1 => "0",
        2 => "0.00",
        3 => "#,##0",
        4 => "#,##0.00",
        9 => "0%",
        10 => "0.00%",
        11 => "0.00E+00",
        14 => "mm-dd-yy",
        15 => "d-mmm-yy",
        16 => "d-mmm",
        17 => "mmm-yy",
        18 => "h:mm AM/PM",
        19 => "h:mm:ss AM/PM",
        20 => "h:mm",
        21 => "h:mm:ss",
        22 => "m/d/yy h:mm",
        45 => "mm:ss",
        46 => "[h]:mm:ss",
        47 => "mmss.0",
        49 => "@",
        _ => return None,
    })
}

/// 自定义格式是否为日期: 去掉引号和方括号中的内容后包含 d、m、y
pub(crate) fn is_date_format(code: &str) -> bool {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;
    for ch in code.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            'd' | 'D' | 'm' | 'M' | 'y' | 'Y' if !in_quotes && !in_brackets => return true,
            _ => {}
        }
    }
    false
}
