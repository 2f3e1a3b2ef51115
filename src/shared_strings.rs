//! sharedStrings.xml 以及单元格内联字符串 (<is>) 的解析

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::cell::{CellValue, FontStyle, RichTextRun, RunFont};
use crate::errors::XlsxError;
use crate::styles::read_font_tag;
use crate::utils::{read_inner, read_text};

/// 解析 sharedStrings.xml, 下标即 t="s" 单元格中 <v> 的值
pub(crate) fn parse_shared_strings(xml: &str) -> Result<Vec<CellValue>, XlsxError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut items = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                items.push(parse_string_item(&mut reader, xml, b"si")?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                items.push(CellValue::Text(String::new()));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(items)
}

/// 解析 <si> 或 <is> 的内容, reader 位于起始标签之后
///
/// 没有 <r> 的字符串是普通文本; 有 <r> 的保留每一段的 rPr。
/// 注音 (rPh) 不属于显示文本, 直接跳过。
pub(crate) fn parse_string_item<'a>(
    reader: &mut Reader<&'a [u8]>,
    xml: &'a str,
    end: &[u8],
) -> Result<CellValue, XlsxError> {
    let mut plain = String::new();
    let mut runs: Vec<RichTextRun> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                plain.push_str(&read_text(reader, xml, &e)?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"r" => {
                runs.push(parse_run(reader, xml)?);
            }
            Event::Start(e) => {
                reader.read_to_end(e.name())?;
            }
            Event::End(e) if e.local_name().as_ref() == end => break,
            Event::Eof => {
                return Err(XlsxError::malformed("string item", "unexpected end of document"));
            }
            _ => {}
        }
    }

    if runs.is_empty() {
        return Ok(CellValue::Text(plain));
    }
    if runs.iter().all(|r| r.raw_props.is_none()) {
        let text: String = plain.chars().chain(runs.iter().flat_map(|r| r.text.chars())).collect();
        return Ok(CellValue::Text(text));
    }
    if !plain.is_empty() {
        runs.insert(0, RichTextRun::plain(plain));
    }
    Ok(CellValue::RichText(runs))
}

fn parse_run<'a>(reader: &mut Reader<&'a [u8]>, xml: &'a str) -> Result<RichTextRun, XlsxError> {
    let mut run = RichTextRun::plain(String::new());

    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"rPr" => {
                let props = read_inner(reader, xml, &e)?;
                let end = reader.buffer_position() as usize;
                run.font = Some(parse_run_font(props)?);
                run.raw_props = Some(xml[start..end].to_string());
            }
            Event::Empty(e) if e.local_name().as_ref() == b"rPr" => {
                let end = reader.buffer_position() as usize;
                run.raw_props = Some(xml[start..end].to_string());
            }
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                run.text.push_str(&read_text(reader, xml, &e)?);
            }
            Event::Start(e) => {
                reader.read_to_end(e.name())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"r" => break,
            Event::Eof => return Err(XlsxError::malformed("rich text run", "unexpected end of document")),
            _ => {}
        }
    }
    Ok(run)
}

/// 解析 rPr 中的字体信息, 只用于预览; 写回时使用原始 rPr
fn parse_run_font(props: &str) -> Result<RunFont, XlsxError> {
    let mut reader = Reader::from_str(props);
    let mut font = FontStyle::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                let tag = e.local_name();
                read_font_tag(&e, tag.as_ref(), &mut font)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(RunFont {
        bold: font.bold,
        italic: font.italic,
        size: font.size,
        color: font.color,
    })
}
