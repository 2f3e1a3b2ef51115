//! 工作簿容器: 解压 xlsx, 解析工作表, 重新压缩
//!
//! 除了被修改的工作表之外, 所有部件按原来的顺序和字节写回。

use std::io::{Cursor, Read, Write};
use std::sync::LazyLock;

use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::cell::CellValue;
use crate::errors::XlsxError;
use crate::shared_strings::parse_shared_strings;
use crate::sheet::Sheet;
use crate::styles::StyleSheet;
use crate::utils::{validate_xlsx_format, xml_attr};

const CALC_CHAIN: &str = "xl/calcChain.xml";

static CALC_CHAIN_OVERRIDE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r#"<(?:\w+:)?Override\b[^>]*calcChain\.xml"[^>]*/>"#).unwrap());
static CALC_CHAIN_RELATIONSHIP: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r#"<(?:\w+:)?Relationship\b[^>]*calcChain\.xml"[^>]*/>"#).unwrap());

/// 关系 (rels 中的一条 Relationship)
#[derive(Debug, Clone)]
struct Relationship {
  id: String,
  rel_type: String,
  target: String,
}

/// 已加载的工作簿
#[derive(Debug, Clone)]
pub struct Workbook {
  /// 全部部件, 保持 zip 中原来的顺序
  parts: Vec<(String, Vec<u8>)>,
  sheets: Vec<Sheet>,
  styles: StyleSheet,
  workbook_path: String,
}

impl Workbook {
  /// 从 xlsx 字节加载工作簿
  ///
  /// 空文件、不是 zip、缺少 workbook.xml 都会返回 [`XlsxError::TemplateLoad`],
  /// 没有任何工作表同样是 [`XlsxError::TemplateLoad`]。
  pub fn load(bytes: &[u8]) -> Result<Self, XlsxError> {
    validate_xlsx_format(bytes)?;

    let mut archive = ZipArchive::new(Cursor::new(bytes))
      .map_err(|e| XlsxError::TemplateLoad(format!("not a readable xlsx archive: {e}")))?;

    let mut parts = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
      let mut file = archive.by_index(i)?;
      let file_name = file.name().to_string();

      // 跳过目录项
      if file_name.ends_with('/') {
        continue;
      }

      // 公式计算链在行插入后失效, 删除后由 Excel 重建
      if file_name == CALC_CHAIN {
        debug!("dropping {CALC_CHAIN}");
        continue;
      }

      let mut contents = Vec::new();
      file.read_to_end(&mut contents)?;
      parts.push((file_name, contents));
    }

    let mut workbook = Workbook {
      parts,
      sheets: Vec::new(),
      styles: StyleSheet::default(),
      workbook_path: String::new(),
    };
    workbook.remove_calc_chain_references()?;
    workbook.workbook_path = workbook.find_workbook_path()?;

    let workbook_xml = workbook
      .part_str(&workbook.workbook_path)?
      .ok_or_else(|| XlsxError::TemplateLoad(format!("{} not found", workbook.workbook_path)))?
      .to_string();
    let rels_path = rels_path_for(&workbook.workbook_path);
    let rels = match workbook.part_str(&rels_path)? {
      Some(xml) => parse_relationships(xml)?,
      None => Vec::new(),
    };
    let base_dir = parent_dir(&workbook.workbook_path).to_string();

    let styles_path = rels
      .iter()
      .find(|r| r.rel_type.ends_with("/styles"))
      .map(|r| resolve_target(&base_dir, &r.target))
      .unwrap_or_else(|| "xl/styles.xml".to_string());
    let styles = match workbook.part_str(&styles_path)? {
      Some(xml) => StyleSheet::parse(xml)?,
      None => StyleSheet::default(),
    };
    workbook.styles = styles;

    let shared_strings_path = rels
      .iter()
      .find(|r| r.rel_type.ends_with("/sharedStrings"))
      .map(|r| resolve_target(&base_dir, &r.target))
      .unwrap_or_else(|| "xl/sharedStrings.xml".to_string());
    let shared_strings: Vec<CellValue> = match workbook.part_str(&shared_strings_path)? {
      Some(xml) => parse_shared_strings(xml)?,
      None => Vec::new(),
    };

    let mut sheets = Vec::new();
    for (name, rid) in parse_sheet_entries(&workbook_xml)? {
      let Some(rel) = rels.iter().find(|r| r.id == rid) else {
        warn!("sheet {name:?} references missing relationship {rid}");
        continue;
      };
      // 图表页 (chartsheet)、对话框页等没有 sheetData, 原样写回
      if !rel.rel_type.ends_with("/worksheet") {
        debug!("sheet {name:?} is not a worksheet ({}), passed through", rel.rel_type);
        continue;
      }
      let path = resolve_target(&base_dir, &rel.target);
      let Some(xml) = workbook.part_str(&path)? else {
        warn!("sheet {name:?} part {path} not found");
        continue;
      };
      sheets.push(Sheet::parse(&name, &path, xml, &shared_strings, &workbook.styles)?);
    }

    if sheets.is_empty() {
      return Err(XlsxError::TemplateLoad("workbook contains no worksheets".to_string()));
    }
    debug!(
      "loaded workbook: {} parts, {} sheets, {} shared strings",
      workbook.parts.len(),
      sheets.len(),
      shared_strings.len()
    );
    workbook.sheets = sheets;
    Ok(workbook)
  }

  pub fn sheets(&self) -> &[Sheet] {
    &self.sheets
  }

  pub fn sheet_names(&self) -> Vec<&str> {
    self.sheets.iter().map(|s| s.name.as_str()).collect()
  }

  pub fn sheet(&self, name: &str) -> Option<&Sheet> {
    self.sheets.iter().find(|s| s.name == name)
  }

  pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
    self.sheets.iter_mut().find(|s| s.name == name)
  }

  pub fn sheet_at(&self, index: usize) -> Option<&Sheet> {
    self.sheets.get(index)
  }

  pub fn sheet_at_mut(&mut self, index: usize) -> Option<&mut Sheet> {
    self.sheets.get_mut(index)
  }

  pub fn styles(&self) -> &StyleSheet {
    &self.styles
  }

  /// 所有工作表中非空单元格的总数
  pub fn count_non_empty(&self) -> usize {
    self.sheets.iter().map(Sheet::non_empty_cells).sum()
  }

  /// 序列化为 xlsx 字节
  pub fn to_bytes(&self) -> Result<Vec<u8>, XlsxError> {
    let any_modified = self.sheets.iter().any(Sheet::is_modified);

    let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (file_name, contents) in &self.parts {
      let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(6)); // 设置压缩级别

      zip_writer.start_file(file_name.as_str(), options)?;
      match self.sheets.iter().find(|s| &s.path == file_name && s.is_modified()) {
        Some(sheet) => zip_writer.write_all(sheet.to_xml().as_bytes())?,
        None if any_modified && *file_name == self.workbook_path => {
          let xml = std::str::from_utf8(contents)?;
          zip_writer.write_all(force_full_calc(xml).as_bytes())?;
        }
        None => zip_writer.write_all(contents)?,
      }
    }

    let cursor = zip_writer.finish()?;
    Ok(cursor.into_inner())
  }

  fn part(&self, name: &str) -> Option<&[u8]> {
    self
      .parts
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, contents)| contents.as_slice())
  }

  fn part_str(&self, name: &str) -> Result<Option<&str>, XlsxError> {
    match self.part(name) {
      Some(bytes) => Ok(Some(std::str::from_utf8(bytes)?)),
      None => Ok(None),
    }
  }

  fn find_workbook_path(&self) -> Result<String, XlsxError> {
    if let Some(xml) = self.part_str("_rels/.rels")? {
      let rels = parse_relationships(xml)?;
      if let Some(rel) = rels.iter().find(|r| r.rel_type.ends_with("/officeDocument")) {
        return Ok(resolve_target("", &rel.target));
      }
    }
    Ok("xl/workbook.xml".to_string())
  }

  /// 删除 [Content_Types].xml 和 workbook.xml.rels 中对 calcChain.xml 的引用
  fn remove_calc_chain_references(&mut self) -> Result<(), XlsxError> {
    for (name, contents) in &mut self.parts {
      let pattern = if name == "[Content_Types].xml" {
        &CALC_CHAIN_OVERRIDE
      } else if name.ends_with("workbook.xml.rels") {
        &CALC_CHAIN_RELATIONSHIP
      } else {
        continue;
      };
      let xml = std::str::from_utf8(contents)?;
      if pattern.is_match(xml) {
        *contents = pattern.replace_all(xml, "").into_owned().into_bytes();
      }
    }
    Ok(())
  }
}

/// 让 Excel 打开文件时重新计算全部公式 (缓存值在替换和插入行后已经过期)
fn force_full_calc(workbook_xml: &str) -> String {
  let Some(start) = crate::utils::find_tag(workbook_xml, "calcPr") else {
    return workbook_xml.to_string();
  };
  let Some(end) = workbook_xml[start..].find('>').map(|e| start + e) else {
    return workbook_xml.to_string();
  };
  let tag = &workbook_xml[start..end];
  if tag.contains("fullCalcOnLoad") {
    return workbook_xml.to_string();
  }
  let insert_at = if tag.ends_with('/') { end - 1 } else { end };
  format!(
    r#"{} fullCalcOnLoad="1"{}"#,
    &workbook_xml[..insert_at],
    &workbook_xml[insert_at..]
  )
}

/// 解析 workbook.xml 中的 <sheet name=".." r:id=".."/>, 按出现顺序返回
fn parse_sheet_entries(xml: &str) -> Result<Vec<(String, String)>, XlsxError> {
  let mut reader = Reader::from_str(xml);
  let mut entries = Vec::new();
  loop {
    match reader.read_event()? {
      Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
        let name = xml_attr(&e, b"name")?;
        let rid = xml_attr(&e, b"id")?;
        if let (Some(name), Some(rid)) = (name, rid) {
          entries.push((name, rid));
        }
      }
      Event::Eof => break,
      _ => {}
    }
  }
  Ok(entries)
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>, XlsxError> {
  let mut reader = Reader::from_str(xml);
  let mut rels = Vec::new();
  loop {
    match reader.read_event()? {
      Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
        if let (Some(id), Some(target)) = (xml_attr(&e, b"Id")?, xml_attr(&e, b"Target")?) {
          let rel_type = xml_attr(&e, b"Type")?.unwrap_or_default();
          rels.push(Relationship { id, rel_type, target });
        }
      }
      Event::Eof => break,
      _ => {}
    }
  }
  Ok(rels)
}

/// "xl/workbook.xml" -> "xl/_rels/workbook.xml.rels"
fn rels_path_for(part: &str) -> String {
  let dir = parent_dir(part);
  let file = part[dir.len()..].trim_start_matches('/');
  if dir.is_empty() {
    format!("_rels/{file}.rels")
  } else {
    format!("{dir}/_rels/{file}.rels")
  }
}

fn parent_dir(part: &str) -> &str {
  part.rfind('/').map(|i| &part[..i]).unwrap_or("")
}

/// 把关系中的 Target 解析为 zip 内的路径
fn resolve_target(base_dir: &str, target: &str) -> String {
  if let Some(absolute) = target.strip_prefix('/') {
    return absolute.to_string();
  }
  let mut segments: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
  for segment in target.split('/') {
    match segment {
      ".." => {
        segments.pop();
      }
      "." | "" => {}
      s => segments.push(s),
    }
  }
  segments.join("/")
}
