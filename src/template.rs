use std::collections::HashSet;

use log::{debug, info, warn};

use crate::adapter::{AdapterOptions, Factura, binding_from_invoice};
use crate::config::TemplateConfig;
use crate::integrity::{Phase, assert_non_empty, serialize_with_retry};
use crate::layout::{find_anchor_row, find_totals_row};
use crate::markers::{Binding, Resolver, is_known, marker_names};
use crate::preview::preview_sheet;
use crate::replicator::{ExpandOptions, RowSnapshot, expand};
use crate::scanner::{apply, scan};
use crate::sheet::Sheet;
use crate::workbook::Workbook;
use crate::XlsxError;

/// 单个工作表的处理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetReport {
  pub sheet: String,
  pub anchor_row: Option<u32>,
  pub totals_row: Option<u32>,
  pub substitutions: usize,
  /// 每个商品所在的行
  pub item_rows: Vec<u32>,
}

/// 把数据绑定到模板, 返回新的 xlsx 字节
///
/// 1. 加载并检查模板
/// 2. 每个工作表: 定位商品行和合计行, 保存商品行快照
/// 3. 全局替换 (跳过商品行)
/// 4. 按商品展开商品行
/// 5. 检查内容, 序列化 (过小则重试一次), 重新打开输出再检查一次
pub fn render_template(
  zip_bytes: Vec<u8>,
  binding: &Binding,
  config: &TemplateConfig,
) -> Result<Vec<u8>, XlsxError> {
  let mut workbook = Workbook::load(&zip_bytes)?;
  let before = assert_non_empty(&workbook, Phase::Load)?;

  let reports = process_workbook(&mut workbook, binding, config)?;

  let after = assert_non_empty(&workbook, Phase::Process { before })?;
  let bytes = serialize_with_retry(config.min_output_bytes, || workbook.to_bytes())?;
  // 输出必须能重新打开, 并且仍有内容
  let reopened = Workbook::load(&bytes)
    .map_err(|e| XlsxError::Corruption(format!("output cannot be reopened: {e}")))?;
  let written = assert_non_empty(&reopened, Phase::Serialize)?;
  if written != after {
    debug!("non-empty cells changed from {after} to {written} on serialization");
  }

  info!(
    "rendered template: {} sheets processed, {} substitutions, {} items, {before} -> {after} non-empty cells, {} bytes",
    reports.len(),
    reports.iter().map(|r| r.substitutions).sum::<usize>(),
    binding.items.len(),
    bytes.len()
  );
  Ok(bytes)
}

/// 发票 -> Binding -> 模板
pub fn render_invoice(
  zip_bytes: Vec<u8>,
  factura: &Factura,
  options: &AdapterOptions,
  config: &TemplateConfig,
) -> Result<Vec<u8>, XlsxError> {
  let binding = binding_from_invoice(factura, options);
  render_template(zip_bytes, &binding, config)
}

/// 在已加载的工作簿上执行替换和展开
pub fn process_workbook(
  workbook: &mut Workbook,
  binding: &Binding,
  config: &TemplateConfig,
) -> Result<Vec<SheetReport>, XlsxError> {
  let resolver = Resolver::new(binding);
  let sheet_count = workbook.sheets().len();
  if config.first_sheet >= sheet_count {
    warn!("first_sheet {} is out of range, workbook has {sheet_count} sheets", config.first_sheet);
  }

  let mut reports = Vec::new();
  for index in config.first_sheet..sheet_count {
    let Some(sheet) = workbook.sheet_at_mut(index) else {
      continue;
    };
    reports.push(process_sheet(sheet, binding, &resolver, config));
  }

  if binding.items.len() > 1 && reports.iter().all(|r| r.anchor_row.is_none()) {
    let sheet = reports.first().map(|r| r.sheet.clone()).unwrap_or_default();
    if config.strict_expansion {
      return Err(XlsxError::MissingAnchor {
        sheet,
        items: binding.items.len(),
      });
    }
    warn!(
      "no product row found for {} items, only global markers were replaced",
      binding.items.len()
    );
  }
  Ok(reports)
}

fn process_sheet(
  sheet: &mut Sheet,
  binding: &Binding,
  resolver: &Resolver,
  config: &TemplateConfig,
) -> SheetReport {
  let anchor_row = locate_anchor(sheet, config);
  let totals_row = anchor_row.and_then(|anchor| find_totals_row(sheet, anchor));
  debug!("sheet {:?}: product row {anchor_row:?}, totals row {totals_row:?}", sheet.name);

  // 快照必须在替换之前
  let snapshot = anchor_row.map(|anchor| RowSnapshot::capture(sheet, anchor));

  let changes = scan(sheet, resolver, anchor_row);
  let substitutions = changes.len();
  apply(sheet, changes);

  let item_rows = match &snapshot {
    Some(snapshot) => expand(
      sheet,
      snapshot,
      totals_row,
      &binding.items,
      resolver,
      ExpandOptions {
        clone_row_height: config.clone_row_height,
      },
    ),
    None => Vec::new(),
  };
  debug!(
    "sheet {:?}: {substitutions} cells substituted, {} item rows",
    sheet.name,
    item_rows.len()
  );

  SheetReport {
    sheet: sheet.name.clone(),
    anchor_row,
    totals_row,
    substitutions,
    item_rows,
  }
}

fn locate_anchor(sheet: &Sheet, config: &TemplateConfig) -> Option<u32> {
  if let Some(row) = config.product_row {
    if sheet.row(row).is_some() {
      return Some(row);
    }
    warn!("product row {row} does not exist in sheet {:?}, detecting instead", sheet.name);
  }
  find_anchor_row(sheet, &config.anchor_markers)
}

/// 模板中用到的已知标记, 按首次出现的顺序
pub fn collect_markers(zip_bytes: &[u8]) -> Result<Vec<String>, XlsxError> {
  let workbook = Workbook::load(zip_bytes)?;
  let mut seen = HashSet::new();
  let mut markers = Vec::new();
  for sheet in workbook.sheets() {
    for (_, row) in sheet.rows() {
      for (_, cell) in row.cells() {
        let Some(text) = cell.value.marker_text() else {
          continue;
        };
        for name in marker_names(&text) {
          if is_known(name) && seen.insert(name.to_string()) {
            markers.push(name.to_string());
          }
        }
      }
    }
  }
  Ok(markers)
}

/// 预览第 `sheet_index` 个工作表 (从 0 开始)
pub fn preview_workbook(zip_bytes: &[u8], sheet_index: usize) -> Result<String, XlsxError> {
  let workbook = Workbook::load(zip_bytes)?;
  let sheet = workbook.sheet_at(sheet_index).ok_or_else(|| {
    XlsxError::TemplateLoad(format!(
      "sheet index {sheet_index} out of range, workbook has {} sheets",
      workbook.sheets().len()
    ))
  })?;
  preview_sheet(sheet)
}
