//! 完整性检查: 加载、处理、序列化三个阶段的内容下限

use std::fmt;

use log::{debug, warn};

use crate::errors::XlsxError;
use crate::workbook::Workbook;

/// 输出小于这个字节数视为空压缩包
pub const MIN_OUTPUT_BYTES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Load,
    /// 处理之后, 带着处理之前的非空单元格数
    Process { before: usize },
    Serialize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Load => f.write_str("load"),
            Phase::Process { .. } => f.write_str("process"),
            Phase::Serialize => f.write_str("serialize"),
        }
    }
}

/// 检查工作簿内容, 返回非空单元格数
///
/// 加载阶段: 没有工作表或没有任何非空单元格都是致命错误。
/// 处理阶段: 单元格数减少只记录警告; 减少到零是致命错误。
/// 序列化阶段: 检查重新打开的输出, 没有内容即为损坏。
pub fn assert_non_empty(workbook: &Workbook, phase: Phase) -> Result<usize, XlsxError> {
    if workbook.sheets().is_empty() {
        return Err(XlsxError::TemplateLoad(format!("no worksheets after {phase}")));
    }
    let count = workbook.count_non_empty();
    debug!("{phase}: {count} non-empty cells in {} sheets", workbook.sheets().len());

    match phase {
        Phase::Load if count == 0 => Err(XlsxError::EmptyWorkbook(
            "template has no non-empty cells".to_string(),
        )),
        Phase::Process { .. } | Phase::Serialize if count == 0 => {
            Err(XlsxError::Corruption(format!("workbook lost all content during {phase}")))
        }
        Phase::Process { before } if count < before => {
            warn!("non-empty cells dropped from {before} to {count} during processing");
            Ok(count)
        }
        _ => Ok(count),
    }
}

/// 检查输出字节数
pub fn assert_output(bytes: &[u8], min_bytes: usize) -> Result<(), XlsxError> {
    if bytes.len() < min_bytes {
        return Err(XlsxError::Corruption(format!(
            "output is {} bytes, below the {min_bytes} byte minimum",
            bytes.len()
        )));
    }
    Ok(())
}

/// 序列化, 输出过小时重试一次, 仍然过小则失败
pub fn serialize_with_retry<F>(min_bytes: usize, mut serialize: F) -> Result<Vec<u8>, XlsxError>
where
    F: FnMut() -> Result<Vec<u8>, XlsxError>,
{
    let bytes = serialize()?;
    match assert_output(&bytes, min_bytes) {
        Ok(()) => Ok(bytes),
        Err(first) => {
            warn!("{first}; serializing again");
            let bytes = serialize()?;
            assert_output(&bytes, min_bytes)?;
            Ok(bytes)
        }
    }
}
