//! 错误类型定义

use thiserror::Error;

/// XLSX 处理错误类型
#[derive(Error, Debug)]
pub enum XlsxError {
    /// 模板无法加载: 空文件、不是 ZIP、没有工作表
    #[error("Template load failed: {0}")]
    TemplateLoad(String),
    /// 模板可以解析, 但没有任何内容
    #[error("Empty workbook: {0}")]
    EmptyWorkbook(String),
    /// 处理或序列化之后内容低于阈值
    #[error("Corrupted output: {0}")]
    Corruption(String),
    /// 严格模式下, 多个产品却找不到产品行
    #[error("Sheet '{sheet}' has {items} items but no product row")]
    MissingAnchor { sheet: String, items: usize },
    #[error("Invalid {part}: {reason}")]
    MalformedPart { part: String, reason: String },
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),
    #[error(transparent)]
    XmlEscape(#[from] quick_xml::escape::EscapeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    TemplateRenderError(String),
}

impl XlsxError {
    pub(crate) fn malformed(part: &str, reason: impl Into<String>) -> Self {
        XlsxError::MalformedPart {
            part: part.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<std::string::FromUtf8Error> for XlsxError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        XlsxError::Utf8(e.utf8_error())
    }
}
