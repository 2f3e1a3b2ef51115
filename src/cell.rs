//! 单元格模型
//!
//! 单元格的值是一个封闭的和类型 [`CellValue`], 解析 sheet.xml 时就确定下来,
//! 后面的扫描、替换、复制行都只面对这几种形状。

/// 富文本中一段文字的字体
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFont {
    pub bold: bool,
    pub italic: bool,
    pub size: Option<f64>,
    /// ARGB, 如 "FFFF0000"
    pub color: Option<String>,
}

/// 富文本的一段
#[derive(Debug, Clone, PartialEq)]
pub struct RichTextRun {
    pub text: String,
    pub font: Option<RunFont>,
    /// 原始的 `<rPr>...</rPr>`, 写回时原样输出
    pub raw_props: Option<String>,
}

impl RichTextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        RichTextRun {
            text: text.into(),
            font: None,
            raw_props: None,
        }
    }
}

/// 公式缓存的计算结果
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(String),
}

/// 单元格的值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    RichText(Vec<RichTextRun>),
    Formula {
        formula: String,
        cached: Option<CachedValue>,
    },
    Number(f64),
    /// Excel 日期序列号
    Date(f64),
    Boolean(bool),
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// 可以包含标记的原始文本: 文本、富文本拼接后的文本、公式源码
    pub fn marker_text(&self) -> Option<std::borrow::Cow<'_, str>> {
        match self {
            CellValue::Text(text) => Some(text.as_str().into()),
            CellValue::RichText(runs) => Some(runs.iter().map(|r| r.text.as_str()).collect::<String>().into()),
            CellValue::Formula { formula, .. } => Some(formula.as_str().into()),
            _ => None,
        }
    }
}

/// 字体样式
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontStyle {
    pub bold: bool,
    pub italic: bool,
    pub size: Option<f64>,
    pub color: Option<String>,
    pub name: Option<String>,
}

/// 对齐方式
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentStyle {
    pub horizontal: Option<String>,
    pub vertical: Option<String>,
    pub wrap_text: bool,
}

/// 边框, 每条边记录线型 (thin, medium ...)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BorderStyle {
    pub left: Option<String>,
    pub right: Option<String>,
    pub top: Option<String>,
    pub bottom: Option<String>,
}

impl BorderStyle {
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none() && self.top.is_none() && self.bottom.is_none()
    }
}

/// 单元格样式
///
/// 所有字段都是可选的。`xf_index` 是 styles.xml 中 cellXfs 的下标,
/// 复制样式时靠它保证和原单元格完全一致; 其它字段是解析出来的视图, 供预览使用。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellStyle {
    pub xf_index: Option<u32>,
    pub font: Option<FontStyle>,
    pub alignment: Option<AlignmentStyle>,
    /// 填充色 ARGB
    pub fill: Option<String>,
    pub border: Option<BorderStyle>,
    pub number_format: Option<String>,
}

/// 原始 XML 片段, 未修改的单元格写回时直接使用
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawCell {
    /// 除了 r 之外的全部属性, 保持原样 (已转义)
    pub attrs: Vec<(String, String)>,
    /// `<c>` 和 `</c>` 之间的内容, 自闭合时为 None
    pub inner: Option<String>,
}

/// 单元格
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub value: CellValue,
    pub style: CellStyle,
    pub(crate) raw: Option<RawCell>,
    /// 与值无关、需要保留的其它属性 (如 ph)
    pub(crate) extra_attrs: Vec<(String, String)>,
}

impl Cell {
    pub fn new(value: CellValue, style: CellStyle) -> Self {
        Cell {
            value,
            style,
            raw: None,
            extra_attrs: Vec::new(),
        }
    }

    /// 是否仍然是模板中的原样内容
    pub fn is_pristine(&self) -> bool {
        self.raw.is_some()
    }

    /// 修改值, 之后写回时不再使用原始 XML
    pub fn set_value(&mut self, value: CellValue) {
        self.value = value;
        self.mark_dirty();
    }

    /// 以当前单元格为模板生成一个新单元格: 样式原样复制, 值由调用方给出
    pub fn clone_with_value(&self, value: CellValue) -> Cell {
        let mut extra_attrs = self.extra_attrs.clone();
        if let Some(raw) = &self.raw {
            extra_attrs.extend(raw.attrs.iter().filter(|(k, _)| !is_value_attr(k)).cloned());
        }
        Cell {
            value,
            style: self.style.clone(),
            raw: None,
            extra_attrs,
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        if let Some(raw) = self.raw.take() {
            // t 和 s 由模型重新生成, cm/vm 指向的元数据不再适用
            self.extra_attrs = raw.attrs.into_iter().filter(|(k, _)| !is_value_attr(k)).collect();
        }
    }
}

fn is_value_attr(key: &str) -> bool {
    matches!(key, "t" | "s" | "cm" | "vm")
}
