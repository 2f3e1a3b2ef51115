//! 模板处理配置

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterOptions;
use crate::errors::XlsxError;
use crate::integrity::MIN_OUTPUT_BYTES;
use crate::markers::DEFAULT_ANCHOR_MARKERS;

/// 模板配置, 所有字段都有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// 从第几个工作表开始处理 (从 0 开始), 之前的工作表保持原样
    #[serde(alias = "hoja_inicio")]
    pub first_sheet: usize,
    /// 指定商品模板行 (从 1 开始), 不再自动查找
    #[serde(alias = "fila_productos")]
    pub product_row: Option<u32>,
    /// 用来识别商品模板行的标记
    pub anchor_markers: Vec<String>,
    /// 有多个商品却找不到商品行时返回错误, 而不是跳过展开
    pub strict_expansion: bool,
    /// 生成的商品行复制模板行的行高
    pub clone_row_height: bool,
    pub min_output_bytes: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        TemplateConfig {
            first_sheet: 0,
            product_row: None,
            anchor_markers: DEFAULT_ANCHOR_MARKERS.iter().map(|m| m.to_string()).collect(),
            strict_expansion: false,
            clone_row_height: false,
            min_output_bytes: MIN_OUTPUT_BYTES,
        }
    }
}

/// 宿主传入的完整配置: 模板配置加上格式化选项, 两者共用同一个 JSON 对象
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptions {
    pub template: TemplateConfig,
    pub adapter: AdapterOptions,
}

impl RenderOptions {
    /// 解析 JSON 配置, 空字符串视为默认配置
    pub fn from_json(json: &str) -> Result<Self, XlsxError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(RenderOptions {
            template: serde_json::from_str(json)?,
            adapter: serde_json::from_str(json)?,
        })
    }
}
