use wasm_bindgen::prelude::*;
use wasm_bindgen::JsValue;

pub mod adapter;
pub mod cell;
pub mod config;
pub mod console;
pub mod errors;
mod formula;
pub mod integrity;
pub mod layout;
pub mod markers;
pub mod preview;
pub mod replicator;
pub mod scanner;
pub mod shared_strings;
pub mod sheet;
pub mod styles;
pub mod template;
pub mod utils;
pub mod workbook;

// 重新导出常用的类型和函数
pub use adapter::{AdapterOptions, DateFormat, DocumentKind, Factura, binding_from_invoice};
pub use cell::{Cell, CellStyle, CellValue, RichTextRun};
pub use config::{RenderOptions, TemplateConfig};
pub use errors::XlsxError;
pub use markers::{Binding, Item, Resolver};
pub use preview::preview_sheet;
pub use sheet::Sheet;
pub use template::{collect_markers, preview_workbook, process_workbook, render_invoice, render_template};
pub use workbook::Workbook;

/// 当 `console_error_panic_hook` 功能启用时，我们可以调用 `set_panic_hook` 函数
/// 至少一次在初始化过程中，以便在 panic 时获得更好的错误消息。
#[wasm_bindgen(js_name = setPanicHook)]
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// 把日志输出到浏览器控制台, `level` 为 error / warn / info / debug / trace, 默认 info
#[wasm_bindgen(js_name = initLogging)]
pub fn init_logging(level: Option<String>) -> bool {
    let level = level
        .as_deref()
        .and_then(|l| l.parse().ok())
        .unwrap_or(log::LevelFilter::Info);
    console::init(level)
}

fn parse_options(config_json: Option<String>) -> Result<RenderOptions, JsValue> {
    RenderOptions::from_json(config_json.as_deref().unwrap_or(""))
        .map_err(|e| JsValue::from_str(&format!("配置 JSON 解析错误: {e}")))
}

/// 当前本地时间, 用于 FECHA_HOY / HORA_ACTUAL
fn js_now() -> chrono::NaiveDateTime {
    let now = js_sys::Date::new_0();
    chrono::NaiveDate::from_ymd_opt(now.get_full_year() as i32, now.get_month() + 1, now.get_date())
        .and_then(|date| date.and_hms_opt(now.get_hours(), now.get_minutes(), now.get_seconds()))
        .unwrap_or_default()
}

/// 用发票数据渲染模板
#[wasm_bindgen]
pub fn render(
    zip_bytes: Vec<u8>,
    invoice_json: &str,
    config_json: Option<String>,
) -> Result<JsValue, JsValue> {
    let factura: Factura = serde_json::from_str(invoice_json)
        .map_err(|e| JsValue::from_str(&format!("JSON 解析错误: {e}")))?;
    let options = parse_options(config_json)?;
    let adapter = options.adapter.with_now(js_now());

    let result = template::render_invoice(zip_bytes, &factura, &adapter, &options.template)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    Ok(JsValue::from(result))
}

/// 用已经解析好的数据 ({"globals": {...}, "items": [...]}) 渲染模板
#[wasm_bindgen(js_name = renderBinding)]
pub fn render_binding(
    zip_bytes: Vec<u8>,
    binding_json: &str,
    config_json: Option<String>,
) -> Result<JsValue, JsValue> {
    let binding: Binding = serde_json::from_str(binding_json)
        .map_err(|e| JsValue::from_str(&format!("JSON 解析错误: {e}")))?;
    let options = parse_options(config_json)?;

    let result = template::render_template(zip_bytes, &binding, &options.template)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    Ok(JsValue::from(result))
}

/// 生成 HTML 预览
#[wasm_bindgen]
pub fn preview(zip_bytes: Vec<u8>, sheet_index: usize) -> Result<String, JsValue> {
    template::preview_workbook(&zip_bytes, sheet_index).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// 模板中用到的标记
#[wasm_bindgen]
pub fn markers(zip_bytes: Vec<u8>) -> Result<Vec<String>, JsValue> {
    template::collect_markers(&zip_bytes).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// 输出文件名, 如 proforma_A0042.xlsx
#[wasm_bindgen(js_name = fileName)]
pub fn file_name(kind: &str, reference: &str) -> Result<String, JsValue> {
    let kind: DocumentKind = serde_json::from_value(serde_json::Value::String(kind.to_string()))
        .map_err(|e| JsValue::from_str(&format!("未知的文档类型 {kind:?}: {e}")))?;
    Ok(kind.file_name(reference))
}
