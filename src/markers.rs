//! 标记词表和解析
//!
//! 标记有两种等价写法: `{{NAME}}` 和带引号的 `"NAME"`。
//! 以 `PRODUCTO_` 开头的是商品行标记, 按每个商品单独解析; 其余是全局标记。

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// 商品行标记的前缀
pub const ITEM_PREFIX: &str = "PRODUCTO_";

/// 全局标记
pub const GLOBAL_MARKERS: &[&str] = &[
    // 出口商
    "EXPORTADOR_NOMBRE",
    "EXPORTADOR_RUT",
    "EXPORTADOR_GIRO",
    "EXPORTADOR_DIRECCION",
    "EXPORTADOR_EMAIL",
    // 收货人
    "CONSIGNEE_COMPANY",
    "CONSIGNEE_ADDRESS",
    "CONSIGNEE_ATTN",
    "CONSIGNEE_USCC",
    "CONSIGNEE_MOBILE",
    "CONSIGNEE_EMAIL",
    "CONSIGNEE_ZIP",
    "CONSIGNEE_PAIS",
    // 通知方
    "NOTIFY_COMPANY",
    "NOTIFY_ADDRESS",
    "NOTIFY_ATTN",
    "NOTIFY_USCC",
    "NOTIFY_MOBILE",
    "NOTIFY_EMAIL",
    "NOTIFY_ZIP",
    // 装运
    "FECHA_FACTURA",
    "INVOICE_NUMBER",
    "EMBARQUE_NUMBER",
    "CSP",
    "CSG",
    "FECHA_EMBARQUE",
    "MOTONAVE",
    "VIAJE",
    "MODALIDAD_VENTA",
    "CLAUSULA_VENTA",
    "PAIS_ORIGEN",
    "PUERTO_EMBARQUE",
    "PUERTO_DESTINO",
    "PAIS_DESTINO",
    "FORMA_PAGO",
    "CONTENEDOR",
    // 参考号
    "REF_ASLI",
    "BOOKING",
    "REF_CLIENTE",
    // 合计
    "CANTIDAD_TOTAL",
    "PESO_NETO_TOTAL",
    "PESO_BRUTO_TOTAL",
    "VALOR_TOTAL",
    "VALOR_TOTAL_TEXTO",
    // 日期时间
    "FECHA_HOY",
    "FECHA_HOY_LARGO",
    "HORA_ACTUAL",
];

/// 商品行标记
pub const ITEM_MARKERS: &[&str] = &[
    "PRODUCTO_CANTIDAD",
    "PRODUCTO_TIPO_ENVASE",
    "PRODUCTO_ESPECIE",
    "PRODUCTO_VARIEDAD",
    "PRODUCTO_CATEGORIA",
    "PRODUCTO_ETIQUETA",
    "PRODUCTO_CALIBRE",
    "PRODUCTO_KG_NETO_UNIDAD",
    "PRODUCTO_KG_BRUTO_UNIDAD",
    "PRODUCTO_PRECIO_CAJA",
    "PRODUCTO_TOTAL",
];

/// 出现在合计行中的标记
pub const TOTALS_MARKERS: &[&str] = &[
    "CANTIDAD_TOTAL",
    "PESO_NETO_TOTAL",
    "PESO_BRUTO_TOTAL",
    "VALOR_TOTAL",
    "VALOR_TOTAL_TEXTO",
];

/// 默认用来识别商品模板行的标记
pub const DEFAULT_ANCHOR_MARKERS: &[&str] = &["PRODUCTO_CANTIDAD", "PRODUCTO_VARIEDAD"];

/// `{{NAME}}` 或 `"NAME"`, 名字在第 1 或第 2 个捕获组
pub(crate) static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\{\{([A-Z_]+)\}\}|"([A-Z_]+)""#).unwrap());

/// 词表中是否有这个标记
pub fn is_known(name: &str) -> bool {
    GLOBAL_MARKERS.contains(&name) || ITEM_MARKERS.contains(&name)
}

pub fn is_item_marker(name: &str) -> bool {
    name.starts_with(ITEM_PREFIX)
}

/// 文本中出现的所有标记名, 按出现顺序, 可能重复
pub fn marker_names(text: &str) -> impl Iterator<Item = &str> {
    MARKER_RE.captures_iter(text).filter_map(|caps| marker_name(&caps))
}

fn marker_name<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str())
}

/// 一个商品: 标记名 (或去掉前缀的小写字段名) 到值
pub type Item = BTreeMap<String, String>;

/// 解析好的数据: 全局标记的值, 以及有序的商品列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default)]
    pub globals: BTreeMap<String, String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn with_item<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.items.push(fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }
}

/// 标记解析器
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    binding: &'a Binding,
}

impl<'a> Resolver<'a> {
    pub fn new(binding: &'a Binding) -> Self {
        Resolver { binding }
    }

    /// 解析一个标记
    ///
    /// 给出 item 且名字带商品前缀时, 从 item 中取值, 缺失为空字符串;
    /// 否则从全局数据中取值, 缺失返回 None, 原文保留不动。
    pub fn resolve(&self, name: &str, item: Option<&Item>) -> Option<String> {
        if let Some(item) = item
            && let Some(field) = name.strip_prefix(ITEM_PREFIX)
        {
            let value = item
                .get(name)
                .or_else(|| item.get(&field.to_ascii_lowercase()))
                .cloned()
                .unwrap_or_default();
            return Some(value);
        }
        self.binding.globals.get(name).cloned()
    }

    /// 替换文本中的全部标记, 没有任何替换时返回 None
    pub fn substitute(&self, text: &str, item: Option<&Item>) -> Option<String> {
        let mut changed = false;
        let replaced = MARKER_RE.replace_all(text, |caps: &Captures| {
            match marker_name(caps).and_then(|name| self.resolve(name, item)) {
                Some(value) => {
                    changed = true;
                    value
                }
                None => caps[0].to_string(),
            }
        });
        if changed { Some(replaced.into_owned()) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> Binding {
        Binding::new()
            .with_global("VIAJE", "024W")
            .with_global("EXPORTADOR_NOMBRE", "AGRICOLA SUR")
            .with_item([("PRODUCTO_VARIEDAD", "SANTINA"), ("PRODUCTO_TOTAL", "35000.00")])
    }

    #[test]
    fn resolves_globals_and_passes_unknown_through() {
        let binding = binding();
        let resolver = Resolver::new(&binding);
        assert_eq!(resolver.resolve("VIAJE", None).as_deref(), Some("024W"));
        assert_eq!(resolver.resolve("CSP", None), None);
        // 没有商品上下文时商品标记也按全局处理
        assert_eq!(resolver.resolve("PRODUCTO_VARIEDAD", None), None);
    }

    #[test]
    fn item_lookups_default_to_empty() {
        let binding = binding();
        let resolver = Resolver::new(&binding);
        let item = &binding.items[0];
        assert_eq!(resolver.resolve("PRODUCTO_VARIEDAD", Some(item)).as_deref(), Some("SANTINA"));
        assert_eq!(resolver.resolve("PRODUCTO_CALIBRE", Some(item)).as_deref(), Some(""));
        // 全局标记在商品上下文中仍然按全局解析
        assert_eq!(resolver.resolve("VIAJE", Some(item)).as_deref(), Some("024W"));
    }

    #[test]
    fn item_fields_may_use_short_names() {
        let binding = Binding::new().with_item([("variedad", "SANTINA"), ("kg_neto_unidad", "2.5")]);
        let resolver = Resolver::new(&binding);
        let item = &binding.items[0];
        assert_eq!(resolver.resolve("PRODUCTO_VARIEDAD", Some(item)).as_deref(), Some("SANTINA"));
        assert_eq!(resolver.resolve("PRODUCTO_KG_NETO_UNIDAD", Some(item)).as_deref(), Some("2.5"));
    }

    #[test]
    fn substitutes_both_syntaxes() {
        let binding = binding();
        let resolver = Resolver::new(&binding);
        assert_eq!(
            resolver.substitute(r#"Exp: {{EXPORTADOR_NOMBRE}} / "VIAJE""#, None).as_deref(),
            Some("Exp: AGRICOLA SUR / 024W")
        );
        assert_eq!(
            resolver
                .substitute("{{PRODUCTO_VARIEDAD}} / {{PRODUCTO_TOTAL}}", Some(&binding.items[0]))
                .as_deref(),
            Some("SANTINA / 35000.00")
        );
    }

    #[test]
    fn untouched_text_returns_none() {
        let binding = binding();
        let resolver = Resolver::new(&binding);
        assert_eq!(resolver.substitute("plain text", None), None);
        assert_eq!(resolver.substitute(r#"=IF(A1="YES",1,0)"#, None), None);
        assert_eq!(resolver.substitute("{{CSP}} {{lower}}", None), None);
    }

    #[test]
    fn partial_substitution_keeps_unknown_tokens() {
        let binding = binding();
        let resolver = Resolver::new(&binding);
        assert_eq!(
            resolver.substitute("{{VIAJE}} {{CSP}}", None).as_deref(),
            Some("024W {{CSP}}")
        );
    }

    #[test]
    fn lists_marker_names() {
        let names: Vec<_> = marker_names(r#"{{A_B}} "C" {{d}} {{E}}"#).collect();
        assert_eq!(names, vec!["A_B", "C", "E"]);
        assert!(is_known("PRODUCTO_TOTAL"));
        assert!(is_known("HORA_ACTUAL"));
        assert!(!is_known("PRODUCTO_COLOR"));
    }

    #[test]
    fn binding_from_json() {
        let binding: Binding = serde_json::from_str(
            r#"{"globals":{"VIAJE":"024W"},"items":[{"PRODUCTO_CANTIDAD":"10"},{"PRODUCTO_CANTIDAD":"20"}]}"#,
        )
        .unwrap();
        assert_eq!(binding.globals["VIAJE"], "024W");
        assert_eq!(binding.items.len(), 2);
        let empty: Binding = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Binding::default());
    }
}
