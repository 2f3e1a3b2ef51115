//! 发票 -> Binding
//!
//! 数字和日期的格式化都在这里完成, 模板引擎只做字符串替换。

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::markers::{Binding, Item};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Exportador {
    pub nombre: String,
    pub rut: String,
    pub giro: String,
    pub direccion: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Consignatario {
    pub nombre: String,
    pub direccion: String,
    pub email: Option<String>,
    pub telefono: Option<String>,
    pub contacto: Option<String>,
    pub telefono_contacto: Option<String>,
    pub usci: Option<String>,
    pub codigo_postal: Option<String>,
    pub pais: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifyParty {
    pub nombre: Option<String>,
    pub direccion: Option<String>,
    pub contacto: Option<String>,
    pub usci: Option<String>,
    pub telefono: Option<String>,
    pub email: Option<String>,
    pub codigo_postal: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Embarque {
    pub fecha_factura: String,
    pub numero_invoice: String,
    pub numero_embarque: String,
    pub booking: Option<String>,
    pub csp: Option<String>,
    pub csg: Option<String>,
    pub fecha_embarque: String,
    pub motonave: String,
    pub numero_viaje: String,
    pub modalidad_venta: Option<String>,
    pub clausula_venta: String,
    pub pais_origen: String,
    pub puerto_embarque: String,
    pub puerto_destino: String,
    pub pais_destino_final: String,
    pub forma_pago: String,
    pub peso_neto_total: Option<f64>,
    pub peso_bruto_total: Option<f64>,
    pub contenedor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProductoFactura {
    pub cantidad: f64,
    pub tipo_envase: String,
    pub especie: Option<String>,
    pub variedad: String,
    pub categoria: String,
    pub etiqueta: String,
    pub calibre: String,
    pub kg_neto_unidad: f64,
    pub kg_bruto_unidad: f64,
    pub precio_por_caja: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Totales {
    pub cantidad_total: f64,
    pub valor_total: f64,
    pub valor_total_texto: String,
}

/// 发票
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Factura {
    pub id: Option<String>,
    pub registro_id: String,
    pub ref_asli: String,
    pub ref_cliente: Option<String>,
    pub exportador: Exportador,
    pub consignatario: Consignatario,
    pub notify_party: Option<NotifyParty>,
    pub embarque: Embarque,
    pub productos: Vec<ProductoFactura>,
    pub totales: Totales,
    pub cliente_plantilla: String,
}

/// 输出日期的格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "DD-MM-YYYY")]
    DayMonthYearDash,
    #[serde(rename = "DD/MM/YYYY")]
    DayMonthYear,
    #[serde(rename = "MM/DD/YYYY")]
    MonthDayYear,
    #[serde(rename = "YYYY-MM-DD")]
    Iso,
}

impl DateFormat {
    fn pattern(self) -> &'static str {
        match self {
            DateFormat::DayMonthYearDash => "%d-%m-%Y",
            DateFormat::DayMonthYear => "%d/%m/%Y",
            DateFormat::MonthDayYear => "%m/%d/%Y",
            DateFormat::Iso => "%Y-%m-%d",
        }
    }
}

/// 格式化选项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOptions {
    /// FECHA_HOY / FECHA_HOY_LARGO / HORA_ACTUAL 使用的当前时间
    #[serde(skip)]
    pub now: NaiveDateTime,
    #[serde(alias = "formato_fecha")]
    pub date_format: DateFormat,
    #[serde(alias = "separador_decimal")]
    pub decimal_separator: char,
    pub thousands_separator: Option<char>,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        AdapterOptions {
            now: NaiveDateTime::default(),
            date_format: DateFormat::default(),
            decimal_separator: '.',
            thousands_separator: None,
        }
    }
}

impl AdapterOptions {
    pub fn with_now(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }

    /// 固定两位小数
    pub fn money(&self, value: f64) -> String {
        self.localize(&format!("{value:.2}"))
    }

    /// 最短表示: 3, 2.5
    pub fn number(&self, value: f64) -> String {
        let plain = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        };
        self.localize(&plain)
    }

    /// 换上配置的小数点和千分位分隔符
    fn localize(&self, plain: &str) -> String {
        let (sign, digits) = match plain.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", plain),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (digits, None),
        };

        let mut out = String::with_capacity(plain.len() + int_part.len() / 3 + 1);
        out.push_str(sign);
        match self.thousands_separator {
            Some(sep) => {
                for (i, c) in int_part.chars().enumerate() {
                    if i > 0 && (int_part.len() - i) % 3 == 0 {
                        out.push(sep);
                    }
                    out.push(c);
                }
            }
            None => out.push_str(int_part),
        }
        if let Some(frac) = frac_part {
            out.push(self.decimal_separator);
            out.push_str(frac);
        }
        out
    }

    /// 重新格式化输入的日期, 无法识别时原样返回
    pub fn date(&self, input: &str) -> String {
        let input = input.trim();
        if input.is_empty() {
            return String::new();
        }
        match parse_date(input) {
            Some(date) => date.format(self.date_format.pattern()).to_string(),
            None => input.to_string(),
        }
    }

    fn today(&self) -> String {
        self.now.date().format(self.date_format.pattern()).to_string()
    }

    /// "15 de enero de 2024"
    fn today_long(&self) -> String {
        let date = self.now.date();
        let month = SPANISH_MONTHS[date.month0() as usize];
        format!("{} de {} de {}", date.day(), month, date.year())
    }

    fn time(&self) -> String {
        format!("{:02}:{:02}", self.now.hour(), self.now.minute())
    }
}

const SPANISH_MONTHS: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

fn parse_date(input: &str) -> Option<NaiveDate> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(input) {
        return Some(datetime.date_naive());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Some(datetime.date());
    }
    ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"]
        .iter()
        .find_map(|pattern| NaiveDate::parse_from_str(input, pattern).ok())
}

/// 文档类型, 决定输出文件名
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    #[default]
    Proforma,
    CommercialInvoice,
    PackingList,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Proforma => "proforma",
            DocumentKind::CommercialInvoice => "commercial_invoice",
            DocumentKind::PackingList => "packing_list",
        }
    }

    /// `<kind>_<reference>.xlsx`, 文件名中不允许的字符换成 `_`
    pub fn file_name(self, reference: &str) -> String {
        let reference: String = reference
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_whitespace() || c.is_control() => '_',
                c => c,
            })
            .collect();
        if reference.is_empty() {
            format!("{}.xlsx", self.as_str())
        } else {
            format!("{}_{}.xlsx", self.as_str(), reference)
        }
    }
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// 把发票转换成模板数据
pub fn binding_from_invoice(factura: &Factura, options: &AdapterOptions) -> Binding {
    let exportador = &factura.exportador;
    let consignatario = &factura.consignatario;
    let notify = factura.notify_party.clone().unwrap_or_default();
    let embarque = &factura.embarque;
    let totales = &factura.totales;

    let booking = embarque
        .booking
        .clone()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| embarque.numero_embarque.clone());

    let globals = [
        ("EXPORTADOR_NOMBRE", exportador.nombre.clone()),
        ("EXPORTADOR_RUT", exportador.rut.clone()),
        ("EXPORTADOR_GIRO", exportador.giro.clone()),
        ("EXPORTADOR_DIRECCION", exportador.direccion.clone()),
        ("EXPORTADOR_EMAIL", text(&exportador.email)),
        ("CONSIGNEE_COMPANY", consignatario.nombre.clone()),
        ("CONSIGNEE_ADDRESS", consignatario.direccion.clone()),
        ("CONSIGNEE_ATTN", text(&consignatario.contacto)),
        ("CONSIGNEE_USCC", text(&consignatario.usci)),
        ("CONSIGNEE_MOBILE", text(&consignatario.telefono)),
        ("CONSIGNEE_EMAIL", text(&consignatario.email)),
        ("CONSIGNEE_ZIP", text(&consignatario.codigo_postal)),
        ("CONSIGNEE_PAIS", consignatario.pais.clone()),
        ("NOTIFY_COMPANY", text(&notify.nombre)),
        ("NOTIFY_ADDRESS", text(&notify.direccion)),
        ("NOTIFY_ATTN", text(&notify.contacto)),
        ("NOTIFY_USCC", text(&notify.usci)),
        ("NOTIFY_MOBILE", text(&notify.telefono)),
        ("NOTIFY_EMAIL", text(&notify.email)),
        ("NOTIFY_ZIP", text(&notify.codigo_postal)),
        ("FECHA_FACTURA", options.date(&embarque.fecha_factura)),
        ("INVOICE_NUMBER", embarque.numero_invoice.clone()),
        ("EMBARQUE_NUMBER", embarque.numero_embarque.clone()),
        ("CSP", text(&embarque.csp)),
        ("CSG", text(&embarque.csg)),
        ("FECHA_EMBARQUE", options.date(&embarque.fecha_embarque)),
        ("MOTONAVE", embarque.motonave.clone()),
        ("VIAJE", embarque.numero_viaje.clone()),
        ("MODALIDAD_VENTA", text(&embarque.modalidad_venta)),
        ("CLAUSULA_VENTA", embarque.clausula_venta.clone()),
        ("PAIS_ORIGEN", embarque.pais_origen.clone()),
        ("PUERTO_EMBARQUE", embarque.puerto_embarque.clone()),
        ("PUERTO_DESTINO", embarque.puerto_destino.clone()),
        ("PAIS_DESTINO", embarque.pais_destino_final.clone()),
        ("FORMA_PAGO", embarque.forma_pago.clone()),
        ("CONTENEDOR", text(&embarque.contenedor)),
        ("REF_ASLI", factura.ref_asli.clone()),
        ("BOOKING", booking),
        ("REF_CLIENTE", text(&factura.ref_cliente)),
        ("CANTIDAD_TOTAL", options.number(totales.cantidad_total)),
        ("PESO_NETO_TOTAL", options.number(embarque.peso_neto_total.unwrap_or(0.0))),
        ("PESO_BRUTO_TOTAL", options.number(embarque.peso_bruto_total.unwrap_or(0.0))),
        ("VALOR_TOTAL", options.money(totales.valor_total)),
        ("VALOR_TOTAL_TEXTO", totales.valor_total_texto.clone()),
        ("FECHA_HOY", options.today()),
        ("FECHA_HOY_LARGO", options.today_long()),
        ("HORA_ACTUAL", options.time()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();

    let items = factura
        .productos
        .iter()
        .map(|p| item_from_product(p, options))
        .collect();

    Binding { globals, items }
}

fn item_from_product(producto: &ProductoFactura, options: &AdapterOptions) -> Item {
    [
        ("PRODUCTO_CANTIDAD", options.number(producto.cantidad)),
        ("PRODUCTO_TIPO_ENVASE", producto.tipo_envase.clone()),
        ("PRODUCTO_ESPECIE", text(&producto.especie)),
        ("PRODUCTO_VARIEDAD", producto.variedad.clone()),
        ("PRODUCTO_CATEGORIA", producto.categoria.clone()),
        ("PRODUCTO_ETIQUETA", producto.etiqueta.clone()),
        ("PRODUCTO_CALIBRE", producto.calibre.clone()),
        ("PRODUCTO_KG_NETO_UNIDAD", options.number(producto.kg_neto_unidad)),
        ("PRODUCTO_KG_BRUTO_UNIDAD", options.number(producto.kg_bruto_unidad)),
        ("PRODUCTO_PRECIO_CAJA", options.money(producto.precio_por_caja)),
        ("PRODUCTO_TOTAL", options.money(producto.total)),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}
