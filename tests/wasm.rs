#![cfg(target_arch = "wasm32")]

mod common;

use common::*;
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

fn template() -> Vec<u8> {
    Fixture::new()
        .sheet(
            "PROFORMA",
            &[
                row(1, &[text("A1", "{{EXPORTADOR_NOMBRE}}", 1), text("C1", "{{FECHA_HOY}}", 0)]),
                row(4, &[text("A4", "{{PRODUCTO_CANTIDAD}}", 0), text("B4", "{{PRODUCTO_VARIEDAD}}", 0)]),
                row(5, &[text("A5", "TOTAL", 1), text("B5", "{{VALOR_TOTAL}}", 2)]),
            ],
            &["A1:B2"],
        )
        .build()
}

const INVOICE: &str = r#"{
    "refAsli": "A0042",
    "exportador": {"nombre": "AGRICOLA SUR"},
    "productos": [{"cantidad": 10, "variedad": "SANTINA"}, {"cantidad": 20, "variedad": "LAPINS"}],
    "totales": {"valorTotal": 1500}
}"#;

#[wasm_bindgen_test]
fn render_from_invoice_json() {
    xlsx_proforma::set_panic_hook();
    xlsx_proforma::init_logging(Some("debug".into()));

    let output = xlsx_proforma::render(template(), INVOICE, None).unwrap();
    let bytes = js_sys::Uint8Array::new(&output).to_vec();

    let workbook = load(&bytes);
    let sheet = workbook.sheet_at(0).unwrap();
    assert_eq!(cell_text(sheet, 1, 1), "AGRICOLA SUR");
    assert_ne!(cell_text(sheet, 1, 3), "{{FECHA_HOY}}");
    assert_eq!(cell_text(sheet, 4, 2), "SANTINA");
    assert_eq!(cell_text(sheet, 5, 2), "LAPINS");
    assert_eq!(cell_text(sheet, 6, 2), "1500.00");
}

#[wasm_bindgen_test]
fn render_with_configuration() {
    let config = r#"{"strict_expansion": true, "anchor_markers": ["PRODUCTO_ETIQUETA"]}"#;
    let err = xlsx_proforma::render(template(), INVOICE, Some(config.into())).unwrap_err();
    assert!(err.as_string().unwrap().contains("no product row"));

    let err = xlsx_proforma::render(template(), "{", None).unwrap_err();
    assert!(err.as_string().is_some());
}

#[wasm_bindgen_test]
fn render_binding_json() {
    let binding = r#"{"globals": {"EXPORTADOR_NOMBRE": "X"}, "items": [{"variedad": "A"}]}"#;
    let output = xlsx_proforma::render_binding(template(), binding, None).unwrap();
    let bytes = js_sys::Uint8Array::new(&output).to_vec();
    let workbook = load(&bytes);
    assert_eq!(cell_text(workbook.sheet_at(0).unwrap(), 4, 2), "A");
}

#[wasm_bindgen_test]
fn preview_markers_and_file_name() {
    let html = xlsx_proforma::preview(template(), 0).unwrap();
    assert_eq!(html.matches(r#"colspan="2" rowspan="2""#).count(), 1);

    let markers = xlsx_proforma::markers(template()).unwrap();
    assert_eq!(markers[0], "EXPORTADOR_NOMBRE");

    assert_eq!(xlsx_proforma::file_name("proforma", "A0042").unwrap(), "proforma_A0042.xlsx");
    assert!(xlsx_proforma::file_name("cotizacion", "A1").is_err());

    let err: JsValue = xlsx_proforma::preview(Vec::new(), 0).unwrap_err();
    assert!(err.as_string().unwrap().contains("empty"));
}
