//! 在内存中构造 xlsx 模板

#![allow(dead_code)]

use std::io::{Cursor, Read, Write};

use xlsx_proforma::{CellValue, Sheet, Workbook};
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><color theme="1"/><name val="Calibri"/><family val="2"/><scheme val="minor"/></font><font><b/><sz val="12"/><color rgb="FF1F4E79"/><name val="Calibri"/><family val="2"/><scheme val="minor"/></font></fonts><fills count="3"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill><fill><patternFill patternType="solid"><fgColor rgb="FFFFFF00"/><bgColor indexed="64"/></patternFill></fill></fills><borders count="2"><border><left/><right/><top/><bottom/><diagonal/></border><border><left style="thin"><color indexed="64"/></left><right style="thin"><color indexed="64"/></right><top style="thin"><color indexed="64"/></top><bottom style="thin"><color indexed="64"/></bottom><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="5"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/><xf numFmtId="4" fontId="0" fillId="0" borderId="1" xfId="0" applyNumberFormat="1" applyBorder="1"/><xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/><xf numFmtId="0" fontId="0" fillId="2" borderId="1" xfId="0" applyFill="1" applyBorder="1"><alignment horizontal="center" wrapText="1"/></xf></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles><dxfs count="0"/><tableStyles count="0" defaultTableStyle="TableStyleMedium2" defaultPivotStyle="PivotStyleLight16"/></styleSheet>"#;

const CORE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:dcmitype="http://purl.org/dc/dcmitype/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><dc:creator>Operaciones</dc:creator><cp:lastModifiedBy>Operaciones</cp:lastModifiedBy><dcterms:created xsi:type="dcterms:W3CDTF">2024-01-10T12:00:00Z</dcterms:created><dcterms:modified xsi:type="dcterms:W3CDTF">2024-01-10T12:00:00Z</dcterms:modified></cp:coreProperties>"#;

const APP: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes"><Application>Microsoft Excel</Application><DocSecurity>0</DocSecurity><ScaleCrop>false</ScaleCrop><Company></Company><LinksUpToDate>false</LinksUpToDate><SharedDoc>false</SharedDoc><HyperlinksChanged>false</HyperlinksChanged><AppVersion>16.0300</AppVersion></Properties>"#;

pub const CHARTSHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<chartsheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheetPr/><sheetViews><sheetView zoomScale="115" workbookViewId="0" zoomToFit="1"/></sheetViews><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/></chartsheet>"#;

/// 模板构造器
#[derive(Debug, Default, Clone)]
pub struct Fixture {
    /// (名称, XML, 是否图表页)
    sheets: Vec<(String, String, bool)>,
    shared_strings: Vec<String>,
    calc_chain: bool,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加工作表, `rows` 是若干 `<row>` 元素
    pub fn sheet(mut self, name: &str, rows: &[String], merges: &[&str]) -> Self {
        self.sheets.push((name.to_string(), worksheet(&rows.concat(), merges), false));
        self
    }

    /// 添加图表页 (chartsheet), 没有 sheetData
    pub fn chartsheet(mut self, name: &str) -> Self {
        self.sheets.push((name.to_string(), CHARTSHEET.to_string(), true));
        self
    }

    /// 共享字符串, 每一项是 `<si>` 的内部 XML
    pub fn shared_strings(mut self, items: &[&str]) -> Self {
        self.shared_strings = items.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_calc_chain(mut self) -> Self {
        self.calc_chain = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut parts: Vec<(String, String)> = Vec::new();

        let mut overrides = String::from(
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        );
        for (i, (_, _, chart)) in self.sheets.iter().enumerate() {
            let (path, kind) = sheet_part(i + 1, *chart);
            overrides.push_str(&format!(
                r#"<Override PartName="/{path}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.{kind}+xml"/>"#
            ));
        }
        overrides.push_str(r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
        if self.calc_chain {
            overrides.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        }
        overrides.push_str(r#"<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/><Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#);
        parts.push((
            "[Content_Types].xml".into(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{overrides}</Types>"#
            ),
        ));

        parts.push((
            "_rels/.rels".into(),
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                .into(),
        ));

        let sheet_entries: String = self
            .sheets
            .iter()
            .enumerate()
            .map(|(i, (name, _, _))| format!(r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#, escape(name), i + 1, i + 1))
            .collect();
        parts.push((
            "xl/workbook.xml".into(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><fileVersion appName="xl" lastEdited="7" lowestEdited="7" rupBuild="27425"/><workbookPr defaultThemeVersion="166925"/><bookViews><workbookView xWindow="-120" yWindow="-120" windowWidth="29040" windowHeight="15840"/></bookViews><sheets>{sheet_entries}</sheets><calcPr calcId="191029"/></workbook>"#
            ),
        ));

        let mut rels: String = self
            .sheets
            .iter()
            .enumerate()
            .map(|(i, (_, _, chart))| {
                let (path, kind) = sheet_part(i + 1, *chart);
                let target = path.trim_start_matches("xl/");
                format!(
                    r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/{kind}" Target="{target}"/>"#,
                    i + 1
                )
            })
            .collect();
        rels.push_str(r#"<Relationship Id="rId100" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId101" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/>"#);
        if self.calc_chain {
            rels.push_str(r#"<Relationship Id="rId102" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#);
        }
        parts.push((
            "xl/_rels/workbook.xml.rels".into(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
            ),
        ));

        for (i, (_, xml, chart)) in self.sheets.iter().enumerate() {
            parts.push((sheet_part(i + 1, *chart).0, xml.clone()));
        }
        parts.push(("xl/styles.xml".into(), STYLES.into()));

        let items: String = self.shared_strings.iter().map(|s| format!("<si>{s}</si>")).collect();
        parts.push((
            "xl/sharedStrings.xml".into(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{n}" uniqueCount="{n}">{items}</sst>"#,
                n = self.shared_strings.len()
            ),
        ));
        if self.calc_chain {
            parts.push((
                "xl/calcChain.xml".into(),
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="D5" i="1"/></calcChain>"#
                    .into(),
            ));
        }
        parts.push(("docProps/core.xml".into(), CORE.into()));
        parts.push(("docProps/app.xml".into(), APP.into()));

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        for (name, contents) in parts {
            writer.start_file(name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}

/// 第 `index` 个工作表的部件路径和类型
fn sheet_part(index: usize, chart: bool) -> (String, &'static str) {
    if chart {
        (format!("xl/chartsheets/sheet{index}.xml"), "chartsheet")
    } else {
        (format!("xl/worksheets/sheet{index}.xml"), "worksheet")
    }
}

/// 完整的 worksheet XML
pub fn worksheet(rows: &str, merges: &[&str]) -> String {
    let merge_cells = if merges.is_empty() {
        String::new()
    } else {
        let refs: String = merges.iter().map(|m| format!(r#"<mergeCell ref="{m}"/>"#)).collect();
        format!(r#"<mergeCells count="{}">{refs}</mergeCells>"#, merges.len())
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="A1:F20"/><sheetViews><sheetView tabSelected="1" workbookViewId="0"><selection activeCell="A1" sqref="A1"/></sheetView></sheetViews><sheetFormatPr defaultRowHeight="15" x14ac:dyDescent="0.25" xmlns:x14ac="http://schemas.microsoft.com/office/spreadsheetml/2009/9/ac"/><cols><col min="1" max="1" width="14.7109375" customWidth="1"/><col min="2" max="6" width="18.7109375" customWidth="1"/></cols><sheetData>{rows}</sheetData>{merge_cells}<pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/><pageSetup paperSize="9" orientation="portrait"/></worksheet>"#
    )
}

pub fn row(r: u32, cells: &[String]) -> String {
    format!(r#"<row r="{r}">{}</row>"#, cells.concat())
}

pub fn row_with_height(r: u32, height: f64, cells: &[String]) -> String {
    format!(r#"<row r="{r}" ht="{height}" customHeight="1">{}</row>"#, cells.concat())
}

pub fn text(reference: &str, value: &str, style: u32) -> String {
    format!(r#"<c r="{reference}" s="{style}" t="inlineStr"><is><t>{}</t></is></c>"#, escape(value))
}

pub fn shared(reference: &str, index: usize, style: u32) -> String {
    format!(r#"<c r="{reference}" s="{style}" t="s"><v>{index}</v></c>"#)
}

pub fn number(reference: &str, value: f64, style: u32) -> String {
    format!(r#"<c r="{reference}" s="{style}"><v>{value}</v></c>"#)
}

pub fn formula(reference: &str, source: &str, cached: f64, style: u32) -> String {
    format!(r#"<c r="{reference}" s="{style}"><f>{}</f><v>{cached}</v></c>"#, escape(source))
}

pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// 读取压缩包中的某个部件
pub fn read_part(bytes: &[u8], name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).ok()?;
    let mut file = archive.by_name(name).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    Some(contents)
}

pub fn part_names(bytes: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect()
}

pub fn load(bytes: &[u8]) -> Workbook {
    Workbook::load(bytes).unwrap()
}

/// 单元格的文本 (文本、富文本、公式源码), 没有时为空
pub fn cell_text(sheet: &Sheet, row: u32, col: u32) -> String {
    sheet
        .cell(row, col)
        .and_then(|c| c.value.marker_text().map(|t| t.into_owned()))
        .unwrap_or_default()
}

pub fn cell_value(sheet: &Sheet, row: u32, col: u32) -> CellValue {
    sheet.cell(row, col).map(|c| c.value.clone()).unwrap_or_default()
}
