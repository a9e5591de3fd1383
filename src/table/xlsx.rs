use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

#[derive(Clone, Debug)]
struct SheetRef {
    name: String,
    part: String,
}

/// Read-only view of an .xlsx package: sheet list, shared strings and raw sheet parts.
pub struct Workbook {
    sheets: Vec<SheetRef>,
    shared_strings: Vec<String>,
    parts: HashMap<String, Vec<u8>>,
}

impl Workbook {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open xlsx: {}", path.display()))?;
        let mut zip = ZipArchive::new(f)
            .with_context(|| format!("read xlsx zip: {}", path.display()))?;
        let mut parts: HashMap<String, Vec<u8>> = HashMap::new();
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("xlsx entry")?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            if !name.ends_with(".xml") && !name.ends_with(".rels") {
                continue;
            }
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read xlsx entry: {name}"))?;
            parts.insert(name, data);
        }
        Self::from_parts(parts).with_context(|| format!("parse xlsx: {}", path.display()))
    }

    fn from_parts(parts: HashMap<String, Vec<u8>>) -> anyhow::Result<Self> {
        let workbook = parts
            .get(WORKBOOK_PART)
            .ok_or_else(|| anyhow!("missing {WORKBOOK_PART}"))?;
        let declared = parse_workbook_sheets(workbook)?;
        let rels = match parts.get(WORKBOOK_RELS_PART) {
            Some(b) => parse_relationships(b)?,
            None => HashMap::new(),
        };

        let mut sheets: Vec<SheetRef> = Vec::with_capacity(declared.len());
        for (idx, (name, rid)) in declared.into_iter().enumerate() {
            let part = rels
                .get(&rid)
                .map(|target| resolve_target(target))
                .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", idx + 1));
            sheets.push(SheetRef { name, part });
        }

        let shared_strings = match parts.get(SHARED_STRINGS_PART) {
            Some(b) => parse_shared_strings(b)?,
            None => Vec::new(),
        };

        Ok(Self {
            sheets,
            shared_strings,
            parts,
        })
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// First sheet whose name contains `needle`.
    pub fn find_sheet(&self, needle: &str) -> Option<&str> {
        self.sheets
            .iter()
            .find(|s| s.name.contains(needle))
            .map(|s| s.name.as_str())
    }

    /// Dense rows of the named sheet; missing cells come back as "".
    pub fn rows(&self, sheet: &str) -> anyhow::Result<Vec<Vec<String>>> {
        let sref = self
            .sheets
            .iter()
            .find(|s| s.name == sheet)
            .ok_or_else(|| anyhow!("sheet not found: {sheet}"))?;
        let xml = self
            .parts
            .get(&sref.part)
            .ok_or_else(|| anyhow!("sheet part missing: {}", sref.part))?;
        parse_sheet(xml, &self.shared_strings).with_context(|| format!("parse sheet: {sheet}"))
    }

    pub fn first_sheet_rows(&self) -> anyhow::Result<Vec<Vec<String>>> {
        let first = self
            .sheets
            .first()
            .ok_or_else(|| anyhow!("workbook has no sheets"))?;
        self.rows(&first.name)
    }
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn attr_value(s: &BytesStart<'_>, key: &[u8]) -> anyhow::Result<Option<String>> {
    for a in s.attributes() {
        let a = a.context("attr")?;
        if a.key.as_ref() == key || a.key.local_name().as_ref() == key {
            return Ok(Some(a.unescape_value().context("attr value")?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_workbook_sheets(xml: &[u8]) -> anyhow::Result<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut out: Vec<(String, String)> = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read workbook xml")? {
            Event::Eof => break,
            Event::Start(s) | Event::Empty(s) if s.local_name().as_ref() == b"sheet" => {
                let name = attr_value(&s, b"name")?.unwrap_or_default();
                let rid = attr_value(&s, b"r:id")?.unwrap_or_default();
                out.push((name, rid));
            }
            _ => {}
        }
    }
    Ok(out)
}

fn parse_relationships(xml: &[u8]) -> anyhow::Result<HashMap<String, String>> {
    let mut reader = Reader::from_reader(xml);
    let mut out: HashMap<String, String> = HashMap::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read rels xml")? {
            Event::Eof => break,
            Event::Start(s) | Event::Empty(s) if s.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) =
                    (attr_value(&s, b"Id")?, attr_value(&s, b"Target")?)
                {
                    out.insert(id, target);
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

fn parse_shared_strings(xml: &[u8]) -> anyhow::Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut in_phonetic = false;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read shared strings")? {
            Event::Eof => break,
            Event::Start(s) => match s.local_name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = true,
                _ => {}
            },
            Event::Empty(s) if s.local_name().as_ref() == b"si" => out.push(String::new()),
            Event::Text(t) if in_t && !in_phonetic => {
                current.push_str(&t.unescape().context("unescape shared string")?);
            }
            Event::CData(t) if in_t && !in_phonetic => {
                current.push_str(&String::from_utf8_lossy(&t.into_inner()));
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"si" => out.push(std::mem::take(&mut current)),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(out)
}

/// Columns past `XFD` do not exist in a worksheet.
const MAX_COLUMNS: usize = 16_384;

/// `AB12` -> 27 (zero based). `None` for a missing or out-of-range column.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut acc = 0usize;
    for ch in cell_ref.chars().take_while(char::is_ascii_alphabetic) {
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
        if acc > MAX_COLUMNS {
            return None;
        }
    }
    acc.checked_sub(1)
}

struct CellCursor {
    col: usize,
    kind: String,
    raw: String,
}

impl CellCursor {
    fn from_start(s: &BytesStart<'_>, next_col: usize) -> anyhow::Result<Self> {
        let col = attr_value(s, b"r")?
            .as_deref()
            .and_then(column_index)
            .unwrap_or(next_col);
        let kind = attr_value(s, b"t")?.unwrap_or_default();
        Ok(Self {
            col,
            kind,
            raw: String::new(),
        })
    }

    fn resolve(self, shared: &[String]) -> String {
        match self.kind.as_str() {
            "s" => self
                .raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared.get(i).cloned())
                .unwrap_or_default(),
            "b" => match self.raw.trim() {
                "1" => "TRUE".to_string(),
                "0" => "FALSE".to_string(),
                other => other.to_string(),
            },
            _ => self.raw,
        }
    }
}

fn place(row: &mut Vec<String>, col: usize, value: String) {
    if row.len() <= col {
        row.resize(col + 1, String::new());
    }
    row[col] = value;
}

fn parse_sheet(xml: &[u8], shared: &[String]) -> anyhow::Result<Vec<Vec<String>>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell: Option<CellCursor> = None;
    let mut capture = false;
    let mut next_col = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_event_into(&mut buf).context("read sheet xml")? {
            Event::Eof => break,
            Event::Start(s) => match s.local_name().as_ref() {
                b"row" => {
                    row.clear();
                    next_col = 0;
                }
                b"c" => cell = Some(CellCursor::from_start(&s, next_col)?),
                b"v" | b"t" if cell.is_some() => capture = true,
                b"rPh" => capture = false,
                _ => {}
            },
            Event::Empty(s) => match s.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => next_col = CellCursor::from_start(&s, next_col)?.col + 1,
                _ => {}
            },
            Event::Text(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.raw.push_str(&t.unescape().context("unescape cell text")?);
                }
            }
            Event::CData(t) if capture => {
                if let Some(c) = cell.as_mut() {
                    c.raw.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        next_col = c.col + 1;
                        let col = c.col;
                        place(&mut row, col, c.resolve(shared));
                    }
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(rows)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("AB12"), Some(27));
        assert_eq!(column_index("12"), None);
        assert_eq!(column_index("XFD1"), Some(16_383));
        assert_eq!(column_index("XFE1"), None);
        assert_eq!(column_index(&format!("{}1", "Z".repeat(40))), None);
    }

    #[test]
    fn shared_strings_skip_phonetic_runs() {
        let xml = br#"<sst><si><t>plain</t></si><si><r><t>ri</t></r><r><t>ch</t></r><rPh><t>x</t></rPh></si><si/></sst>"#;
        let got = parse_shared_strings(xml).expect("parse");
        assert_eq!(got, vec!["plain", "rich", ""]);
    }

    #[test]
    fn sparse_cells_land_in_their_columns() {
        let shared = vec!["hello".to_string()];
        let xml = br#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1"><v>42</v></c></row><row r="2"><c r="B2" t="b"><v>1</v></c></row></sheetData></worksheet>"#;
        let rows = parse_sheet(xml, &shared).expect("parse");
        assert_eq!(rows[0], vec!["hello", "", "42"]);
        assert_eq!(rows[1], vec!["", "TRUE"]);
    }

    #[test]
    fn reads_written_workbook() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("book.xlsx");
        fixtures::write_workbook(
            &path,
            &[
                ("Sheet1", vec![vec!["id", "词条"], vec!["1", "打开 & 关闭"]]),
                ("翻译简写说明", vec![vec!["中文", "英文缩写"]]),
            ],
        );
        let wb = Workbook::open(&path).expect("open");
        assert_eq!(wb.sheet_names(), vec!["Sheet1", "翻译简写说明"]);
        assert_eq!(wb.find_sheet("简写"), Some("翻译简写说明"));
        let rows = wb.first_sheet_rows().expect("rows");
        assert_eq!(rows[1], vec!["1", "打开 & 关闭"]);
    }
}
