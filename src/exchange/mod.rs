//! Spreadsheet reading (xlsx, xls, csv) and writing (xlsx, csv)

pub mod export;
pub mod import;

use std::io::Cursor;
use std::str::FromStr;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, Workbook};

/// Spreadsheet errors
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("Unsupported file type. Please upload an Excel or CSV file.")]
    Unsupported,

    #[error("The file contains no rows")]
    Empty,

    #[error("Could not read workbook: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Could not read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Could not write workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Excel,
    Csv,
}

impl SheetFormat {
    pub fn from_filename(name: &str) -> Result<Self, SheetError> {
        let lower = name.trim().to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            Ok(SheetFormat::Excel)
        } else if lower.ends_with(".csv") {
            Ok(SheetFormat::Csv)
        } else {
            Err(SheetError::Unsupported)
        }
    }
}

/// First worksheet of an uploaded file; headers trimmed and lower-cased
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// 0-based data row position of each entry in `rows`, counting blank rows
    positions: Vec<usize>,
}

/// One data row addressed by header name
pub struct Record<'a> {
    /// 0-based position among data rows, blank rows included
    pub index: usize,
    headers: &'a [String],
    cells: &'a [String],
}

impl<'a> Record<'a> {
    /// Trimmed cell under `header`; `None` when missing or blank
    pub fn get(&self, header: &str) -> Option<&'a str> {
        let col = self.headers.iter().position(|h| h == header)?;
        self.cells
            .get(col)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }

    /// Row number as the user sees it in the spreadsheet
    pub fn sheet_row(&self) -> usize {
        self.index + 2
    }
}

impl Sheet {
    pub fn read(bytes: &[u8], format: SheetFormat) -> Result<Self, SheetError> {
        let mut grid = match format {
            SheetFormat::Excel => read_workbook(bytes)?,
            SheetFormat::Csv => read_csv(bytes)?,
        };
        if grid.is_empty() {
            return Err(SheetError::Empty);
        }
        let headers = grid
            .remove(0)
            .into_iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let (positions, rows) = grid
            .into_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|c| !c.trim().is_empty()))
            .unzip();
        Ok(Self {
            headers,
            rows,
            positions,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows
            .iter()
            .zip(&self.positions)
            .map(|(cells, &index)| Record {
                index,
                headers: &self.headers,
                cells,
            })
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}

fn read_workbook(bytes: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        return Ok(Vec::new());
    };
    Ok(range?
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

/// UTF-8 first, Latin-1 when that fails
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn read_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>, SheetError> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut grid = Vec::new();
    for record in reader.records() {
        grid.push(record?.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

/// Integer from a cell such as `3`, `3.0` or ` 3 `
pub fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim().trim_start_matches('$').replace(',', "");
    Decimal::from_str(&raw).ok()
}

/// Output formats for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    /// Anything but `csv` is xlsx
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_lowercase()).as_deref() {
            Some("csv") => ExportFormat::Csv,
            _ => ExportFormat::Xlsx,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// Typed cell so numbers stay numbers in xlsx output
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Integer(i64),
    Money(Decimal),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// Missing values render as "N/A"
    pub fn or_na(value: Option<impl Into<String>>) -> Self {
        Cell::Text(value.map(Into::into).unwrap_or_else(|| "N/A".to_string()))
    }

    fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Integer(i) => i.to_string(),
            Cell::Money(d) => format!("{:.2}", d),
        }
    }
}

/// Rows ready to be written
#[derive(Debug, Clone)]
pub struct Table {
    pub sheet_name: &'static str,
    pub headers: &'static [&'static str],
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn write(&self, format: ExportFormat) -> Result<Vec<u8>, SheetError> {
        match format {
            ExportFormat::Xlsx => self.to_xlsx(),
            ExportFormat::Csv => self.to_csv(),
        }
    }

    fn to_xlsx(&self) -> Result<Vec<u8>, SheetError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(self.sheet_name)?;

        for (col, header) in self.headers.iter().enumerate() {
            worksheet.write_string_with_format(0, col as u16, *header, &bold)?;
        }
        for (r, row) in self.rows.iter().enumerate() {
            let r = r as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Text(s) => worksheet.write_string(r, col, s)?,
                    Cell::Integer(i) => worksheet.write_number(r, col, *i as f64)?,
                    Cell::Money(d) => worksheet.write_number(r, col, d.to_f64().unwrap_or(0.0))?,
                };
            }
        }
        worksheet.autofit();
        Ok(workbook.save_to_buffer()?)
    }

    fn to_csv(&self) -> Result<Vec<u8>, SheetError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.headers)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::render))?;
        }
        writer.into_inner().map_err(|e| SheetError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_extensions() {
        assert_eq!(SheetFormat::from_filename("Items.XLSX").unwrap(), SheetFormat::Excel);
        assert_eq!(SheetFormat::from_filename("old.xls").unwrap(), SheetFormat::Excel);
        assert_eq!(SheetFormat::from_filename("a.csv").unwrap(), SheetFormat::Csv);
        assert!(matches!(
            SheetFormat::from_filename("notes.txt"),
            Err(SheetError::Unsupported)
        ));
    }

    #[test]
    fn csv_headers_are_normalized_and_blank_rows_dropped() {
        let sheet = Sheet::read(
            b" Item_Name ,DESCRIPTION,Quantity\nLaptop,Dell laptop,2\n,,\nMouse,,\n",
            SheetFormat::Csv,
        )
        .unwrap();
        assert_eq!(sheet.headers, vec!["item_name", "description", "quantity"]);
        let records: Vec<_> = sheet.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("item_name"), Some("Laptop"));
        assert_eq!(records[1].get("description"), None);
        assert_eq!(records[0].sheet_row(), 2);
        assert_eq!(records[1].sheet_row(), 4);
    }

    #[test]
    fn blank_rows_keep_later_row_numbers() {
        let sheet = Sheet::read(b"Item_Name,Description\nA,x\n,\nB,y\n", SheetFormat::Csv).unwrap();
        let rows: Vec<_> = sheet.records().map(|r| r.sheet_row()).collect();
        assert_eq!(rows, vec![2, 4]);
        let names: Vec<_> = sheet.records().filter_map(|r| r.get("item_name")).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn latin1_csv_is_decoded() {
        let sheet = Sheet::read(b"item_name\nCaf\xe9 sign\n", SheetFormat::Csv).unwrap();
        assert_eq!(sheet.rows[0][0], "Café sign");
    }

    #[test]
    fn written_xlsx_reads_back() {
        let table = Table {
            sheet_name: "Inventory",
            headers: &["Item Name", "Quantity"],
            rows: vec![vec![Cell::text("Laptop"), Cell::Integer(3)]],
        };
        let bytes = table.write(ExportFormat::Xlsx).unwrap();
        let sheet = Sheet::read(&bytes, SheetFormat::Excel).unwrap();
        assert_eq!(sheet.headers, vec!["item name", "quantity"]);
        assert_eq!(sheet.rows[0], vec!["Laptop".to_string(), "3".to_string()]);
    }

    #[test]
    fn numbers_parse_leniently() {
        assert_eq!(parse_int("3.0"), Some(3));
        assert_eq!(parse_int("2.5"), None);
        assert_eq!(parse_decimal("$1,250.5"), Decimal::from_str("1250.5").ok());
    }
}
