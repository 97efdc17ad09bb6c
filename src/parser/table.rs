use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::error::ExtractError;

pub const UNIT_MARKER: &str = "Единица измерения: Метрическая тонна";

/// Sheet column → expected header label (whitespace collapsed).
pub const COLUMNS: [(usize, &str); 6] = [
    (1, "Код Инструмента"),
    (2, "Наименование Инструмента"),
    (3, "Базис поставки"),
    (4, "Объем Договоров в единицах измерения"),
    (5, "Обьем Договоров, руб."),
    (14, "Количество Договоров, шт."),
];

/// The marker scan reads the first sheet row as column labels and counts
/// from the row beneath it; the header starts this many rows past the marker
/// in that count, i.e. directly under the marker on the sheet.
const HEADER_GAP: usize = 2;
const NO_TRADES: &str = "-";

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    pub fn text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => n.to_string(),
        }
    }

    fn is_text(&self, value: &str) -> bool {
        matches!(self, Cell::Text(s) if s.trim() == value)
    }
}

impl From<&Data> for Cell {
    fn from(d: &Data) -> Self {
        match d {
            Data::Empty => Cell::Empty,
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            // `#N/A` and friends stay visible so the row fails validation.
            Data::Error(e) => Cell::Text(e.to_string()),
        }
    }
}

/// Rectangular cell grid in absolute sheet coordinates.
pub type Sheet = Vec<Vec<Cell>>;

/// One instrument row of the traded-volume table, columns already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub product_code: Cell,
    pub product_name: Cell,
    pub delivery_basis_name: Cell,
    pub volume: Cell,
    pub total: Cell,
    pub contract_count: Cell,
}

impl RawRow {
    fn from_sheet_row(row: &[Cell]) -> Self {
        let at = |col: usize| row.get(col).cloned().unwrap_or(Cell::Empty);
        RawRow {
            product_code: at(COLUMNS[0].0),
            product_name: at(COLUMNS[1].0),
            delivery_basis_name: at(COLUMNS[2].0),
            volume: at(COLUMNS[3].0),
            total: at(COLUMNS[4].0),
            contract_count: at(COLUMNS[5].0),
        }
    }

    pub fn cells(&self) -> [&Cell; 6] {
        [
            &self.product_code,
            &self.product_name,
            &self.delivery_basis_name,
            &self.volume,
            &self.total,
            &self.contract_count,
        ]
    }

    fn is_blank(&self) -> bool {
        self.cells().iter().all(|c| c.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    rows: Vec<RawRow>,
}

impl RawTable {
    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

pub fn extract(bytes: &[u8]) -> Result<RawTable, ExtractError> {
    let sheet = decode_first_sheet(bytes)?;
    extract_from_sheet(&sheet)
}

/// Decode the first worksheet, padding so indexes are absolute sheet positions.
pub fn decode_first_sheet(bytes: &[u8]) -> Result<Sheet, ExtractError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ExtractError::NoWorksheet)??;
    let Some((row0, col0)) = range.start() else {
        return Ok(Vec::new());
    };

    let mut sheet: Sheet = vec![Vec::new(); row0 as usize];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col0 as usize];
        cells.extend(row.iter().map(Cell::from));
        sheet.push(cells);
    }
    Ok(sheet)
}

pub fn extract_from_sheet(sheet: &[Vec<Cell>]) -> Result<RawTable, ExtractError> {
    let marker_index = sheet
        .iter()
        .skip(1)
        .position(|row| row.iter().any(|c| c.is_text(UNIT_MARKER)))
        .ok_or(ExtractError::MarkerNotFound {
            marker: UNIT_MARKER,
        })?;
    let mut rows = sheet
        .iter()
        .skip(marker_index + HEADER_GAP)
        .map(|r| RawRow::from_sheet_row(r))
        .filter(|r| !r.is_blank());

    let header = rows.next().ok_or(ExtractError::HeaderNotFound)?;
    check_header(&header)?;

    let rows = rows
        .filter(|r| !r.contract_count.is_text(NO_TRADES))
        .collect();
    Ok(RawTable { rows })
}

fn check_header(header: &RawRow) -> Result<(), ExtractError> {
    for (cell, (position, expected)) in header.cells().into_iter().zip(COLUMNS) {
        let found = collapse_whitespace(&cell.text());
        if !found.eq_ignore_ascii_case(expected) {
            return Err(ExtractError::MissingColumn {
                position,
                expected,
                found,
            });
        }
    }
    Ok(())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bulletin, line};

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn sheet_row(cells: &[(usize, Cell)]) -> Vec<Cell> {
        let mut row = vec![Cell::Empty; 15];
        for (col, cell) in cells {
            row[*col] = cell.clone();
        }
        row
    }

    fn header() -> Vec<Cell> {
        sheet_row(&COLUMNS.map(|(col, label)| (col, text(&label.replace(' ', "\n")))))
    }

    fn instrument(code: &str, count: Cell) -> Vec<Cell> {
        sheet_row(&[
            (1, text(code)),
            (2, text("Дизельное топливо")),
            (3, text("ст. Пермь")),
            (4, Cell::Number(60.0)),
            (5, Cell::Number(4_200_000.0)),
            (14, count),
        ])
    }

    #[test]
    fn header_sits_right_below_marker() {
        let sheet = vec![
            sheet_row(&[(1, text("Бюллетень"))]),
            sheet_row(&[(1, text("Дата торгов: 15.04.2024"))]),
            sheet_row(&[(1, text(UNIT_MARKER))]),
            header(),
            instrument("DT00PRM060F", Cell::Number(2.0)),
        ];
        let table = extract_from_sheet(&sheet).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].product_code, text("DT00PRM060F"));
        assert_eq!(table.rows()[0].contract_count, Cell::Number(2.0));
    }

    #[test]
    fn dash_contract_count_rows_are_dropped() {
        let sheet = vec![
            sheet_row(&[(1, text("Бюллетень"))]),
            sheet_row(&[(1, text(UNIT_MARKER))]),
            header(),
            instrument("DT00PRM060F", text("-")),
            instrument("A592ANK060F", Cell::Number(3.0)),
            instrument("A100ANK060F", text(" - ")),
        ];
        let table = extract_from_sheet(&sheet).unwrap();
        let codes: Vec<_> = table.rows().iter().map(|r| r.product_code.text()).collect();
        assert_eq!(codes, vec!["A592ANK060F"]);
    }

    #[test]
    fn blank_rows_are_skipped() {
        let sheet = vec![
            sheet_row(&[(1, text("Бюллетень"))]),
            sheet_row(&[(1, text(UNIT_MARKER))]),
            header(),
            sheet_row(&[(7, text("only outside the table"))]),
            instrument("DT00PRM060F", Cell::Number(1.0)),
            Vec::new(),
        ];
        assert_eq!(extract_from_sheet(&sheet).unwrap().len(), 1);
    }

    #[test]
    fn missing_marker_is_an_error() {
        let sheet = vec![sheet_row(&[(1, text("Бюллетень"))]), header()];
        assert!(matches!(
            extract_from_sheet(&sheet),
            Err(ExtractError::MarkerNotFound { .. })
        ));
    }

    #[test]
    fn marker_in_title_row_does_not_count() {
        let sheet = vec![sheet_row(&[(1, text(UNIT_MARKER))]), header()];
        assert!(matches!(
            extract_from_sheet(&sheet),
            Err(ExtractError::MarkerNotFound { .. })
        ));
    }

    #[test]
    fn unexpected_column_fails_fast() {
        let mut bad_header = header();
        bad_header[14] = text("Цена");
        let sheet = vec![
            sheet_row(&[(1, text("Бюллетень"))]),
            sheet_row(&[(1, text(UNIT_MARKER))]),
            bad_header,
        ];
        match extract_from_sheet(&sheet) {
            Err(ExtractError::MissingColumn { position, found, .. }) => {
                assert_eq!(position, 14);
                assert_eq!(found, "Цена");
            }
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }

    #[test]
    fn nothing_below_marker() {
        let sheet = vec![
            sheet_row(&[(1, text("Бюллетень"))]),
            sheet_row(&[(1, text(UNIT_MARKER))]),
        ];
        assert!(matches!(
            extract_from_sheet(&sheet),
            Err(ExtractError::HeaderNotFound)
        ));
    }

    #[test]
    fn decodes_a_real_workbook() {
        let bytes = bulletin(&[
            line("A592ANK060F", 60.0, 3_900_000.0, "1"),
            line("DT00PRM060F", 0.0, 0.0, "-"),
        ]);
        let table = extract(&bytes).unwrap();
        // section label + one traded line + two totals
        assert_eq!(table.len(), 4);
        assert_eq!(table.rows()[1].product_code, text("A592ANK060F"));
        assert_eq!(table.rows()[1].volume, Cell::Number(60.0));
    }

    #[test]
    fn error_cells_are_not_empty() {
        let cell = Cell::from(&Data::Error(calamine::CellErrorType::NA));
        assert_eq!(cell, text("#N/A"));
        assert!(!cell.is_empty());
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(matches!(
            extract(b"definitely not a spreadsheet"),
            Err(ExtractError::Decode(_))
        ));
    }
}
