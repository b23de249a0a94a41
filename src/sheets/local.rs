use anyhow::{Context, Result};
use async_trait::async_trait;
use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{SheetBackend, SheetHandle};

#[derive(Debug, Clone, PartialEq)]
struct WorksheetData {
    title: String,
    rows: Vec<Vec<String>>,
}

/// Spreadsheets kept as worksheets of one local `.xlsx` workbook. The file is
/// rewritten on every change, so it can be opened by any spreadsheet program
/// between messages.
#[derive(Clone)]
pub struct LocalWorkbook {
    path: PathBuf,
    sheets: Arc<Mutex<Vec<WorksheetData>>>,
}

impl LocalWorkbook {
    /// Open the workbook at the given path; a missing file starts empty and
    /// is written on the first change.
    pub fn open(path: &Path) -> Result<Self> {
        let sheets = if path.exists() {
            read_workbook(path)?
        } else {
            Vec::new()
        };

        info!(
            "Local workbook opened at: {} ({} worksheets)",
            path.display(),
            sheets.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            sheets: Arc::new(Mutex::new(sheets)),
        })
    }

    fn handle(title: &str) -> SheetHandle {
        SheetHandle {
            id: title.to_string(),
            title: title.to_string(),
            worksheet: title.to_string(),
        }
    }

    /// Apply `change` to a copy of the sheets, save it, then keep it. A failed
    /// save leaves memory matching the file on disk.
    fn commit<F>(&self, sheets: &mut Vec<WorksheetData>, change: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<WorksheetData>) -> Result<()>,
    {
        let mut next = sheets.clone();
        change(&mut next)?;
        write_workbook(&self.path, &next)?;
        *sheets = next;
        Ok(())
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn read_workbook(path: &Path) -> Result<Vec<WorksheetData>> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

    let mut sheets = Vec::new();
    for title in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&title)
            .with_context(|| format!("Failed to read worksheet '{}'", title))?;

        // Ranges start at the first used cell, not at A1
        let (first_row, first_col) = range.start().unwrap_or((0, 0));
        let mut rows: Vec<Vec<String>> = vec![Vec::new(); first_row as usize];
        for cells in range.rows() {
            let mut row = vec![String::new(); first_col as usize];
            row.extend(cells.iter().map(cell_text));
            while row.last().is_some_and(|c| c.is_empty()) {
                row.pop();
            }
            rows.push(row);
        }
        sheets.push(WorksheetData { title, rows });
    }
    Ok(sheets)
}

fn write_workbook(path: &Path, sheets: &[WorksheetData]) -> Result<()> {
    let mut workbook = Workbook::new();
    for sheet in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(&sheet.title)
            .with_context(|| format!("Invalid worksheet name '{}'", sheet.title))?;
        for (r, row) in sheet.rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                worksheet
                    .write_string(r as u32, c as u16, value.as_str())
                    .with_context(|| format!("Failed to write cell in '{}'", sheet.title))?;
            }
        }
    }

    // Write next to the target, then swap it in
    let tmp = path.with_extension("xlsx.tmp");
    workbook
        .save(&tmp)
        .with_context(|| format!("Failed to save workbook: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace workbook: {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl SheetBackend for LocalWorkbook {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn find(&self, title: &str) -> Result<Option<SheetHandle>> {
        let sheets = self.sheets.lock().await;
        Ok(sheets
            .iter()
            .find(|s| s.title == title)
            .map(|s| Self::handle(&s.title)))
    }

    async fn create(&self, title: &str) -> Result<SheetHandle> {
        // Reject names Excel would refuse before they reach the file
        rust_xlsxwriter::Worksheet::new()
            .set_name(title)
            .with_context(|| format!("'{}' is not a valid worksheet name", title))?;

        let mut sheets = self.sheets.lock().await;
        if sheets.iter().any(|s| s.title.eq_ignore_ascii_case(title)) {
            anyhow::bail!("Worksheet '{}' already exists", title);
        }
        self.commit(&mut sheets, |next| {
            next.push(WorksheetData {
                title: title.to_string(),
                rows: Vec::new(),
            });
            Ok(())
        })
        .with_context(|| format!("Failed to create sheet '{}'", title))?;
        Ok(Self::handle(title))
    }

    async fn share(&self, sheet: &SheetHandle, email: &str) -> Result<()> {
        debug!(
            "Local workbook has no accounts; '{}' not shared with {}",
            sheet.title, email
        );
        Ok(())
    }

    async fn move_to_folder(&self, sheet: &SheetHandle, folder_id: &str) -> Result<()> {
        debug!(
            "Local workbook has no folders; '{}' stays in {}, not {}",
            sheet.title,
            self.path.display(),
            folder_id
        );
        Ok(())
    }

    async fn first_row(&self, sheet: &SheetHandle) -> Result<Option<Vec<String>>> {
        let sheets = self.sheets.lock().await;
        let data = sheets
            .iter()
            .find(|s| s.title == sheet.worksheet)
            .with_context(|| format!("Worksheet '{}' not found", sheet.worksheet))?;
        Ok(data.rows.first().filter(|row| !row.is_empty()).cloned())
    }

    async fn append_row(&self, sheet: &SheetHandle, row: &[String]) -> Result<()> {
        let mut sheets = self.sheets.lock().await;
        self.commit(&mut sheets, |next| {
            let data = next
                .iter_mut()
                .find(|s| s.title == sheet.worksheet)
                .with_context(|| format!("Worksheet '{}' not found", sheet.worksheet))?;
            data.rows.push(row.to_vec());
            Ok(())
        })
        .with_context(|| format!("Failed to append row to '{}'", sheet.title))
    }
}
