use calamine::{open_workbook_auto, DataType, Reader};
use chrono::Utc;
use log::{debug, warn};
use rust_xlsxwriter::{Format, Workbook};
use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCORER_URL_ENV: &str = "ICP_SCORER_URL";

const COMPANY_KEYWORDS: &[&str] = &["company"];
const DESIGNATION_KEYWORDS: &[&str] = &["designation", "job", "title"];
const PRIORITY_KEYWORDS: &[&str] = &["priority"];
const UPLOAD_EXTENSIONS: &[&str] = &["xlsx", "xls"];
const SHEET_IMPORT_EXTENSIONS: &[&str] = &["csv", "tsv", "txt", "xlsx", "xls"];
const SHEET_STORE_DIRECTORY: &str = ".icp-match";
const PREVIEW_ROW_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum IcpError {
    #[error("Please select a file and an ICP sheet to compare.")]
    MissingCompareInput,
    #[error("No scoring endpoint is configured. Pass --scorer-url or set {SCORER_URL_ENV}.")]
    MissingScorerUrl,
    #[error("Saved ICP sheet not found.")]
    SheetNotFound,
    #[error("The uploaded file appears to be empty.")]
    EmptyWorkbook,
    #[error("Could not find a company_name column in the uploaded sheet.")]
    MissingCompanyColumn,
    #[error("Could not find a designation column in the uploaded sheet.")]
    MissingDesignationColumn,
    #[error("Error reading the uploaded file. Please check the file format. ({0})")]
    Parse(String),
    #[error("{0}")]
    Scorer(String),
    #[error("{0}")]
    Store(String),
    #[error("{0}")]
    Report(String),
    #[error("{0}")]
    Input(String),
}

pub type IcpResult<T> = Result<T, IcpError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IcpRecord {
    pub company_name: String,
    pub designations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSavedRow {
    #[serde(default, alias = "company_name")]
    pub companyname: String,
    #[serde(default, alias = "designations")]
    pub designation: DesignationCell,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DesignationCell {
    Many(Vec<String>),
    One(String),
}

impl Default for DesignationCell {
    fn default() -> Self {
        DesignationCell::One(String::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSheet {
    pub name: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default)]
    pub rows: Vec<RawSavedRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub row_count: usize,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct SheetPreview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub company_column: Option<usize>,
    pub designation_column: Option<usize>,
    pub priority_column: Option<usize>,
}

// uploadedSheetData carries the saved sheet and compareSheetData carries the
// fresh upload. The scoring service fixes these names; do not swap them.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRequest {
    pub uploaded_sheet_data: Vec<IcpRecord>,
    pub compare_sheet_data: Vec<IcpRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResponse {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Vec<ScoredMatch>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub total_score: f64,
    #[serde(default)]
    pub percent: String,
}

#[derive(Debug, Deserialize)]
pub struct ScoredMatch {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub designation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResult {
    pub score: f64,
    pub total_score: f64,
    pub percent: String,
    pub data: Vec<MatchedPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedPair {
    pub company: String,
    pub designation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedColumns {
    pub company: usize,
    pub designation: usize,
}

pub fn resolve_column(headers: &[String], keywords: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let lowered = header.to_lowercase();
        !lowered.is_empty() && keywords.iter().any(|keyword| lowered.contains(keyword))
    })
}

pub fn resolve_upload_columns(headers: &[String]) -> IcpResult<ResolvedColumns> {
    let company =
        resolve_column(headers, COMPANY_KEYWORDS).ok_or(IcpError::MissingCompanyColumn)?;
    let designation =
        resolve_column(headers, DESIGNATION_KEYWORDS).ok_or(IcpError::MissingDesignationColumn)?;
    Ok(ResolvedColumns {
        company,
        designation,
    })
}

pub fn split_designations(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn normalize_uploaded_rows(rows: &[Vec<String>], columns: &ResolvedColumns) -> Vec<IcpRecord> {
    let mut records = Vec::new();

    for row in rows {
        let raw_company = row.get(columns.company).cloned().unwrap_or_default();
        let raw_designation = row.get(columns.designation).cloned().unwrap_or_default();

        // The first filter looks at the raw cell values before any trimming
        // or splitting; a whitespace-only cell survives until the second one.
        if raw_company.is_empty() || raw_designation.is_empty() {
            continue;
        }

        let company_name = raw_company.trim().to_string();
        let designations = split_designations(&raw_designation);

        if company_name.is_empty() || designations.is_empty() {
            continue;
        }

        records.push(IcpRecord {
            company_name,
            designations,
            priority: None,
        });
    }

    records
}

// Saved rows are forwarded without an emptiness filter, unlike uploaded rows.
// The scoring service has always received saved sheets unfiltered.
pub fn normalize_saved_rows(rows: &[RawSavedRow]) -> Vec<IcpRecord> {
    rows.iter()
        .map(|row| {
            let designations = match &row.designation {
                DesignationCell::Many(values) => {
                    values.iter().map(|value| value.trim().to_string()).collect()
                }
                DesignationCell::One(value) => split_designations(value),
            };

            IcpRecord {
                company_name: row.companyname.trim().to_string(),
                designations,
                priority: Some(row.priority.clone().unwrap_or_default().trim().to_string()),
            }
        })
        .collect()
}

pub fn assemble_comparison_request(
    saved: Vec<IcpRecord>,
    uploaded: Vec<IcpRecord>,
) -> ComparisonRequest {
    ComparisonRequest {
        uploaded_sheet_data: saved,
        compare_sheet_data: uploaded,
    }
}

pub fn prepare_comparison(
    store: &SheetStore,
    sheet_name: &str,
    upload_path: &Path,
) -> IcpResult<ComparisonRequest> {
    if let Some(message) = validate_extension(upload_path, UPLOAD_EXTENSIONS, "spreadsheet") {
        warn!("{message}");
    }

    let sheet = store.load(sheet_name)?;
    if sheet.rows.is_empty() {
        return Err(IcpError::SheetNotFound);
    }
    let saved_records = normalize_saved_rows(&sheet.rows);

    let (headers, rows) = read_full_spreadsheet(upload_path)?;
    let columns = resolve_upload_columns(&headers)?;
    let uploaded_records = normalize_uploaded_rows(&rows, &columns);

    debug!(
        "normalized {} saved and {} uploaded records for '{}'",
        saved_records.len(),
        uploaded_records.len(),
        sheet.name
    );

    Ok(assemble_comparison_request(saved_records, uploaded_records))
}

pub fn compare_sheets(
    store: &SheetStore,
    sheet_name: &str,
    upload: &str,
    scorer_url: &str,
) -> IcpResult<ComparisonResult> {
    let sheet_name = sheet_name.trim();
    let upload = upload.trim();
    if sheet_name.is_empty() || upload.is_empty() {
        return Err(IcpError::MissingCompareInput);
    }

    let scorer_url = scorer_url.trim();
    if scorer_url.is_empty() {
        return Err(IcpError::MissingScorerUrl);
    }

    let upload_path = resolve_existing_path(upload, "Spreadsheet file")?;
    let request = prepare_comparison(store, sheet_name, &upload_path)?;
    let response = submit_comparison(scorer_url, &request)?;
    Ok(result_from_response(response))
}

pub fn submit_comparison(endpoint: &str, request: &ComparisonRequest) -> IcpResult<ScoreResponse> {
    let client = reqwest::blocking::Client::builder()
        .build()
        .map_err(|err| IcpError::Scorer(format!("Unable to prepare the scoring client: {err}")))?;

    let response = client
        .post(endpoint)
        .json(request)
        .send()
        .map_err(|err| IcpError::Scorer(format!("Unable to reach the scoring service: {err}")))?;

    let status = response.status();
    let body = response
        .text()
        .map_err(|err| IcpError::Scorer(format!("Unable to read the scoring response: {err}")))?;

    let parsed: ScoreResponse = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("unparseable scoring response (HTTP {status}): {err}");
            if status.is_success() {
                return Err(IcpError::Scorer(
                    "The scoring service returned an unexpected response.".into(),
                ));
            }
            return Err(IcpError::Scorer(format!(
                "The scoring service request failed with status {status}."
            )));
        }
    };

    if !status.is_success() {
        let message = server_message(&parsed).unwrap_or_else(|| {
            format!("The scoring service request failed with status {status}.")
        });
        return Err(IcpError::Scorer(message));
    }

    ensure_scored(parsed)
}

pub fn ensure_scored(response: ScoreResponse) -> IcpResult<ScoreResponse> {
    if response.status {
        return Ok(response);
    }

    let message = server_message(&response)
        .unwrap_or_else(|| "The scoring service rejected the comparison request.".to_string());
    Err(IcpError::Scorer(message))
}

fn server_message(response: &ScoreResponse) -> Option<String> {
    response
        .message
        .as_deref()
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

pub fn result_from_response(response: ScoreResponse) -> ComparisonResult {
    ComparisonResult {
        score: response.score,
        total_score: response.total_score,
        percent: response.percent,
        data: response
            .data
            .into_iter()
            .map(|entry| MatchedPair {
                company: entry.company,
                designation: entry.designation.unwrap_or_default(),
            })
            .collect(),
    }
}

pub fn inspect_spreadsheet(path: &str) -> IcpResult<SheetPreview> {
    let spreadsheet = resolve_existing_path(path, "Spreadsheet file")?;
    let (headers, rows) = read_spreadsheet(&spreadsheet)?;

    Ok(SheetPreview {
        company_column: resolve_column(&headers, COMPANY_KEYWORDS),
        designation_column: resolve_column(&headers, DESIGNATION_KEYWORDS),
        priority_column: resolve_column(&headers, PRIORITY_KEYWORDS),
        headers,
        rows,
    })
}

pub struct SheetStore {
    directory: PathBuf,
}

impl SheetStore {
    pub fn open(data_dir: Option<&str>) -> IcpResult<Self> {
        let base = match data_dir.map(str::trim).filter(|value| !value.is_empty()) {
            Some(dir) => expand_home(dir),
            None => home_dir()
                .ok_or_else(|| {
                    IcpError::Store(
                        "Unable to locate a home directory for the ICP sheet store.".into(),
                    )
                })?
                .join(SHEET_STORE_DIRECTORY),
        };

        Ok(Self {
            directory: base.join("sheets"),
        })
    }

    pub fn save(&self, name: &str, source: &str) -> IcpResult<SavedSheet> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IcpError::Input("Provide a name for the ICP sheet.".into()));
        }

        let source_path = resolve_existing_path(source, "Spreadsheet file")?;
        if let Some(message) =
            validate_extension(&source_path, SHEET_IMPORT_EXTENSIONS, "spreadsheet")
        {
            warn!("{message}");
        }

        let (headers, rows) = read_full_spreadsheet(&source_path)?;
        let columns = resolve_upload_columns(&headers)?;
        let priority_column = resolve_column(&headers, PRIORITY_KEYWORDS);

        let mut saved_rows = Vec::new();
        let mut skipped = 0usize;
        for row in &rows {
            let companyname = row
                .get(columns.company)
                .map(|value| value.trim().to_string())
                .unwrap_or_default();
            let designations = row
                .get(columns.designation)
                .map(|value| split_designations(value))
                .unwrap_or_default();

            if companyname.is_empty() || designations.is_empty() {
                skipped += 1;
                continue;
            }

            let priority = priority_column.map(|index| {
                row.get(index)
                    .map(|value| value.trim().to_string())
                    .unwrap_or_default()
            });

            saved_rows.push(RawSavedRow {
                companyname,
                designation: DesignationCell::Many(designations),
                priority,
            });
        }

        if skipped > 0 {
            warn!("skipped {skipped} rows without a company or designation while importing '{name}'");
        }

        let sheet = SavedSheet {
            name: name.to_string(),
            created_at: Utc::now().to_rfc3339(),
            source_path: Some(
                source_path
                    .canonicalize()
                    .unwrap_or_else(|_| source_path.clone())
                    .to_string_lossy()
                    .into_owned(),
            ),
            rows: saved_rows,
        };

        let destination = self.sheet_path(name)?;
        ensure_parent_directory(&destination)?;
        let json = serde_json::to_string_pretty(&sheet)
            .map_err(|err| IcpError::Store(format!("Unable to serialize the ICP sheet: {err}")))?;
        fs::write(&destination, json)
            .map_err(|err| IcpError::Store(format!("Unable to persist the ICP sheet: {err}")))?;

        Ok(sheet)
    }

    pub fn load(&self, name: &str) -> IcpResult<SavedSheet> {
        let path = self.sheet_path(name)?;
        if !path.exists() {
            return Err(IcpError::SheetNotFound);
        }

        let data = fs::read(&path)
            .map_err(|err| IcpError::Store(format!("Unable to read the ICP sheet: {err}")))?;
        serde_json::from_slice(&data)
            .map_err(|err| IcpError::Store(format!("Unable to parse the ICP sheet: {err}")))
    }

    pub fn list(&self) -> IcpResult<Vec<SheetSummary>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.directory)
            .map_err(|err| IcpError::Store(format!("Unable to read the ICP sheet store: {err}")))?;

        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                IcpError::Store(format!("Unable to read the ICP sheet store: {err}"))
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            match fs::read(&path)
                .map_err(|err| err.to_string())
                .and_then(|data| {
                    serde_json::from_slice::<SavedSheet>(&data).map_err(|err| err.to_string())
                }) {
                Ok(sheet) => summaries.push(SheetSummary {
                    name: sheet.name,
                    row_count: sheet.rows.len(),
                    created_at: sheet.created_at,
                }),
                Err(err) => warn!("skipping unreadable sheet file {}: {err}", path.display()),
            }
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    pub fn delete(&self, name: &str) -> IcpResult<()> {
        let path = self.sheet_path(name)?;
        if !path.exists() {
            return Err(IcpError::SheetNotFound);
        }

        fs::remove_file(&path)
            .map_err(|err| IcpError::Store(format!("Unable to delete the ICP sheet: {err}")))
    }

    fn sheet_path(&self, name: &str) -> IcpResult<PathBuf> {
        let stem = sheet_file_stem(name);
        if stem.is_empty() {
            return Err(IcpError::Input("Provide a name for the ICP sheet.".into()));
        }
        Ok(self.directory.join(format!("{stem}.json")))
    }
}

fn sheet_file_stem(name: &str) -> String {
    let mut stem = String::new();
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            stem.push(ch.to_ascii_lowercase());
        } else if matches!(ch, '-' | '_' | ' ') {
            stem.push('-');
        }
    }
    stem.trim_matches('-').to_string()
}

fn ensure_parent_directory(path: &Path) -> IcpResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            IcpError::Store(format!("Unable to create the ICP sheet directory: {err}"))
        })?;
    }
    Ok(())
}

pub fn read_spreadsheet(path: &Path) -> IcpResult<(Vec<String>, Vec<Vec<String>>)> {
    read_spreadsheet_with_limit(path, Some(PREVIEW_ROW_LIMIT))
}

pub fn read_full_spreadsheet(path: &Path) -> IcpResult<(Vec<String>, Vec<Vec<String>>)> {
    read_spreadsheet_with_limit(path, None)
}

fn read_spreadsheet_with_limit(
    path: &Path,
    max_rows: Option<usize>,
) -> IcpResult<(Vec<String>, Vec<Vec<String>>)> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    if matches!(extension.as_str(), "xlsx" | "xlsm" | "xls" | "xlsb") {
        read_excel_spreadsheet_with_limit(path, max_rows)
    } else {
        read_delimited_spreadsheet_with_limit(path, max_rows)
    }
}

fn read_excel_spreadsheet_with_limit(
    path: &Path,
    max_rows: Option<usize>,
) -> IcpResult<(Vec<String>, Vec<Vec<String>>)> {
    let mut workbook = open_workbook_auto(path).map_err(|err| {
        warn!("unable to open workbook {}: {err}", path.display());
        IcpError::Parse(err.to_string())
    })?;

    // Only the first worksheet is read; any further worksheets are ignored.
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(IcpError::EmptyWorkbook)?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .ok_or_else(|| IcpError::Parse(format!("unable to read the worksheet '{sheet_name}'")))?
        .map_err(|err| {
            warn!("unable to read worksheet '{sheet_name}': {err}");
            IcpError::Parse(err.to_string())
        })?;

    let mut rows_iter = range.rows();
    let header_row = rows_iter.next().ok_or(IcpError::EmptyWorkbook)?;
    let mut headers: Vec<String> = header_row
        .iter()
        .map(|cell| cell_to_raw_string(cell).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let values: Vec<String> = row.iter().map(cell_to_raw_string).collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(values);
        if let Some(limit) = max_rows {
            if rows.len() >= limit {
                break;
            }
        }
    }

    align_row_lengths(&mut headers, &mut rows);
    Ok((headers, rows))
}

fn read_delimited_spreadsheet_with_limit(
    path: &Path,
    max_rows: Option<usize>,
) -> IcpResult<(Vec<String>, Vec<Vec<String>>)> {
    let delimiter = detect_delimiter(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| {
            warn!("unable to open spreadsheet {}: {err}", path.display());
            IcpError::Parse(err.to_string())
        })?;

    let mut headers: Vec<String> = reader
        .headers()
        .map_err(|err| IcpError::Parse(err.to_string()))?
        .iter()
        .map(|value| value.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|header| header.is_empty()) {
        return Err(IcpError::EmptyWorkbook);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| IcpError::Parse(err.to_string()))?;
        let values: Vec<String> = record.iter().map(str::to_string).collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(values);
        if let Some(limit) = max_rows {
            if rows.len() >= limit {
                break;
            }
        }
    }

    align_row_lengths(&mut headers, &mut rows);
    Ok((headers, rows))
}

fn cell_to_raw_string(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        DataType::String(value) => value.clone(),
        _ => cell.to_string(),
    }
}

fn align_row_lengths(headers: &mut Vec<String>, rows: &mut Vec<Vec<String>>) {
    let mut column_count = headers.len();
    for row in rows.iter() {
        if row.len() > column_count {
            column_count = row.len();
        }
    }

    if headers.len() < column_count {
        headers.resize(column_count, String::new());
    }

    for row in rows.iter_mut() {
        if row.len() < column_count {
            row.resize(column_count, String::new());
        } else if row.len() > column_count {
            row.truncate(column_count);
        }
    }
}

fn detect_delimiter(path: &Path) -> IcpResult<u8> {
    let file = File::open(path).map_err(|err| IcpError::Parse(err.to_string()))?;
    let mut reader = BufReader::new(file);
    let mut buffer = String::new();

    for _ in 0..5 {
        buffer.clear();
        let bytes_read = reader
            .read_line(&mut buffer)
            .map_err(|err| IcpError::Parse(err.to_string()))?;
        if bytes_read == 0 {
            break;
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let counts = [
            (b'\t', buffer.matches('\t').count()),
            (b',', buffer.matches(',').count()),
            (b';', buffer.matches(';').count()),
        ];

        if let Some((delimiter, count)) = counts.iter().max_by_key(|(_, count)| *count) {
            if *count > 0 {
                return Ok(*delimiter);
            }
        }
    }

    Ok(b',')
}

pub fn default_report_name() -> String {
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    format!("ICP_comparison_{timestamp}.xlsx")
}

pub fn build_comparison_workbook(
    sheet_name: &str,
    upload_name: &str,
    result: &ComparisonResult,
) -> IcpResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let summary = workbook.add_worksheet();
    summary
        .set_name("Summary")
        .map_err(|err| IcpError::Report(format!("Unable to configure the summary worksheet: {err}")))?;

    let labels = [
        ("Saved ICP sheet", sheet_name.to_string()),
        ("Uploaded file", upload_name.to_string()),
        ("Percent", result.percent.clone()),
        ("Matched companies", result.data.len().to_string()),
    ];
    for (row, (label, value)) in labels.iter().enumerate() {
        summary
            .write_string_with_format(row as u32, 0, *label, &header_format)
            .map_err(|err| IcpError::Report(format!("Unable to write the summary label: {err}")))?;
        summary
            .write_string(row as u32, 1, value)
            .map_err(|err| IcpError::Report(format!("Unable to write the summary value: {err}")))?;
    }

    summary
        .write_string_with_format(labels.len() as u32, 0, "Score", &header_format)
        .map_err(|err| IcpError::Report(format!("Unable to write the summary label: {err}")))?;
    summary
        .write_number(labels.len() as u32, 1, result.score)
        .map_err(|err| IcpError::Report(format!("Unable to write the score value: {err}")))?;
    summary
        .write_string_with_format(labels.len() as u32 + 1, 0, "Total score", &header_format)
        .map_err(|err| IcpError::Report(format!("Unable to write the summary label: {err}")))?;
    summary
        .write_number(labels.len() as u32 + 1, 1, result.total_score)
        .map_err(|err| IcpError::Report(format!("Unable to write the total score value: {err}")))?;

    let matches_sheet = workbook.add_worksheet();
    matches_sheet
        .set_name("Matches")
        .map_err(|err| IcpError::Report(format!("Unable to configure the matches worksheet: {err}")))?;

    for (column, header) in ["Company", "Designation"].iter().enumerate() {
        matches_sheet
            .write_string_with_format(0, column as u16, *header, &header_format)
            .map_err(|err| {
                IcpError::Report(format!("Unable to write the matches header row: {err}"))
            })?;
    }

    for (index, pair) in result.data.iter().enumerate() {
        let row = (index + 1) as u32;
        matches_sheet
            .write_string(row, 0, &pair.company)
            .map_err(|err| IcpError::Report(format!("Unable to write a matched company: {err}")))?;
        matches_sheet
            .write_string(row, 1, &pair.designation)
            .map_err(|err| {
                IcpError::Report(format!("Unable to write a matched designation: {err}"))
            })?;
    }

    workbook
        .save_to_buffer()
        .map_err(|err| IcpError::Report(format!("Unable to finalize the comparison report: {err}")))
}

pub fn write_comparison_report(
    path: &Path,
    sheet_name: &str,
    upload_name: &str,
    result: &ComparisonResult,
) -> IcpResult<()> {
    let buffer = build_comparison_workbook(sheet_name, upload_name, result)?;
    fs::write(path, buffer)
        .map_err(|err| IcpError::Report(format!("Unable to save the comparison report: {err}")))
}

fn resolve_existing_path(raw_path: &str, label: &str) -> IcpResult<PathBuf> {
    let provided = raw_path.trim();
    if provided.is_empty() {
        return Err(IcpError::Input(format!("{label} path is required.")));
    }

    let path = expand_home(provided);
    let metadata = fs::metadata(&path)
        .map_err(|_| IcpError::Input(format!("{label} was not found: {}", path.display())))?;

    if !metadata.is_file() {
        return Err(IcpError::Input(format!(
            "{label} is expected to be a file: {}",
            path.display()
        )));
    }

    Ok(path)
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
        return PathBuf::from(path);
    }

    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }

    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("USERPROFILE").map(PathBuf::from))
        .ok()
}

fn validate_extension(path: &Path, allowed: &[&str], label: &str) -> Option<String> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if allowed.iter().any(|value| ext.eq_ignore_ascii_case(value)) => None,
        Some(ext) => Some(format!(
            "The selected {label} uses '.{ext}', which is outside the expected extensions: {}.",
            allowed.join(", ")
        )),
        None => Some(format!(
            "The selected {label} does not include an extension. Confirm it is supported."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn record(company: &str, designations: &[&str], priority: Option<&str>) -> IcpRecord {
        IcpRecord {
            company_name: company.to_string(),
            designations: designations.iter().map(|value| value.to_string()).collect(),
            priority: priority.map(str::to_string),
        }
    }

    fn test_store(dir: &Path) -> SheetStore {
        SheetStore::open(Some(dir.to_str().unwrap())).unwrap()
    }

    fn write_sheet_file(dir: &Path, stem: &str, json: &str) {
        let sheets = dir.join("sheets");
        fs::create_dir_all(&sheets).unwrap();
        fs::write(sheets.join(format!("{stem}.json")), json).unwrap();
    }

    #[test]
    fn resolves_columns_case_insensitively() {
        let columns = resolve_upload_columns(&headers(&["Company Name", "Job Title"])).unwrap();
        assert_eq!(columns.company, 0);
        assert_eq!(columns.designation, 1);

        let columns = resolve_upload_columns(&headers(&["COMPANY", "DESIGNATION"])).unwrap();
        assert_eq!(columns.company, 0);
        assert_eq!(columns.designation, 1);
    }

    #[test]
    fn missing_columns_are_named_errors() {
        let err = resolve_upload_columns(&headers(&["Name", "Email"])).unwrap_err();
        assert!(matches!(err, IcpError::MissingCompanyColumn));

        let err = resolve_upload_columns(&headers(&["Company", "Email"])).unwrap_err();
        assert!(matches!(err, IcpError::MissingDesignationColumn));
    }

    #[test]
    fn first_matching_header_wins() {
        let found = resolve_column(&headers(&["", "Parent Company", "Company"]), COMPANY_KEYWORDS);
        assert_eq!(found, Some(1));

        let found = resolve_column(&headers(&["Job Title", "Designation"]), DESIGNATION_KEYWORDS);
        assert_eq!(found, Some(0));
    }

    #[test]
    fn splits_and_trims_designations() {
        assert_eq!(
            split_designations("CEO, Founder ,  Director"),
            vec!["CEO", "Founder", "Director"]
        );
        assert!(split_designations(" , ,").is_empty());
    }

    #[test]
    fn uploaded_rows_with_empty_cells_are_dropped() {
        let columns = ResolvedColumns {
            company: 0,
            designation: 1,
        };
        let rows = vec![
            row(&["Acme Corp", ""]),
            row(&["", "CEO"]),
            row(&["Hooli"]),
            row(&["Globex", "   "]),
            row(&["Initech", "CTO, VP"]),
        ];

        let records = normalize_uploaded_rows(&rows, &columns);
        assert_eq!(records, vec![record("Initech", &["CTO", "VP"], None)]);
    }

    #[test]
    fn uploaded_row_order_is_preserved() {
        let columns = ResolvedColumns {
            company: 0,
            designation: 1,
        };
        let rows = vec![row(&["Globex", "CFO"]), row(&["Acme", "CEO"])];

        let records = normalize_uploaded_rows(&rows, &columns);
        assert_eq!(records[0].company_name, "Globex");
        assert_eq!(records[1].company_name, "Acme");
    }

    #[test]
    fn saved_rows_pass_through() {
        let rows = vec![RawSavedRow {
            companyname: "Acme".into(),
            designation: DesignationCell::Many(vec!["VP".into()]),
            priority: Some("High".into()),
        }];

        let records = normalize_saved_rows(&rows);
        assert_eq!(records, vec![record("Acme", &["VP"], Some("High"))]);
    }

    #[test]
    fn saved_comma_strings_are_split() {
        let rows = vec![RawSavedRow {
            companyname: " Acme Corp ".into(),
            designation: DesignationCell::One("CEO, CTO,".into()),
            priority: None,
        }];

        let records = normalize_saved_rows(&rows);
        assert_eq!(records, vec![record("Acme Corp", &["CEO", "CTO"], Some(""))]);
    }

    #[test]
    fn saved_rows_are_never_filtered() {
        let rows = vec![
            RawSavedRow {
                companyname: String::new(),
                designation: DesignationCell::One(String::new()),
                priority: None,
            },
            RawSavedRow {
                companyname: "Acme".into(),
                designation: DesignationCell::Many(vec!["".into(), " VP ".into()]),
                priority: None,
            },
        ];

        let records = normalize_saved_rows(&rows);
        assert_eq!(records.len(), 2);
        assert!(records[0].company_name.is_empty());
        assert!(records[0].designations.is_empty());
        assert_eq!(records[1].designations, vec!["", "VP"]);
    }

    #[test]
    fn normalization_is_a_fixed_point() {
        let canonical = serde_json::json!({
            "company_name": "Acme Corp",
            "designations": ["CEO", "CTO"],
            "priority": "High"
        });

        let raw: RawSavedRow = serde_json::from_value(canonical).unwrap();
        let first = normalize_saved_rows(&[raw]);

        let round_trip: RawSavedRow =
            serde_json::from_value(serde_json::to_value(&first[0]).unwrap()).unwrap();
        let second = normalize_saved_rows(&[round_trip]);

        assert_eq!(first, second);
        assert_eq!(first[0], record("Acme Corp", &["CEO", "CTO"], Some("High")));
    }

    #[test]
    fn payload_preserves_field_inversion() {
        let saved = vec![record("Acme Corp", &["CEO", "CTO"], Some("High"))];
        let uploaded = vec![record("Acme Corp", &["CTO"], None)];

        let value = serde_json::to_value(assemble_comparison_request(saved, uploaded)).unwrap();
        assert_eq!(value["uploadedSheetData"][0]["company_name"], "Acme Corp");
        assert_eq!(value["uploadedSheetData"][0]["priority"], "High");
        assert_eq!(value["compareSheetData"][0]["company_name"], "Acme Corp");
        assert_eq!(value["compareSheetData"][0]["designations"][0], "CTO");
        assert!(value["compareSheetData"][0].get("priority").is_none());
    }

    #[test]
    fn response_maps_into_comparison_result() {
        let body = r#"{
            "status": true,
            "score": 10,
            "totalScore": 10,
            "percent": "100%",
            "data": [
                {"company": "Acme Corp", "designation": "CTO"},
                {"company": "Globex"}
            ]
        }"#;

        let response: ScoreResponse = serde_json::from_str(body).unwrap();
        let result = result_from_response(ensure_scored(response).unwrap());

        assert_eq!(result.score, 10.0);
        assert_eq!(result.total_score, 10.0);
        assert_eq!(result.percent, "100%");
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].company, "Acme Corp");
        assert_eq!(result.data[0].designation, "CTO");
        assert_eq!(result.data[1].designation, "");
    }

    #[test]
    fn scorer_rejection_prefers_server_message() {
        let response: ScoreResponse =
            serde_json::from_str(r#"{"status": false, "message": "Sheet mismatch"}"#).unwrap();
        let err = ensure_scored(response).unwrap_err();
        assert_eq!(err.to_string(), "Sheet mismatch");

        let response: ScoreResponse = serde_json::from_str(r#"{"status": false}"#).unwrap();
        let err = ensure_scored(response).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The scoring service rejected the comparison request."
        );
    }

    #[test]
    fn compare_requires_both_inputs_and_an_endpoint() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let err = compare_sheets(&store, "  ", "upload.xlsx", "http://localhost").unwrap_err();
        assert!(matches!(err, IcpError::MissingCompareInput));

        let err = compare_sheets(&store, "targets", "  ", "http://localhost").unwrap_err();
        assert!(matches!(err, IcpError::MissingCompareInput));

        let err = compare_sheets(&store, "targets", "upload.xlsx", "  ").unwrap_err();
        assert!(matches!(err, IcpError::MissingScorerUrl));
    }

    #[test]
    fn store_round_trip() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let source = dir.path().join("targets.tsv");
        fs::write(
            &source,
            "Company\tDesignation\tPriority\nAcme Corp\tCEO, CTO\tHigh\n\tCFO\tLow\n",
        )
        .unwrap();

        let sheet = store.save("Q1 Targets", source.to_str().unwrap()).unwrap();
        assert_eq!(sheet.rows.len(), 1);

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Q1 Targets");
        assert_eq!(listed[0].row_count, 1);

        let loaded = store.load("q1 targets").unwrap();
        assert_eq!(loaded.name, "Q1 Targets");
        let records = normalize_saved_rows(&loaded.rows);
        assert_eq!(records, vec![record("Acme Corp", &["CEO", "CTO"], Some("High"))]);

        store.delete("Q1 Targets").unwrap();
        assert!(matches!(
            store.load("Q1 Targets").unwrap_err(),
            IcpError::SheetNotFound
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn raw_disk_rows_normalize_on_fetch() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        write_sheet_file(
            dir.path(),
            "legacy",
            r#"{
                "name": "legacy",
                "created_at": "2026-01-01T00:00:00Z",
                "rows": [
                    {"company_name": " Acme ", "designation": "CEO,CTO", "priority": "High"}
                ]
            }"#,
        );

        let sheet = store.load("Legacy").unwrap();
        let records = normalize_saved_rows(&sheet.rows);
        assert_eq!(records, vec![record("Acme", &["CEO", "CTO"], Some("High"))]);
    }

    #[test]
    fn end_to_end_comparison_request() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());

        let source = dir.path().join("q1.tsv");
        fs::write(
            &source,
            "Company\tDesignation\tPriority\nAcme Corp\tCEO, CTO\tHigh\n",
        )
        .unwrap();
        store.save("Q1-Targets", source.to_str().unwrap()).unwrap();

        let upload = dir.path().join("upload.xlsx");
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.write_string(0, 0, "Company").unwrap();
        worksheet.write_string(0, 1, "Designation").unwrap();
        worksheet.write_string(1, 0, "Acme Corp").unwrap();
        worksheet.write_string(1, 1, "CTO").unwrap();
        workbook.save(&upload).unwrap();

        let request = prepare_comparison(&store, "Q1-Targets", &upload).unwrap();
        assert_eq!(
            request.uploaded_sheet_data,
            vec![record("Acme Corp", &["CEO", "CTO"], Some("High"))]
        );
        assert_eq!(
            request.compare_sheet_data,
            vec![record("Acme Corp", &["CTO"], None)]
        );
    }

    #[test]
    fn header_only_upload_proceeds_with_zero_records() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        write_sheet_file(
            dir.path(),
            "targets",
            r#"{
                "name": "targets",
                "created_at": "2026-01-01T00:00:00Z",
                "rows": [{"companyname": "Acme", "designation": ["CEO"], "priority": "High"}]
            }"#,
        );

        let upload = dir.path().join("upload.csv");
        fs::write(&upload, "Company,Designation\n").unwrap();

        let request = prepare_comparison(&store, "targets", &upload).unwrap();
        assert_eq!(request.uploaded_sheet_data.len(), 1);
        assert!(request.compare_sheet_data.is_empty());
    }

    #[test]
    fn empty_upload_is_an_error() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        write_sheet_file(
            dir.path(),
            "targets",
            r#"{
                "name": "targets",
                "created_at": "2026-01-01T00:00:00Z",
                "rows": [{"companyname": "Acme", "designation": ["CEO"]}]
            }"#,
        );

        let upload = dir.path().join("upload.csv");
        fs::write(&upload, "").unwrap();

        let err = prepare_comparison(&store, "targets", &upload).unwrap_err();
        assert!(matches!(err, IcpError::EmptyWorkbook));
    }

    #[test]
    fn missing_column_aborts_before_scoring() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        write_sheet_file(
            dir.path(),
            "targets",
            r#"{
                "name": "targets",
                "created_at": "2026-01-01T00:00:00Z",
                "rows": [{"companyname": "Acme", "designation": ["CEO"]}]
            }"#,
        );

        let upload = dir.path().join("upload.csv");
        fs::write(&upload, "Name,Email\nAlice,alice@example.com\n").unwrap();

        let err = prepare_comparison(&store, "targets", &upload).unwrap_err();
        assert!(matches!(err, IcpError::MissingCompanyColumn));
    }

    #[test]
    fn sheet_with_no_rows_is_reported_missing() {
        let dir = tempdir().unwrap();
        let store = test_store(dir.path());
        write_sheet_file(
            dir.path(),
            "targets",
            r#"{"name": "targets", "created_at": "2026-01-01T00:00:00Z", "rows": []}"#,
        );

        let upload = dir.path().join("upload.csv");
        fs::write(&upload, "Company,Designation\nAcme,CEO\n").unwrap();

        let err = prepare_comparison(&store, "targets", &upload).unwrap_err();
        assert!(matches!(err, IcpError::SheetNotFound));
    }

    #[test]
    fn excel_reader_uses_first_worksheet_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workbook.xlsx");

        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet();
        first.write_string(0, 0, "Company").unwrap();
        first.write_string(0, 1, "Designation").unwrap();
        first.write_string(1, 0, "Acme").unwrap();
        first.write_string(1, 1, "CEO").unwrap();
        let second = workbook.add_worksheet();
        second.write_string(0, 0, "Other").unwrap();
        second.write_string(1, 0, "Globex").unwrap();
        workbook.save(&path).unwrap();

        let (read_headers, rows) = read_full_spreadsheet(&path).unwrap();
        assert_eq!(read_headers, headers(&["Company", "Designation"]));
        assert_eq!(rows, vec![row(&["Acme", "CEO"])]);
    }

    #[test]
    fn delimiter_is_sniffed_per_file() {
        let dir = tempdir().unwrap();

        let commas = dir.path().join("commas.csv");
        fs::write(&commas, "Company,Designation\nAcme,CEO\n").unwrap();
        let (read_headers, rows) = read_full_spreadsheet(&commas).unwrap();
        assert_eq!(read_headers, headers(&["Company", "Designation"]));
        assert_eq!(rows, vec![row(&["Acme", "CEO"])]);

        let semicolons = dir.path().join("semicolons.txt");
        fs::write(&semicolons, "Company;Designation\nAcme;CEO\n").unwrap();
        let (read_headers, rows) = read_full_spreadsheet(&semicolons).unwrap();
        assert_eq!(read_headers, headers(&["Company", "Designation"]));
        assert_eq!(rows, vec![row(&["Acme", "CEO"])]);
    }

    #[test]
    fn ragged_rows_are_padded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "Company,Designation\nAcme\n").unwrap();

        let (read_headers, rows) = read_full_spreadsheet(&path).unwrap();
        assert_eq!(read_headers.len(), 2);
        assert_eq!(rows, vec![row(&["Acme", ""])]);
    }

    #[test]
    fn inspect_reports_resolved_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("preview.csv");
        fs::write(
            &path,
            "Priority,Company,Designation\nHigh,Acme,CEO\n",
        )
        .unwrap();

        let preview = inspect_spreadsheet(path.to_str().unwrap()).unwrap();
        assert_eq!(preview.company_column, Some(1));
        assert_eq!(preview.designation_column, Some(2));
        assert_eq!(preview.priority_column, Some(0));
        assert_eq!(preview.rows.len(), 1);
    }

    #[test]
    fn comparison_report_builds() {
        let result = ComparisonResult {
            score: 10.0,
            total_score: 10.0,
            percent: "100%".into(),
            data: vec![MatchedPair {
                company: "Acme Corp".into(),
                designation: "CTO".into(),
            }],
        };

        let buffer = build_comparison_workbook("Q1-Targets", "upload.xlsx", &result).unwrap();
        assert!(!buffer.is_empty());
    }

    #[test]
    fn report_names_are_timestamped() {
        let name = default_report_name();
        assert!(name.starts_with("ICP_comparison_"));
        assert!(name.ends_with(".xlsx"));
    }
}
