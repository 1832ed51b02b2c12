use anyhow::{anyhow, Context};
use std::io::{Cursor, Read, Write};
use tracing::{error, info};
use umya_spreadsheet::{Spreadsheet, Worksheet};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ExportError;
use crate::helpers::layout::{Banner, RowBlock, SummaryLayout, TemplateLayout, ROW_COLUMNS};
use crate::models::attendance::{AttendanceRequest, MarkCounts};

pub const PERCENT_FORMAT: &str = "0.0%";

const WORKBOOK_PART: &str = "xl/workbook.xml";
const FULL_CALC_ATTR: &str = "fullCalcOnLoad=\"1\"";

const FACT_LABELS: [&str; 6] = [
    "Mes",
    "Escuela",
    "Grupo",
    "Alumnos",
    "Días (calendario)",
    "Marcaciones esperadas",
];
const METRIC_HEADINGS: [&str; 5] = [
    "Métrica",
    "Valor",
    "% sobre registradas",
    "% sobre esperadas",
    "Gráfico",
];
const METRIC_LABELS: [&str; 3] = ["A", "R", "F"];

/// Parse template bytes into an in-memory workbook.
pub fn load_template(bytes: &[u8]) -> Result<Spreadsheet, ExportError> {
    match umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes), true) {
        Ok(book) => {
            info!("Parsed template workbook ({} bytes)", bytes.len());
            Ok(book)
        }
        Err(e) => {
            error!("Failed to parse template: {}", e);
            Err(ExportError::TemplateLoadFailed(e.to_string()))
        }
    }
}

/// Write the daily, summary and per-student sheets.
///
/// Every pass clears its target range first, so running this twice on the
/// same workbook leaves the same cells as running it once.
pub fn populate(
    book: &mut Spreadsheet,
    layout: &TemplateLayout,
    request: &AttendanceRequest,
) -> Result<(), ExportError> {
    write_daily(sheet_mut(book, layout.daily.sheet)?, &layout.daily, request);
    write_summary(sheet_mut(book, layout.summary.sheet)?, &layout.summary, request);
    write_per_student(
        sheet_mut(book, layout.per_student.sheet)?,
        &layout.per_student,
        request,
    );

    info!(
        "Wrote {} day row(s) and {} student row(s) for {}/{}/{}",
        request.all_days.len(),
        request.students.len(),
        request.school_id,
        request.group_id,
        request.year_month
    );
    Ok(())
}

/// Serialize the workbook and flag it for full recalculation on open.
pub fn render(book: &Spreadsheet) -> Result<Vec<u8>, ExportError> {
    let mut buffer = Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(book, &mut buffer).map_err(|e| {
        error!("Failed to serialize workbook: {}", e);
        ExportError::OutputFailed(e.to_string())
    })?;

    let bytes = force_full_calc(buffer.get_ref()).map_err(|e| {
        error!("Failed to set recalculation flag: {:#}", e);
        ExportError::OutputFailed(format!("{:#}", e))
    })?;
    info!("Serialized workbook, size: {} bytes", bytes.len());
    Ok(bytes)
}

fn sheet_mut<'a>(book: &'a mut Spreadsheet, name: &str) -> Result<&'a mut Worksheet, ExportError> {
    book.get_sheet_by_name_mut(name)
        .ok_or_else(|| ExportError::WriteFailed(format!("sheet '{}' not found in template", name)))
}

fn write_daily(sheet: &mut Worksheet, block: &RowBlock, request: &AttendanceRequest) {
    clear_block(sheet, block);
    for (row, day) in (block.first_row..).zip(request.sorted_days()) {
        write_counts_row(sheet, row, day, request.day_counts(day));
    }
}

fn write_per_student(sheet: &mut Worksheet, block: &RowBlock, request: &AttendanceRequest) {
    clear_block(sheet, block);
    for (row, student) in (block.first_row..).zip(&request.students) {
        write_counts_row(
            sheet,
            row,
            student.display_name(),
            request.student_counts(student),
        );
    }
}

fn write_summary(sheet: &mut Worksheet, layout: &SummaryLayout, request: &AttendanceRequest) {
    if let Some(banner) = &layout.banner {
        let label = format!("{} {}", banner.label, request.year_month);
        rewrite_banner(sheet, banner, &label);
    }

    let summary = request.summary();

    for (row, label) in (layout.facts_first_row..).zip(FACT_LABELS) {
        set_text(sheet, &cell(layout.label_column, row), label);
    }
    let text_facts = [&request.year_month, &request.school_id, &request.group_id];
    for (row, value) in (layout.facts_first_row..).zip(text_facts) {
        set_text(sheet, &cell(layout.count_column, row), value);
    }
    let number_facts = [
        request.students.len() as f64,
        request.all_days.len() as f64,
        summary.expected_marks as f64,
    ];
    for (row, value) in (layout.facts_first_row + 3..).zip(number_facts) {
        set_number(sheet, &cell(layout.count_column, row), value);
    }

    let heading_columns = [
        layout.label_column,
        layout.count_column,
        layout.share_column,
        layout.expected_share_column,
        layout.chart_column,
    ];
    for (column, heading) in heading_columns.into_iter().zip(METRIC_HEADINGS) {
        set_text(sheet, &cell(column, layout.metrics_header_row), heading);
    }

    let counts = [summary.counts.a, summary.counts.r, summary.counts.f];
    let shares = summary.shares();
    let expected_shares = summary.expected_shares();
    for (i, label) in METRIC_LABELS.iter().enumerate() {
        let row = layout.metrics_first_row + i as u32;
        set_text(sheet, &cell(layout.label_column, row), label);
        set_number(sheet, &cell(layout.count_column, row), counts[i]);
        set_percent(sheet, &cell(layout.share_column, row), shares[i]);
        set_percent(sheet, &cell(layout.expected_share_column, row), expected_shares[i]);
        // Chart column mirrors the registered share.
        set_percent(sheet, &cell(layout.chart_column, row), shares[i]);
    }
}

/// Unmerge, clear, relabel and re-merge the banner so no stale merged value
/// survives from the template.
fn rewrite_banner(sheet: &mut Worksheet, banner: &Banner, label: &str) {
    let range = banner.range();
    sheet
        .get_merge_cells_mut()
        .retain(|merged| merged.get_range() != range);
    for address in banner.cells() {
        clear_cell(sheet, &address);
    }
    set_text(sheet, &banner.anchor(), label);
    sheet.add_merge_cells(range);
}

fn write_counts_row(sheet: &mut Worksheet, row: u32, label: &str, counts: MarkCounts) {
    let [label_col, a_col, r_col, f_col, total_col, pct_col] = ROW_COLUMNS;
    set_text(sheet, &cell(label_col, row), label);
    set_number(sheet, &cell(a_col, row), counts.a);
    set_number(sheet, &cell(r_col, row), counts.r);
    set_number(sheet, &cell(f_col, row), counts.f);
    set_number(sheet, &cell(total_col, row), counts.total());
    set_percent(sheet, &cell(pct_col, row), counts.pct_present());
}

/// Blank every existing cell of the block, leaving template styles alone.
fn clear_block(sheet: &mut Worksheet, block: &RowBlock) {
    let last_row = block.last_row.min(sheet.get_highest_row());
    for row in block.first_row..=last_row {
        for column in ROW_COLUMNS {
            clear_cell(sheet, &cell(column, row));
        }
    }
}

fn clear_cell(sheet: &mut Worksheet, address: &str) {
    if sheet.get_cell(address).is_some() {
        sheet.get_cell_mut(address).set_blank();
    }
}

fn cell(column: char, row: u32) -> String {
    format!("{}{}", column, row)
}

fn set_text(sheet: &mut Worksheet, address: &str, value: &str) {
    sheet.get_cell_mut(address).set_value_string(value);
}

fn set_number(sheet: &mut Worksheet, address: &str, value: f64) {
    sheet.get_cell_mut(address).set_value_number(value);
}

fn set_percent(sheet: &mut Worksheet, address: &str, value: f64) {
    set_number(sheet, address, value);
    sheet
        .get_style_mut(address)
        .get_number_format_mut()
        .set_format_code(PERCENT_FORMAT);
}

/// Rewrite `xl/workbook.xml` inside a serialized workbook so spreadsheet
/// applications recalculate every formula when the file is opened.
pub fn force_full_calc(workbook: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut archive =
        ZipArchive::new(Cursor::new(workbook)).context("serialized workbook is not a zip archive")?;
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut patched = false;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read workbook entry #{}", index))?;

        if entry.name() == WORKBOOK_PART {
            let mut xml = String::new();
            entry
                .read_to_string(&mut xml)
                .context("failed to read xl/workbook.xml")?;
            out.start_file(WORKBOOK_PART, opts)
                .context("failed to start xl/workbook.xml")?;
            out.write_all(set_full_calc_on_load(&xml).as_bytes())
                .context("failed to write xl/workbook.xml")?;
            patched = true;
        } else {
            let name = entry.name().to_string();
            out.raw_copy_file(entry)
                .with_context(|| format!("failed to copy workbook entry {}", name))?;
        }
    }

    if !patched {
        return Err(anyhow!("workbook has no {} part", WORKBOOK_PART));
    }

    let buffer = out.finish().context("failed to finalize workbook archive")?;
    Ok(buffer.into_inner())
}

fn set_full_calc_on_load(xml: &str) -> String {
    let Some(start) = xml.find("<calcPr") else {
        return match xml.find("<extLst").or_else(|| xml.rfind("</workbook>")) {
            Some(at) => format!("{}<calcPr {}/>{}", &xml[..at], FULL_CALC_ATTR, &xml[at..]),
            None => xml.to_string(),
        };
    };

    let end = xml[start..].find('>').map_or(xml.len(), |offset| start + offset);
    let tag = &xml[start..end];
    if tag.contains(FULL_CALC_ATTR) {
        return xml.to_string();
    }

    let tag = tag
        .replace(" fullCalcOnLoad=\"0\"", "")
        .replace(" fullCalcOnLoad=\"false\"", "")
        .replacen("<calcPr", &format!("<calcPr {}", FULL_CALC_ATTR), 1);
    format!("{}{}{}", &xml[..start], tag, &xml[end..])
}
