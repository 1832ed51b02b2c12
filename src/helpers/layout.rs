//! Cell-address maps for the workbook templates.
//!
//! Each template variant is described entirely by a [`TemplateLayout`]; the
//! population code in [`crate::helpers::xlsx`] never hard-codes an address.
//! Supporting a new template version means adding a layout here.

use std::fmt;

use crate::models::attendance::AttendanceRequest;

pub const DAILY_SHEET: &str = "Mensual Grupal";
pub const SUMMARY_SHEET: &str = "Resumen del Mes";
pub const PER_STUDENT_SHEET: &str = "Por Alumno";

/// Columns of a daily / per-student row: label, A, R, F, total, % present.
pub const ROW_COLUMNS: [char; 6] = ['A', 'B', 'C', 'D', 'E', 'F'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVariant {
    V1,
    V2,
}

impl TemplateVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateVariant::V1 => "v1",
            TemplateVariant::V2 => "v2",
        }
    }

    /// File name of the template asset inside the template directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            TemplateVariant::V1 => "asistencia_template.xlsx",
            TemplateVariant::V2 => "asistencia_template_v2.xlsx",
        }
    }

    pub fn layout(&self) -> &'static TemplateLayout {
        match self {
            TemplateVariant::V1 => &V1_LAYOUT,
            TemplateVariant::V2 => &V2_LAYOUT,
        }
    }

    pub fn liveness_message(&self) -> &'static str {
        match self {
            TemplateVariant::V1 => "export-excel ok",
            TemplateVariant::V2 => "export-excel-v2 ok",
        }
    }

    /// Extra `Cache-Control` value sent with the workbook, if any.
    pub fn cache_control(&self) -> Option<&'static str> {
        match self {
            TemplateVariant::V1 => None,
            TemplateVariant::V2 => Some("no-store"),
        }
    }

    /// Suggested download name, safe to embed in a quoted header parameter.
    pub fn download_name(&self, request: &AttendanceRequest) -> String {
        let suffix = match self {
            TemplateVariant::V1 => "",
            TemplateVariant::V2 => "_v2",
        };
        let name = format!(
            "Asistencia_{}_{}_{}{}.xlsx",
            request.school_id, request.group_id, request.year_month, suffix
        );
        name.chars()
            .map(|c| match c {
                '"' | '\\' => '_',
                c if c.is_ascii_graphic() || c == ' ' => c,
                _ => '_',
            })
            .collect()
    }
}

impl fmt::Display for TemplateVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block of one-row-per-record data on a named sheet, columns A..F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBlock {
    pub sheet: &'static str,
    pub first_row: u32,
    /// Last row cleared before writing.
    pub last_row: u32,
}

/// Merged title range on a single row, rewritten on every export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Banner {
    pub row: u32,
    pub first_column: char,
    pub last_column: char,
    /// Label prefix; the month is appended.
    pub label: &'static str,
}

impl Banner {
    pub fn range(&self) -> String {
        format!(
            "{}{}:{}{}",
            self.first_column, self.row, self.last_column, self.row
        )
    }

    pub fn anchor(&self) -> String {
        format!("{}{}", self.first_column, self.row)
    }

    pub fn cells(&self) -> impl Iterator<Item = String> + '_ {
        (self.first_column..=self.last_column).map(move |col| format!("{}{}", col, self.row))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryLayout {
    pub sheet: &'static str,
    pub banner: Option<Banner>,
    /// First of six label/value rows: month, school, group, students, days,
    /// expected marks.
    pub facts_first_row: u32,
    pub metrics_header_row: u32,
    /// First of three rows: A, R, F.
    pub metrics_first_row: u32,
    pub label_column: char,
    pub count_column: char,
    pub share_column: char,
    pub expected_share_column: char,
    /// Mirror of `share_column` read by the template's chart.
    pub chart_column: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateLayout {
    pub daily: RowBlock,
    pub summary: SummaryLayout,
    pub per_student: RowBlock,
}

pub static V1_LAYOUT: TemplateLayout = TemplateLayout {
    daily: RowBlock {
        sheet: DAILY_SHEET,
        first_row: 3,
        last_row: 10_000,
    },
    summary: SummaryLayout {
        sheet: SUMMARY_SHEET,
        banner: None,
        facts_first_row: 2,
        metrics_header_row: 8,
        metrics_first_row: 9,
        label_column: 'A',
        count_column: 'B',
        share_column: 'C',
        expected_share_column: 'D',
        chart_column: 'F',
    },
    per_student: RowBlock {
        sheet: PER_STUDENT_SHEET,
        first_row: 3,
        last_row: 20_000,
    },
};

pub static V2_LAYOUT: TemplateLayout = TemplateLayout {
    daily: RowBlock {
        sheet: DAILY_SHEET,
        first_row: 4,
        last_row: 10_000,
    },
    summary: SummaryLayout {
        sheet: SUMMARY_SHEET,
        banner: Some(Banner {
            row: 1,
            first_column: 'A',
            last_column: 'F',
            label: "Resumen de asistencia",
        }),
        facts_first_row: 3,
        metrics_header_row: 10,
        metrics_first_row: 11,
        label_column: 'A',
        count_column: 'B',
        share_column: 'C',
        expected_share_column: 'D',
        chart_column: 'H',
    },
    per_student: RowBlock {
        sheet: PER_STUDENT_SHEET,
        first_row: 4,
        last_row: 20_000,
    },
};
