//! Generación de recordatorios (.ics) para las fechas críticas del contrato.
//!
//! Función pura dado el reloj: un único evento de día completo que empieza en
//! `fecha − antelación` y termina al día siguiente (fin exclusivo).
//!
//! Regla de meses: se usa la aritmética de calendario de `chrono`
//! (`checked_sub_months`). Si el día no existe en el mes destino se ajusta al
//! último día válido de ese mes: 31 Jan 2027 − 1 mes = 31 Dec 2026, y
//! 31 May 2025 − 3 meses = 28 Feb 2025. Nunca se restan 30×N días.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CALENDAR_MIME_TYPE: &str = "text/calendar";

const PRODID: &str = "-//Sweetlease//AI Lease Extractor//EN";
const UID_DOMAIN: &str = "sweetlease.app";
const MAX_LINE_OCTETS: usize = 75;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReminderError {
    #[error("'{0}' is not a valid date (expected 'DD Month YYYY', e.g. '01 Jan 2024')")]
    InvalidDate(String),

    #[error("reminder date for '{0}' is out of the supported calendar range")]
    OutOfRange(String),
}

/// Antelación del recordatorio respecto a la fecha crítica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderOffset {
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "2w")]
    TwoWeeks,
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "3m")]
    ThreeMonths,
    #[serde(rename = "6m")]
    SixMonths,
}

impl ReminderOffset {
    /// Fecha del recordatorio; `None` si sale del rango de `chrono`.
    pub fn apply(self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::OneWeek => date.checked_sub_days(Days::new(7)),
            Self::TwoWeeks => date.checked_sub_days(Days::new(14)),
            Self::OneMonth => date.checked_sub_months(Months::new(1)),
            Self::ThreeMonths => date.checked_sub_months(Months::new(3)),
            Self::SixMonths => date.checked_sub_months(Months::new(6)),
        }
    }
}

/// Invitación de calendario lista para descargar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarInvite {
    pub file_name: String,
    pub content: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Interpreta una fecha "DD Month YYYY" (mes completo o abreviado, sin
/// distinguir mayúsculas). También acepta ISO `YYYY-MM-DD` y las variantes
/// habituales en contratos: ordinales ("1st"), "Sept" y comas o puntos finales.
pub fn parse_lease_date(raw: &str) -> Result<NaiveDate, ReminderError> {
    let normalized = raw
        .split_whitespace()
        .map(|token| token.trim_end_matches([',', '.']))
        .enumerate()
        .map(|(idx, token)| match idx {
            0 => strip_ordinal(token),
            1 if token.eq_ignore_ascii_case("sept") => "Sep",
            _ => token,
        })
        .collect::<Vec<_>>()
        .join(" ");
    // %B también acepta la abreviatura del mes al interpretar.
    NaiveDate::parse_from_str(&normalized, "%d %B %Y")
        .or_else(|_| NaiveDate::parse_from_str(&normalized, "%Y-%m-%d"))
        .map_err(|_| ReminderError::InvalidDate(raw.to_string()))
}

/// "1st" -> "1", "22nd" -> "22"; cualquier otra cosa se devuelve igual.
fn strip_ordinal(day: &str) -> &str {
    let lower = day.to_ascii_lowercase();
    for suffix in ["st", "nd", "rd", "th"] {
        if lower.ends_with(suffix) {
            let digits = &day[..day.len() - suffix.len()];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return digits;
            }
        }
    }
    day
}

pub fn build_reminder(
    date: &str,
    description: &str,
    offset: ReminderOffset,
    generated_at: DateTime<Utc>,
) -> Result<CalendarInvite, ReminderError> {
    let critical = parse_lease_date(date)?;
    let start = offset
        .apply(critical)
        .ok_or_else(|| ReminderError::OutOfRange(date.to_string()))?;
    let end = start
        .checked_add_days(Days::new(1))
        .ok_or_else(|| ReminderError::OutOfRange(date.to_string()))?;

    let stamp = generated_at.format("%Y%m%dT%H%M%SZ").to_string();
    let uid = format!("{}@{}", generated_at.format("%Y%m%dT%H%M%S%3fZ"), UID_DOMAIN);
    let summary = format!("Reminder: {}", description);
    let details = format!(
        "This is a reminder for the upcoming critical date: '{}' scheduled for {}. Please ensure necessary actions are taken.",
        description, date
    );

    let lines = [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "CALSCALE:GREGORIAN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}", uid),
        format!("DTSTAMP:{}", stamp),
        format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d")),
        format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d")),
        format!("SUMMARY:{}", escape_text(&summary)),
        format!("DESCRIPTION:{}", escape_text(&details)),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ];

    let mut content = String::new();
    for line in &lines {
        content.push_str(&fold_line(line));
        content.push_str("\r\n");
    }

    Ok(CalendarInvite {
        file_name: reminder_file_name(description),
        content,
        start,
        end,
    })
}

/// `reminder_<descripción en minúsculas con '_'>.ics`
pub fn reminder_file_name(description: &str) -> String {
    let slug = description
        .to_lowercase()
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    if slug.is_empty() {
        "reminder_critical_date.ics".to_string()
    } else {
        format!("reminder_{}.ics", slug)
    }
}

/// Escapado de valores TEXT (RFC 5545 §3.3.11).
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

/// Pliega líneas de más de 75 octetos sin partir caracteres UTF-8.
fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + line.len() / MAX_LINE_OCTETS * 3);
    let mut current = 0;
    // Las líneas de continuación empiezan con un espacio que cuenta en el límite.
    let mut limit = MAX_LINE_OCTETS;
    for c in line.chars() {
        if current + c.len_utf8() > limit {
            out.push_str("\r\n ");
            current = 0;
            limit = MAX_LINE_OCTETS - 1;
        }
        out.push(c);
        current += c.len_utf8();
    }
    out
}
