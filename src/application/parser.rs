//! Turns recognised document text into [`ExtractedData`].
//!
//! Every extractor is a first-match scan over an ordered list of patterns.
//! OCR text is noisy, so each candidate is validated (real calendar date,
//! positive amount, number containing a digit) before it is accepted.

use crate::domain::document::{Amount, ExtractedData, LineItem};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

const VENDOR_SCAN_LINES: usize = 10;
const COMPANY_INDICATORS: &[&str] = &["inc", "ltd", "llc", "corp", "company"];

static DOCUMENT_NUMBER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    const LABEL: &str = r"(?:\s*(?:number|num|no\.?))?[#\s]*:?\s*";
    const VALUE: &str = r"([A-Z0-9-]*\d[A-Z0-9-]*)";
    [
        r"invoice",
        r"inv",
        r"purchase\s+order",
        r"po",
        r"bill",
        r"receipt",
        r"number",
    ]
    .iter()
    .map(|prefix| Regex::new(&format!(r"(?i)\b{prefix}{LABEL}{VALUE}")).unwrap())
    .collect()
});

static NUMERIC_DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)date[:\s]*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})\b",
        r"\b(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})\b",
        r"\b(\d{4}[/-]\d{1,2}[/-]\d{1,2})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static NAMED_MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?\s+(\d{2,4})\b")
        .unwrap()
});

static CURRENCY_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$?([\d,]+\.\d{2})").unwrap());

static TOTAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\btotal[:\s]*\$?([\d,]+\.?\d*)",
        r"(?i)grand\s+total[:\s]*\$?([\d,]+\.?\d*)",
        r"(?i)amount\s+due[:\s]*\$?([\d,]+\.?\d*)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static TAX_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\btax[:\s]*\$?([\d,]+\.?\d*)",
        r"(?i)\bgst[:\s]*\$?([\d,]+\.?\d*)",
        r"(?i)\bvat[:\s]*\$?([\d,]+\.?\d*)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SYMBOLS_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s$.,:]+$").unwrap());

static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d+[ \t]+[A-Za-z \t]+?\b(?:Street|St|Avenue|Ave|Road|Rd|Drive|Dr|Lane|Ln|Boulevard|Blvd)\b\.?(?:[ \t,]+[A-Za-z \t,]*)?(?:\d{4,5})?)",
    )
    .unwrap()
});

static LINE_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*([A-Za-z][A-Za-z0-9 .,&/()'-]*?)\s+(\d+(?:\.\d+)?)\s*(?:x|@)?\s+\$?([\d,]+\.\d{2})\s+\$?([\d,]+\.\d{2})\s*$",
    )
    .unwrap()
});

/// Extracts every structured field the parser knows about.
pub fn parse(text: &str) -> ExtractedData {
    ExtractedData {
        document_number: extract_document_number(text),
        date: extract_date(text),
        amount: extract_amount(text),
        total_amount: extract_total_amount(text),
        tax_amount: extract_tax_amount(text),
        vendor_name: extract_vendor_name(text),
        vendor_address: extract_address(text),
        line_items: extract_line_items(text),
    }
}

pub fn extract_document_number(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    DOCUMENT_NUMBER_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(&upper)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    })
}

pub fn extract_date(text: &str) -> Option<String> {
    let numeric = NUMERIC_DATE_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .find_map(|caps| parse_numeric_date(&caps[1]))
    });

    numeric
        .or_else(|| {
            NAMED_MONTH_DATE.captures_iter(text).find_map(|caps| {
                let day = caps[1].parse().ok()?;
                let month = month_number(&caps[2])?;
                let year = expand_year(&caps[3])?;
                NaiveDate::from_ymd_opt(year, month, day)
            })
        })
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Reads `a/b/c` as year-first when the first part has four digits, otherwise
/// month-first, falling back to day-first.
fn parse_numeric_date(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.split(['/', '-']).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };

    if a.len() == 4 {
        return NaiveDate::from_ymd_opt(a.parse().ok()?, b.parse().ok()?, c.parse().ok()?);
    }

    let year = expand_year(c)?;
    let (first, second): (u32, u32) = (a.parse().ok()?, b.parse().ok()?);
    NaiveDate::from_ymd_opt(year, first, second)
        .or_else(|| NaiveDate::from_ymd_opt(year, second, first))
}

fn expand_year(raw: &str) -> Option<i32> {
    let year: i32 = raw.parse().ok()?;
    match raw.len() {
        2 if year < 70 => Some(2000 + year),
        2 => Some(1900 + year),
        4 => Some(year),
        _ => None,
    }
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// All positive currency figures, largest first, without duplicates.
pub fn extract_all_amounts(text: &str) -> Vec<Decimal> {
    let amounts: BTreeSet<Amount> = CURRENCY_AMOUNT
        .captures_iter(text)
        .filter_map(|caps| Amount::parse(&caps[1]).ok())
        .collect();
    amounts.into_iter().rev().map(Decimal::from).collect()
}

/// The largest figure on the page, which is usually the total.
pub fn extract_amount(text: &str) -> Option<Decimal> {
    extract_all_amounts(text).into_iter().next()
}

pub fn extract_total_amount(text: &str) -> Option<Decimal> {
    first_labelled_amount(text, &TOTAL_PATTERNS).or_else(|| extract_amount(text))
}

pub fn extract_tax_amount(text: &str) -> Option<Decimal> {
    first_labelled_amount(text, &TAX_PATTERNS)
}

fn first_labelled_amount(text: &str, patterns: &[Regex]) -> Option<Decimal> {
    patterns.iter().find_map(|pattern| {
        pattern
            .captures_iter(text)
            .find_map(|caps| Amount::parse(&caps[1]).ok())
            .map(Decimal::from)
    })
}

pub fn extract_vendor_name(text: &str) -> Option<String> {
    text.lines()
        .take(VENDOR_SCAN_LINES)
        .map(str::trim)
        .filter(|line| {
            let len = line.chars().count();
            len > 3 && len < 100 && !SYMBOLS_ONLY.is_match(line)
        })
        .find(|line| {
            let lower = line.to_lowercase();
            let len = line.chars().count();
            COMPANY_INDICATORS.iter().any(|i| lower.contains(i))
                || (is_upper(line) && (5..=50).contains(&len))
        })
        .map(str::to_string)
}

fn is_upper(line: &str) -> bool {
    line.chars().any(char::is_alphabetic) && !line.chars().any(char::is_lowercase)
}

pub fn extract_address(text: &str) -> Option<String> {
    ADDRESS
        .captures(text)
        .map(|caps| caps[1].trim().trim_end_matches(',').trim().to_string())
}

/// Lines shaped `<description> <qty> <unit price> <amount>` whose arithmetic
/// checks out to the cent.
pub fn extract_line_items(text: &str) -> Vec<LineItem> {
    let tolerance = Decimal::new(1, 2);
    text.lines()
        .filter_map(|line| {
            let caps = LINE_ITEM.captures(line)?;
            let quantity: Decimal = caps[2].parse().ok()?;
            let unit_price = Amount::parse(&caps[3]).ok()?.value();
            let amount = Amount::parse(&caps[4]).ok()?.value();
            if quantity <= Decimal::ZERO || (quantity * unit_price - amount).abs() > tolerance {
                return None;
            }
            Some(LineItem {
                description: caps[1].trim().to_string(),
                quantity,
                unit_price,
                amount,
            })
        })
        .collect()
}
