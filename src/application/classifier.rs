//! Keyword-scoring document classifier.
//!
//! Each candidate type gets one point per keyword found in the lower-cased
//! text, plus two points when its prefix is directly followed by a number
//! (`inv# 1042`, `p.o. 77`). The best score wins; an all-zero board is
//! `Unknown`.

use crate::domain::document::DocumentType;
use once_cell::sync::Lazy;
use regex::Regex;

const INVOICE_KEYWORDS: &[&str] = &[
    "invoice",
    "inv#",
    "invoice number",
    "invoice no",
    "bill to",
    "invoice date",
    "due date",
    "amount due",
    "total due",
];

const RECEIPT_KEYWORDS: &[&str] = &[
    "receipt",
    "thank you",
    "payment received",
    "transaction",
    "card ending",
    "change",
    "cash",
    "subtotal",
    "tax",
];

const PURCHASE_ORDER_KEYWORDS: &[&str] = &[
    "purchase order",
    "po number",
    "po#",
    "p.o.",
    "order number",
    "delivery date",
    "ship to",
    "billing address",
];

const BILL_KEYWORDS: &[&str] = &[
    "bill",
    "statement",
    "account number",
    "previous balance",
    "current charges",
    "amount owed",
];

const NUMBER_BONUS: usize = 2;

static INVOICE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"inv[#\s]*[\d-]+").unwrap());
static PO_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"po[#\s]*[\d-]+|p\.o\.\s*[\d-]+").unwrap());
static RECEIPT_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"receipt[#\s]*[\d-]+").unwrap());
static BILL_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"bill[#\s]*[\d-]+").unwrap());

fn keyword_score(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn score(text: &str, keywords: &[&str], number: &Regex) -> usize {
    let bonus = if number.is_match(text) { NUMBER_BONUS } else { 0 };
    keyword_score(text, keywords) + bonus
}

/// Scores for every candidate, in tie-break order.
pub fn scores(text: &str) -> [(DocumentType, usize); 4] {
    let lower = text.to_lowercase();
    [
        (
            DocumentType::Invoice,
            score(&lower, INVOICE_KEYWORDS, &INVOICE_NUMBER),
        ),
        (
            DocumentType::Receipt,
            score(&lower, RECEIPT_KEYWORDS, &RECEIPT_NUMBER),
        ),
        (
            DocumentType::PurchaseOrder,
            score(&lower, PURCHASE_ORDER_KEYWORDS, &PO_NUMBER),
        ),
        (DocumentType::Bill, score(&lower, BILL_KEYWORDS, &BILL_NUMBER)),
    ]
}

pub fn classify(text: &str) -> DocumentType {
    let mut best = (DocumentType::Unknown, 0);
    for (kind, points) in scores(text) {
        // strictly greater keeps the earlier type on ties
        if points > best.1 {
            best = (kind, points);
        }
    }
    best.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_invoice() {
        let text = "ACME ELECTRICAL LTD\nTAX INVOICE\nInvoice Number: INV-1042\nDue Date: 30/06/2024\nAmount Due $1,250.00";
        assert_eq!(classify(text), DocumentType::Invoice);
    }

    #[test]
    fn test_classify_receipt() {
        let text = "CORNER HARDWARE\nReceipt #5531\nSubtotal 18.00\nCash 20.00\nChange 2.00\nThank you!";
        assert_eq!(classify(text), DocumentType::Receipt);
    }

    #[test]
    fn test_classify_purchase_order() {
        let text = "PURCHASE ORDER\nPO# 7781\nShip To: Site 4\nDelivery Date: 01/07/2024";
        assert_eq!(classify(text), DocumentType::PurchaseOrder);
    }

    #[test]
    fn test_classify_utility_bill() {
        let text = "Monthly Statement\nAccount Number 8812-11\nPrevious Balance 80.00\nCurrent Charges 95.10\nAmount Owed 95.10";
        assert_eq!(classify(text), DocumentType::Bill);
    }

    #[test]
    fn test_classify_unknown_when_nothing_matches() {
        assert_eq!(classify("hello world"), DocumentType::Unknown);
        assert_eq!(classify(""), DocumentType::Unknown);
    }

    #[test]
    fn test_tie_prefers_invoice() {
        // "invoice" scores invoice once, "tax" scores receipt once
        let board = scores("invoice tax");
        assert_eq!(board[0], (DocumentType::Invoice, 1));
        assert_eq!(board[1], (DocumentType::Receipt, 1));
        assert_eq!(classify("invoice tax"), DocumentType::Invoice);
    }

    #[test]
    fn test_number_bonus() {
        let board = scores("receipt 123");
        assert_eq!(board[1], (DocumentType::Receipt, 1 + NUMBER_BONUS));
    }
}
