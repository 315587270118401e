//! Payment card parser.
//!
//! Numbers must pass the Luhn check before a brand is assigned. The brand is
//! the longest matching IIN prefix, so `4026` (Visa Electron) beats `4`
//! (Visa). Only the masked number leaves this module.

use std::collections::HashSet;
use std::sync::LazyLock;

use dumpsift_shared::{Card, CardBrand};
use regex::Regex;

use crate::EntityParser;
use crate::text::{decode, field, non_empty, read_blocks};

const NUMBER_KEYS: &[&str] = &[
    "card number",
    "cc number",
    "number",
    "card",
    "cc",
    "card no",
    "cardnumber",
    "pan",
];
const EXPIRY_KEYS: &[&str] = &["expiration", "expire", "expiry", "exp", "exp date", "valid thru"];
const MONTH_KEYS: &[&str] = &["month", "exp month", "expiration month"];
const YEAR_KEYS: &[&str] = &["year", "exp year", "expiration year"];
const HOLDER_KEYS: &[&str] = &["holder", "card holder", "cardholder", "name", "name on card"];

const MIN_LEN: usize = 13;
const MAX_LEN: usize = 19;

/// IIN ranges as `(low, high, brand)`. Both bounds have the same digit count,
/// which is the prefix length the rule inspects.
const IIN_RANGES: &[(&str, &str, CardBrand)] = &[
    ("4", "4", CardBrand::Visa),
    ("4026", "4026", CardBrand::VisaElectron),
    ("4405", "4405", CardBrand::VisaElectron),
    ("4508", "4508", CardBrand::VisaElectron),
    ("4844", "4844", CardBrand::VisaElectron),
    ("4913", "4913", CardBrand::VisaElectron),
    ("4917", "4917", CardBrand::VisaElectron),
    ("417500", "417500", CardBrand::VisaElectron),
    ("51", "55", CardBrand::Mastercard),
    ("2221", "2720", CardBrand::Mastercard),
    ("34", "34", CardBrand::Amex),
    ("37", "37", CardBrand::Amex),
    ("6011", "6011", CardBrand::Discover),
    ("622126", "622925", CardBrand::Discover),
    ("644", "649", CardBrand::Discover),
    ("65", "65", CardBrand::Discover),
    ("3528", "3589", CardBrand::Jcb),
    ("300", "305", CardBrand::DinersClub),
    ("3095", "3095", CardBrand::DinersClub),
    ("36", "36", CardBrand::DinersClub),
    ("38", "39", CardBrand::DinersClub),
    ("62", "62", CardBrand::UnionPay),
    ("5018", "5018", CardBrand::Maestro),
    ("5020", "5020", CardBrand::Maestro),
    ("5038", "5038", CardBrand::Maestro),
    ("5893", "5893", CardBrand::Maestro),
    ("6304", "6304", CardBrand::Maestro),
    ("6759", "6759", CardBrand::Maestro),
    ("6761", "6763", CardBrand::Maestro),
    ("2200", "2204", CardBrand::Mir),
];

static LOOSE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("valid regex"));

pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Brand by longest matching IIN prefix.
pub fn brand_of(digits: &str) -> CardBrand {
    IIN_RANGES
        .iter()
        .filter(|(low, high, _)| {
            digits
                .get(..low.len())
                .is_some_and(|prefix| *low <= prefix && prefix <= *high)
        })
        .max_by_key(|(low, _, _)| low.len())
        .map_or(CardBrand::Unknown, |(_, _, brand)| *brand)
}

/// `4111111111111111` → `************1111`.
pub fn mask(digits: &str) -> String {
    let keep = digits.len().min(4);
    let hidden = digits.len() - keep;
    format!("{}{}", "*".repeat(hidden), &digits[hidden..])
}

/// Strip separators and validate. Returns the bare digits and brand.
fn validate(raw: &str) -> Option<(String, CardBrand)> {
    let digits: String = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    if !(MIN_LEN..=MAX_LEN).contains(&digits.len()) || !luhn_valid(&digits) {
        return None;
    }
    let brand = brand_of(&digits);
    Some((digits, brand))
}

/// Parses card dumps into masked [`Card`] records.
pub struct CardParser;

impl EntityParser for CardParser {
    type Record = Card;

    fn name(&self) -> &'static str {
        "card"
    }

    fn parse(&self, raw: &[u8]) -> Vec<Card> {
        let text = decode(raw);
        let structured: Vec<Card> = read_blocks(&text)
            .iter()
            .filter_map(|block| from_block(block))
            .collect();
        if !structured.is_empty() {
            return structured;
        }
        scan(&text)
    }
}

fn from_block(block: &[(String, &str)]) -> Option<Card> {
    let (digits, brand) = block
        .iter()
        .filter(|(k, _)| NUMBER_KEYS.contains(&k.as_str()))
        .find_map(|(_, v)| validate(v))?;

    let expiry = field(block, EXPIRY_KEYS).and_then(non_empty).or_else(|| {
        let month = field(block, MONTH_KEYS)?.parse::<u8>().ok()?;
        let year = field(block, YEAR_KEYS)?.parse::<u16>().ok()?;
        let year = if year < 100 { 2000 + year } else { year };
        (1..=12).contains(&month).then(|| format!("{month:02}/{year}"))
    });

    Some(Card {
        masked_number: mask(&digits),
        brand,
        expiry,
        holder: field(block, HOLDER_KEYS).and_then(non_empty),
    })
}

fn scan(text: &str) -> Vec<Card> {
    let mut seen = HashSet::new();
    LOOSE_NUMBER
        .find_iter(text)
        .filter_map(|m| validate(m.as_str()))
        .filter(|(digits, _)| seen.insert(digits.clone()))
        .map(|(digits, brand)| Card {
            masked_number: mask(&digits),
            brand,
            expiry: None,
            holder: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pad `prefix` with zeros to `len - 1` digits and append the Luhn check digit.
    fn with_check_digit(prefix: &str, len: usize) -> String {
        let mut payload = prefix.to_string();
        while payload.len() < len - 1 {
            payload.push('0');
        }
        let sum: u32 = payload
            .bytes()
            .rev()
            .enumerate()
            .map(|(i, b)| {
                let d = u32::from(b - b'0');
                if i % 2 == 0 {
                    let doubled = d * 2;
                    if doubled > 9 { doubled - 9 } else { doubled }
                } else {
                    d
                }
            })
            .sum();
        payload.push(char::from(b'0' + ((10 - sum % 10) % 10) as u8));
        payload
    }

    #[test]
    fn visa_test_number() {
        assert!(luhn_valid("4111111111111111"));
        assert_eq!(brand_of("4111111111111111"), CardBrand::Visa);
        assert!(!luhn_valid("4111111111111112"));
        assert!(validate("4111111111111112").is_none());
    }

    #[test]
    fn well_known_test_numbers() {
        let cases = [
            ("5555555555554444", CardBrand::Mastercard),
            ("378282246310005", CardBrand::Amex),
            ("6011111111111117", CardBrand::Discover),
            ("3530111333300000", CardBrand::Jcb),
            ("30569309025904", CardBrand::DinersClub),
            ("6200000000000005", CardBrand::UnionPay),
        ];
        for (number, brand) in cases {
            assert!(luhn_valid(number), "{number}");
            assert_eq!(brand_of(number), brand, "{number}");
        }
    }

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(brand_of(&with_check_digit("4026", 16)), CardBrand::VisaElectron);
        assert_eq!(brand_of(&with_check_digit("622126", 16)), CardBrand::Discover);
        assert_eq!(brand_of(&with_check_digit("6221", 16)), CardBrand::UnionPay);
        assert_eq!(brand_of(&with_check_digit("2221", 16)), CardBrand::Mastercard);
        assert_eq!(brand_of(&with_check_digit("2201", 16)), CardBrand::Mir);
        assert_eq!(brand_of(&with_check_digit("6759", 16)), CardBrand::Maestro);
        assert_eq!(brand_of(&with_check_digit("9", 16)), CardBrand::Unknown);
    }

    #[test]
    fn check_digit_helper_agrees_with_luhn() {
        for prefix in ["4", "51", "3528", "9"] {
            assert!(luhn_valid(&with_check_digit(prefix, 16)));
        }
    }

    #[test]
    fn masks_all_but_last_four() {
        assert_eq!(mask("4111111111111111"), "************1111");
        assert_eq!(mask("378282246310005").len(), 15);
    }

    #[test]
    fn structured_block_with_month_and_year() {
        let text = "\
Card Number: 4111 1111 1111 1111
Holder: JOHN DOE
Month: 7
Year: 27
===
CC: 4111111111111112
Expiration: 01/2026
";
        let cards = CardParser.parse(text.as_bytes());
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].masked_number, "************1111");
        assert_eq!(cards[0].brand, CardBrand::Visa);
        assert_eq!(cards[0].expiry.as_deref(), Some("07/2027"));
        assert_eq!(cards[0].holder.as_deref(), Some("JOHN DOE"));
    }

    #[test]
    fn unknown_brand_is_kept() {
        let number = with_check_digit("9", 16);
        let cards = CardParser.parse(format!("Number: {number}\n").as_bytes());
        assert_eq!(cards[0].brand, CardBrand::Unknown);
    }

    #[test]
    fn loose_scan_fallback() {
        let text = "order 5555-5555-5555-4444 paid; ref 1234567890123; again 5555555555554444";
        let cards = CardParser.parse(text.as_bytes());
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].brand, CardBrand::Mastercard);
        assert_eq!(cards[0].expiry, None);
    }

    #[test]
    fn loose_scan_keeps_cards_sharing_last_four() {
        let text = "4000 0000 0006 1111 and 4000000000141111, again 4000-0000-0006-1111";
        let cards = CardParser.parse(text.as_bytes());
        assert_eq!(cards.len(), 2);
        assert!(cards.iter().all(|c| c.masked_number == "************1111"));
        assert!(cards.iter().all(|c| c.brand == CardBrand::Visa));
    }
}
