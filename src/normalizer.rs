//! Turns a located raw string into a [`PriceValue`].
//!
//! The decimal separator is the rightmost `.` or `,` followed by one or two
//! digits; every other separator in the numeric run is grouping.

use regex::{Match, Regex};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::models::PriceValue;

/// Symbols recognised without configuration, with the currency they imply.
/// `$`, `¥` and `kr` are shared by several currencies and stay unresolved.
const BUILTIN_SYMBOLS: &[(&str, Option<&str>)] = &[
    ("US$", Some("USD")),
    ("USD", Some("USD")),
    ("A$", Some("AUD")),
    ("AU$", Some("AUD")),
    ("AUD", Some("AUD")),
    ("C$", Some("CAD")),
    ("CA$", Some("CAD")),
    ("CAD", Some("CAD")),
    ("NZ$", Some("NZD")),
    ("HK$", Some("HKD")),
    ("R$", Some("BRL")),
    ("EUR", Some("EUR")),
    ("GBP", Some("GBP")),
    ("JPY", Some("JPY")),
    ("CHF", Some("CHF")),
    ("zł", Some("PLN")),
    ("€", Some("EUR")),
    ("£", Some("GBP")),
    ("₹", Some("INR")),
    ("₩", Some("KRW")),
    ("₽", Some("RUB")),
    ("₺", Some("TRY")),
    ("₪", Some("ILS")),
    ("¥", None),
    ("kr", None),
    ("$", None),
];

/// Locale and TLD hints used when the price carries no explicit symbol.
const LANG_CURRENCIES: &[(&str, &str)] = &[
    ("en-au", "AUD"),
    ("en-us", "USD"),
    ("en-gb", "GBP"),
    ("en-ca", "CAD"),
    ("en-nz", "NZD"),
    ("en-in", "INR"),
    ("fr-fr", "EUR"),
    ("de-de", "EUR"),
    ("es-es", "EUR"),
    ("it-it", "EUR"),
    ("nl-nl", "EUR"),
    ("ja-jp", "JPY"),
    ("ja", "JPY"),
    ("ko-kr", "KRW"),
    ("zh-cn", "CNY"),
    ("pl-pl", "PLN"),
    ("pl", "PLN"),
    ("de-ch", "CHF"),
];

const TLD_CURRENCIES: &[(&str, &str)] = &[
    (".com.au", "AUD"),
    (".co.uk", "GBP"),
    (".co.nz", "NZD"),
    (".co.jp", "JPY"),
    (".au", "AUD"),
    (".uk", "GBP"),
    (".ca", "CAD"),
    (".de", "EUR"),
    (".fr", "EUR"),
    (".es", "EUR"),
    (".it", "EUR"),
    (".nl", "EUR"),
    (".jp", "JPY"),
    (".kr", "KRW"),
    (".in", "INR"),
    (".pl", "PLN"),
    (".ch", "CHF"),
];

/// Page-level hints for currency resolution.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub url: String,
    pub lang: Option<String>,
}

pub struct PriceNormalizer {
    number_run: Regex,
    symbol_codes: HashMap<String, Option<String>>,
    default_currency: Option<String>,
}

impl Default for PriceNormalizer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PriceNormalizer {
    pub fn new(default_currency: Option<String>) -> Self {
        let symbol_codes = BUILTIN_SYMBOLS
            .iter()
            .map(|(symbol, code)| (symbol.to_string(), code.map(str::to_string)))
            .collect();

        Self {
            // Digits joined by separators; a space only groups when exactly
            // three digits follow it.
            number_run: Regex::new(r"\d+(?:[.,'’]\d+|[ \u{a0}\u{202f}]\d{3}\b)*")
                .expect("number run pattern is valid"),
            symbol_codes,
            default_currency,
        }
    }

    /// Never fails: input without a usable number yields `valid == false`
    /// with `original` preserved.
    pub fn normalize(&self, raw: &str, known_symbols: &HashSet<String>) -> PriceValue {
        let runs: Vec<Match<'_>> = self.number_run.find_iter(raw).collect();
        if runs.is_empty() {
            return PriceValue::invalid(raw);
        }

        let symbols = self.symbol_table(known_symbols);

        // Prefer the first run that has a symbol right next to it
        let (run, adjacent) = runs
            .iter()
            .find_map(|run| adjacent_symbol(raw, run, &symbols).map(|symbol| (*run, Some(symbol))))
            .unwrap_or((runs[0], None));

        let symbol = adjacent.or_else(|| first_symbol(raw, &symbols));
        let negative = is_negated(raw, &run, symbol.as_deref());

        let cleaned: String = run
            .as_str()
            .chars()
            .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '\'' | '’'))
            .collect();

        let Some(canonical) = canonicalize(&cleaned) else {
            return PriceValue {
                raw: cleaned,
                ..PriceValue::invalid(raw)
            };
        };

        let currency_code = symbol
            .as_ref()
            .and_then(|s| self.symbol_codes.get(s).cloned().flatten());

        match Decimal::from_str(&canonical) {
            Ok(decimal) if !negative => PriceValue {
                original: raw.to_string(),
                raw: cleaned,
                currency_symbol: symbol,
                currency_code,
                decimal,
                valid: true,
            },
            Ok(decimal) => PriceValue {
                original: raw.to_string(),
                raw: cleaned,
                currency_symbol: symbol,
                currency_code,
                decimal: -decimal,
                valid: false,
            },
            Err(_) => PriceValue {
                raw: cleaned,
                currency_symbol: symbol,
                ..PriceValue::invalid(raw)
            },
        }
    }

    /// Fill `currency_code` from the page when the symbol did not settle it.
    pub fn resolve_currency(&self, price: &mut PriceValue, context: &PageContext) {
        if price.currency_code.is_some() {
            return;
        }
        price.currency_code = self
            .infer_from_lang(context.lang.as_deref())
            .or_else(|| self.infer_from_url(&context.url))
            .or_else(|| self.default_currency.clone());
    }

    fn infer_from_lang(&self, lang: Option<&str>) -> Option<String> {
        let lang = lang?.to_lowercase();
        LANG_CURRENCIES
            .iter()
            .find(|(tag, _)| *tag == lang)
            .map(|(_, code)| code.to_string())
    }

    fn infer_from_url(&self, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        TLD_CURRENCIES
            .iter()
            .find(|(suffix, _)| host.ends_with(suffix))
            .map(|(_, code)| code.to_string())
    }

    /// Known plus built-in symbols, longest first so `US$` beats `$`.
    fn symbol_table(&self, known: &HashSet<String>) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .symbol_codes
            .keys()
            .cloned()
            .chain(known.iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        symbols.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then_with(|| a.cmp(b)));
        symbols
    }
}

/// Replace grouping and decimal separators with a plain `digits[.digits]`
/// form. `None` when nothing numeric remains.
fn canonicalize(cleaned: &str) -> Option<String> {
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let decimal_at = cleaned.rfind(['.', ',']).filter(|&pos| {
        let tail = &cleaned[pos + 1..];
        (1..=2).contains(&tail.len()) && tail.chars().all(|c| c.is_ascii_digit())
    });

    let mut canonical = String::with_capacity(cleaned.len());
    for (pos, ch) in cleaned.char_indices() {
        if ch.is_ascii_digit() {
            canonical.push(ch);
        } else if Some(pos) == decimal_at {
            canonical.push('.');
        }
    }
    Some(canonical)
}

fn is_symbol_char_alpha(symbol: &str) -> bool {
    symbol.chars().any(|c| c.is_alphabetic())
}

/// Alphabetic symbols must not be glued to other letters ("kr" in "drinkr").
fn bounded(text: &str, start: usize, end: usize, symbol: &str) -> bool {
    if !is_symbol_char_alpha(symbol) {
        return true;
    }
    let before_ok = text[..start].chars().next_back().is_none_or(|c| !c.is_alphabetic());
    let after_ok = text[end..].chars().next().is_none_or(|c| !c.is_alphabetic());
    before_ok && after_ok
}

fn adjacent_symbol(text: &str, run: &Match<'_>, symbols: &[String]) -> Option<String> {
    let before = text[..run.start()].trim_end_matches(char::is_whitespace);
    let before = before.strip_suffix(['-', '−']).unwrap_or(before).trim_end();
    let after = text[run.end()..].trim_start();

    symbols
        .iter()
        .find(|symbol| {
            (before.ends_with(symbol.as_str()) && bounded(text, before.len() - symbol.len(), before.len(), symbol))
                || (after.starts_with(symbol.as_str()) && {
                    let start = text.len() - after.len();
                    bounded(text, start, start + symbol.len(), symbol)
                })
        })
        .cloned()
}

fn first_symbol(text: &str, symbols: &[String]) -> Option<String> {
    symbols
        .iter()
        .filter_map(|symbol| {
            text.match_indices(symbol.as_str())
                .find(|(start, _)| bounded(text, *start, start + symbol.len(), symbol))
                .map(|(start, _)| (start, symbol))
        })
        // Leftmost wins; the table is longest-first so ties keep the longer symbol
        .min_by_key(|(start, _)| *start)
        .map(|(_, symbol)| symbol.clone())
}

/// A minus sign that starts the price token: nothing but the symbol may
/// stand before it, and only the symbol may sit between it and the run.
/// A hyphen used as a separator ("Sale - $14.99") is not a sign.
fn is_negated(text: &str, run: &Match<'_>, symbol: Option<&str>) -> bool {
    let mut before = text[..run.start()].trim_end();
    if let Some(symbol) = symbol {
        before = before.strip_suffix(symbol).unwrap_or(before).trim_end();
    }

    let Some(rest) = before.strip_suffix('-').or_else(|| before.strip_suffix('−')) else {
        return false;
    };
    let rest = rest.trim();
    rest.is_empty() || symbol.is_some_and(|symbol| rest.ends_with(symbol))
}
