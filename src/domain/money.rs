use rust_decimal::{Decimal, RoundingStrategy};

/// Number of minor-unit digits for an ISO 4217 currency code.
///
/// Unknown codes fall back to two digits.
pub fn precision(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Rounds `amount` to the currency's minor unit, half away from zero.
pub fn cast(amount: Decimal, currency: &str) -> Decimal {
    amount.round_dp_with_strategy(precision(currency), RoundingStrategy::MidpointAwayFromZero)
}

/// Display symbol for the common codes; `None` means the code is printed as a suffix.
pub fn symbol(currency: &str) -> Option<&'static str> {
    match currency.to_ascii_uppercase().as_str() {
        "USD" | "CAD" | "AUD" | "NZD" | "SGD" | "HKD" | "MXN" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        "JPY" | "CNY" => Some("¥"),
        "INR" => Some("₹"),
        "BRL" => Some("R$"),
        "KRW" => Some("₩"),
        _ => None,
    }
}

/// Formats `amount` for display with thousands separators, e.g. `$1,234.50`.
pub fn format(amount: Decimal, currency: &str) -> String {
    let digits = precision(currency);
    let rounded = cast(amount, currency);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let plain = format!("{:.*}", digits as usize, rounded.abs());

    let (whole, fraction) = match plain.split_once('.') {
        Some((whole, fraction)) => (whole.to_string(), Some(fraction.to_string())),
        None => (plain, None),
    };

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(&fraction);
    }

    let sign = if negative { "-" } else { "" };
    match symbol(currency) {
        Some(symbol) => format!("{sign}{symbol}{grouped}"),
        None => format!("{sign}{grouped} {}", currency.to_ascii_uppercase()),
    }
}
