use crate::domain::money;
use crate::domain::ports::CurrencyFormatter;
use rust_decimal::Decimal;

/// Rounds and formats by ISO 4217 minor units.
#[derive(Debug, Default, Clone, Copy)]
pub struct IsoCurrencyFormatter;

impl CurrencyFormatter for IsoCurrencyFormatter {
    fn cast(&self, amount: Decimal, currency: &str) -> Decimal {
        money::cast(amount, currency)
    }

    fn format(&self, amount: Decimal, currency: &str) -> String {
        money::format(amount, currency)
    }
}
