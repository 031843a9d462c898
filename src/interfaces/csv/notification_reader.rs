use crate::domain::gateway::CallbackParams;
use crate::error::{PaymentError, Result};
use std::io::Read;

/// Column naming the gateway a row was posted to.
pub const GATEWAY_COLUMN: &str = "gateway";

/// One recorded webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// `None` when the row leaves the gateway column empty.
    pub gateway: Option<String>,
    /// Posted fields, minus empty values.
    pub fields: CallbackParams,
}

/// Reads recorded webhook deliveries from a CSV source.
///
/// The header row names the posted fields. Whitespace is trimmed and short rows are
/// accepted.
pub struct NotificationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> NotificationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one notification per data row.
    pub fn notifications(mut self) -> Result<impl Iterator<Item = Result<Notification>>> {
        let headers = self.reader.headers()?.clone();
        Ok(self.reader.into_records().map(move |record| {
            let record = record.map_err(PaymentError::from)?;
            let mut gateway = None;
            let mut fields = CallbackParams::new();
            for (name, value) in headers.iter().zip(record.iter()) {
                if value.is_empty() {
                    continue;
                }
                if name.eq_ignore_ascii_case(GATEWAY_COLUMN) {
                    gateway = Some(value.to_string());
                } else {
                    fields.insert(name.to_string(), value.to_string());
                }
            }
            Ok(Notification { gateway, fields })
        }))
    }
}
