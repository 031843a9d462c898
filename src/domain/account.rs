use super::transaction::PaymentType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Card network, derived from the leading digits of the card number.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Amex,
    Visa,
    Mc,
    Disc,
    Jcb,
    Dc,
    Maes,
    Other,
}

impl CardType {
    /// Classifies a card number by its issuer identification prefix.
    ///
    /// Spaces and dashes are ignored.
    pub fn classify(number: &str) -> Self {
        let digits: String = number.chars().filter(char::is_ascii_digit).collect();
        let prefix = |len: usize| -> u32 {
            digits
                .get(..len.min(digits.len()))
                .and_then(|p| p.parse().ok())
                .unwrap_or(0)
        };

        let two = prefix(2);
        let three = prefix(3);
        let four = prefix(4);
        let six = prefix(6);

        if digits.len() < 12 {
            CardType::Other
        } else if two == 34 || two == 37 {
            CardType::Amex
        } else if (300..=305).contains(&three) || two == 36 || two == 38 || two == 39 {
            CardType::Dc
        } else if four == 6011
            || two == 65
            || (644..=649).contains(&three)
            || (622126..=622925).contains(&six)
        {
            CardType::Disc
        } else if (3528..=3589).contains(&four) {
            CardType::Jcb
        } else if (51..=55).contains(&two) || (2221..=2720).contains(&four) {
            CardType::Mc
        } else if digits.starts_with('4') {
            CardType::Visa
        } else if [50, 56, 57, 58, 63, 67].contains(&two) {
            CardType::Maes
        } else {
            CardType::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Amex => "amex",
            CardType::Visa => "visa",
            CardType::Mc => "mc",
            CardType::Disc => "disc",
            CardType::Jcb => "jcb",
            CardType::Dc => "dc",
            CardType::Maes => "maes",
            CardType::Other => "other",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum BankAccountType {
    Checking,
    Savings,
}

impl BankAccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankAccountType::Checking => "checking",
            BankAccountType::Savings => "savings",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct AccountHolder {
    pub first_name: String,
    pub last_name: String,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CardDetails {
    pub holder: AccountHolder,
    pub number: String,
    /// `YYYYMM`
    pub expiration: String,
    pub security_code: Option<String>,
    pub card_type: CardType,
}

impl CardDetails {
    /// Builds card details, classifying the network from the number.
    pub fn new(holder: AccountHolder, number: impl Into<String>, expiration: impl Into<String>) -> Self {
        let number = number.into();
        let card_type = CardType::classify(&number);
        Self {
            holder,
            number,
            expiration: expiration.into(),
            security_code: None,
            card_type,
        }
    }

    pub fn last4(&self) -> String {
        last4(&self.number)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct BankDetails {
    pub holder: AccountHolder,
    pub account_number: String,
    pub routing_number: String,
    pub account_type: BankAccountType,
}

impl BankDetails {
    pub fn last4(&self) -> String {
        last4(&self.account_number)
    }
}

/// Raw payment data supplied with a request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccountInfo {
    Card(CardDetails),
    Bank(BankDetails),
}

impl AccountInfo {
    pub fn payment_type(&self) -> PaymentType {
        match self {
            AccountInfo::Card(_) => PaymentType::Cc,
            AccountInfo::Bank(_) => PaymentType::Ach,
        }
    }

    pub fn last4(&self) -> String {
        match self {
            AccountInfo::Card(card) => card.last4(),
            AccountInfo::Bank(bank) => bank.last4(),
        }
    }

    /// Card network or bank account type, for receipts.
    pub fn account_type(&self) -> &'static str {
        match self {
            AccountInfo::Card(card) => card.card_type.as_str(),
            AccountInfo::Bank(bank) => bank.account_type.as_str(),
        }
    }
}

/// A payment account saved for a client.
///
/// `gateway_id` is set when the account data lives on the processor's side; the
/// reference ids are then the tokens to charge it with. `details` holds decrypted data
/// for accounts stored locally.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct StoredPaymentAccount {
    pub id: u32,
    pub client_id: u32,
    pub contact_id: u32,
    pub gateway_id: Option<u32>,
    pub reference_id: Option<String>,
    pub client_reference_id: Option<String>,
    pub last4: String,
    pub details: Option<AccountInfo>,
}

impl StoredPaymentAccount {
    pub fn is_offsite(&self) -> bool {
        self.gateway_id.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Contact {
    pub id: u32,
    pub client_id: u32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Client {
    pub id: u32,
    pub company_id: u32,
    pub default_currency: String,
    pub language: String,
    /// The client's primary contact.
    pub contact: Contact,
}

fn last4(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_alphanumeric).collect();
    digits[digits.len().saturating_sub(4)..].iter().collect()
}
