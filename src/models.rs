//! Projected contacts and transactions. Dates and ids stay as strings here
//! (the wire/JSON shape); validation lives in ids.rs and the write APIs.

use serde::{Deserialize, Serialize};

/// Supported currency codes. The caller passes the chosen code; unknown codes
/// fall back to the wallet default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    IQD,
    USD,
    EUR,
    GBP,
    JPY,
    CHF,
    CAD,
    AUD,
    CNY,
    INR,
    SAR,
    AED,
    EGP,
    TRY,
    BRL,
    MXN,
    KRW,
    ZAR,
    RUB,
}

impl Currency {
    pub const ALL: [Currency; 19] = [
        Currency::IQD,
        Currency::USD,
        Currency::EUR,
        Currency::GBP,
        Currency::JPY,
        Currency::CHF,
        Currency::CAD,
        Currency::AUD,
        Currency::CNY,
        Currency::INR,
        Currency::SAR,
        Currency::AED,
        Currency::EGP,
        Currency::TRY,
        Currency::BRL,
        Currency::MXN,
        Currency::KRW,
        Currency::ZAR,
        Currency::RUB,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::IQD => "IQD",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
            Currency::CHF => "CHF",
            Currency::CAD => "CAD",
            Currency::AUD => "AUD",
            Currency::CNY => "CNY",
            Currency::INR => "INR",
            Currency::SAR => "SAR",
            Currency::AED => "AED",
            Currency::EGP => "EGP",
            Currency::TRY => "TRY",
            Currency::BRL => "BRL",
            Currency::MXN => "MXN",
            Currency::KRW => "KRW",
            Currency::ZAR => "ZAR",
            Currency::RUB => "RUB",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Money,
    Item,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    #[default]
    Lent,
    Owed,
}

impl TransactionDirection {
    /// Contribution of a transaction to the contact's balance.
    pub fn signed(&self, amount: i64) -> i64 {
        match self {
            TransactionDirection::Lent => amount,
            TransactionDirection::Owed => -amount,
        }
    }
}

/// Derived contact record. `balance` is in minor currency units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default)]
    pub balance: i64,
    pub wallet_id: Option<String>,
}

/// Derived transaction record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Transaction {
    pub id: String,
    pub contact_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub direction: TransactionDirection,
    pub amount: i64,
    pub currency: Currency,
    pub description: Option<String>,
    pub transaction_date: String,
    pub due_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub is_synced: bool,
    pub wallet_id: Option<String>,
}

/// The full projection for one wallet. Both lists are kept sorted by id so
/// equal event logs serialize identically on every device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    pub contacts: Vec<Contact>,
    pub transactions: Vec<Transaction>,
}

impl AppState {
    pub fn contact(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub(crate) fn sort(&mut self) {
        self.contacts.sort_by(|a, b| a.id.cmp(&b.id));
        self.transactions.sort_by(|a, b| a.id.cmp(&b.id));
    }
}
