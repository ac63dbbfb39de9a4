//! The receivable instrument and its append-only history
use crate::entity::TimeStamp;
use crate::error::Result;
use crate::utils;
use chrono::Utc;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Receivable {
    #[n(0)]
    pub receivable_no: String,
    #[n(1)]
    pub order_no: String, // lookup only, the order is stored on its own key
    #[n(2)]
    pub owner: String,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub signed_at: TimeStamp<Utc>,
    #[n(5)]
    pub expires_at: TimeStamp<Utc>,
    #[n(6)]
    history: Vec<HistoryEntry>,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize, Clone)]
pub struct HistoryEntry {
    #[n(0)]
    pub action: Action,
    #[n(1)]
    pub actor: String,
    #[n(2)]
    pub amount: u64, // amount of the receivable once this entry applied
    #[n(3)]
    pub timestamp: TimeStamp<Utc>,
    #[n(4)]
    pub prev_digest: String, // sha256 of the previous entry, empty for the first
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize, Clone)]
pub enum Action {
    #[n(0)]
    Sign {
        #[n(0)]
        amount: u64,
    },
    #[n(1)]
    Accept,
    #[n(2)]
    Transfer {
        #[n(0)]
        from: String,
        #[n(1)]
        to: String,
    },
    #[n(3)]
    ApplyDiscount {
        #[n(0)]
        holder: String,
        #[n(1)]
        financial: String,
    },
    #[n(4)]
    ConfirmDiscount {
        #[n(0)]
        financial: String,
    },
    #[n(5)]
    Redeem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ReceivableStatus {
    Signed,
    Accepted,
    Transferred,
    DiscountApplied,
    DiscountConfirmed,
    Redeemed,
}

impl Action {
    pub fn status(&self) -> ReceivableStatus {
        match self {
            Action::Sign { .. } => ReceivableStatus::Signed,
            Action::Accept => ReceivableStatus::Accepted,
            Action::Transfer { .. } => ReceivableStatus::Transferred,
            Action::ApplyDiscount { .. } => ReceivableStatus::DiscountApplied,
            Action::ConfirmDiscount { .. } => ReceivableStatus::DiscountConfirmed,
            Action::Redeem => ReceivableStatus::Redeemed,
        }
    }
}

impl ReceivableStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceivableStatus::Redeemed)
    }
}

impl fmt::Display for ReceivableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Receivable {
    /// Opens a receivable with its signing entry as the first history element.
    pub fn new(
        receivable_no: String,
        order_no: String,
        supplier: String,
        amount: u64,
        signed_at: TimeStamp<Utc>,
        expires_at: TimeStamp<Utc>,
    ) -> Self {
        let sign = HistoryEntry {
            action: Action::Sign { amount },
            actor: supplier.clone(),
            amount,
            timestamp: signed_at.clone(),
            prev_digest: String::new(),
        };

        Self {
            receivable_no,
            order_no,
            owner: supplier,
            amount,
            signed_at,
            expires_at,
            history: vec![sign],
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// The status is whatever the latest history entry says it is.
    pub fn status(&self) -> ReceivableStatus {
        self.history
            .last()
            .map(|entry| entry.action.status())
            .unwrap_or(ReceivableStatus::Signed)
    }

    /// Financial party named by the most recent discount application, if any.
    pub fn expected_financial(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|entry| match &entry.action {
            Action::ApplyDiscount { financial, .. } => Some(financial.as_str()),
            _ => None,
        })
    }

    /// Appends an entry chained onto the current head of the history.
    pub fn record(&mut self, action: Action, actor: &str, timestamp: TimeStamp<Utc>) -> Result<()> {
        let prev_digest = self.head_digest()?;
        self.history.push(HistoryEntry {
            action,
            actor: actor.to_string(),
            amount: self.amount,
            timestamp,
            prev_digest,
        });
        Ok(())
    }

    pub fn head_digest(&self) -> Result<String> {
        match self.history.last() {
            Some(entry) => utils::digest_of(entry),
            None => Ok(String::new()),
        }
    }

    /// Walks the chain and checks every back-link against the entry before it.
    pub fn verify_history(&self) -> Result<bool> {
        let mut expected = String::new();
        for entry in &self.history {
            if entry.prev_digest != expected {
                return Ok(false);
            }
            expected = utils::digest_of(entry)?;
        }
        Ok(true)
    }

    /// One line per history entry, oldest first.
    pub fn view_history(&self) -> Vec<String> {
        self.history
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                format!(
                    "{i}: {} by {} ({}) at {}",
                    entry.action.status(),
                    entry.actor,
                    entry.amount,
                    entry.timestamp.to_datetime_utc()
                )
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn history_mut(&mut self) -> &mut Vec<HistoryEntry> {
        &mut self.history
    }
}

impl Serialize for Receivable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Receivable", 8)?;
        state.serialize_field("receivable_no", &self.receivable_no)?;
        state.serialize_field("order_no", &self.order_no)?;
        state.serialize_field("owner", &self.owner)?;
        state.serialize_field("amount", &self.amount)?;
        state.serialize_field("status", &self.status())?;
        state.serialize_field("signed_at", &self.signed_at)?;
        state.serialize_field("expires_at", &self.expires_at)?;
        state.serialize_field("history", &self.history)?;
        state.end()
    }
}
