//! Ledger participants and receivable orders
use crate::error::LedgerError;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, serde::Deserialize, Debug, Clone, Copy,
    PartialEq, Eq, PartialOrd, Ord,
)]
pub enum Role {
    #[n(0)]
    Company,
    #[n(1)]
    Supplier,
    #[n(2)]
    Financial,
}

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, serde::Deserialize, Debug, Clone, Copy,
    PartialEq, Eq, Default,
)]
pub enum AccountStatus {
    #[n(0)]
    Invalid,
    #[n(1)]
    #[default]
    Valid,
    #[n(2)]
    Frozen,
}

#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: String, // enrollment name of the identity
    #[n(1)]
    pub enterprise: String,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub status: AccountStatus,
}

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum OrderStatus {
    #[n(0)]
    Created,
    #[n(1)]
    DiscountRequested,
    #[n(2)]
    DiscountConfirmed,
    #[n(3)]
    Redeemed,
}

// the factoring agreement. face value is fixed here, the receivable carries the claim.
#[derive(minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RecOrder {
    #[n(0)]
    pub order_no: String,
    #[n(1)]
    pub company: String,
    #[n(2)]
    pub first_supplier: String,
    #[n(3)]
    pub amount: u64,
    #[n(4)]
    pub receivable_no: Option<String>, // set once the supplier signs
    #[n(5)]
    pub status: OrderStatus,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl User {
    pub fn new(id: impl Into<String>, enterprise: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            enterprise: enterprise.into(),
            role,
            status: AccountStatus::Valid,
        }
    }
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Valid
    }
}

impl RecOrder {
    pub fn is_signed(&self) -> bool {
        self.receivable_no.is_some()
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap_or_default()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Fails when the result leaves the range a timestamp can be stored in.
    pub fn plus_days(&self, days: i64) -> crate::error::Result<Self> {
        TimeDelta::try_days(days)
            .and_then(|delta| self.0.checked_add_signed(delta))
            .filter(|shifted| shifted.timestamp_nanos_opt().is_some())
            .map(Self)
            .ok_or_else(|| {
                LedgerError::Validation(format!("{days} days from {} is out of range", self.0))
            })
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Company" => Ok(Role::Company),
            "Supplier" => Ok(Role::Supplier),
            "Financial" => Ok(Role::Financial),
            other => Err(format!("unknown role {other}")),
        }
    }
}

impl Serialize for TimeStamp<Utc> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
