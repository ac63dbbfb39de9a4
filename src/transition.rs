//! Receivable lifecycle transitions
//!
//! ```text
//! (none) --SignReceivable--> Signed --AcceptReceivable--> Accepted
//! Accepted | Transferred --TransferReceivable--> Transferred
//! Transferred --ApplyDiscount--> DiscountApplied --DiscountConfirm--> DiscountConfirmed
//! DiscountConfirmed --Redeemed--> Redeemed
//! ```
//!
//! Every function here is pure: it takes the current state, the arguments and
//! the acting identity and returns the next state, never touching storage.
//! Callers run the authorization guard before calling in.
use crate::entity::{OrderStatus, RecOrder, Role, TimeStamp, User};
use crate::error::{LedgerError, Result};
use crate::receivable::{Action, HistoryEntry, Receivable, ReceivableStatus};
use chrono::Utc;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Register,
    Create,
    Sign,
    Accept,
    Transfer,
    ApplyDiscount,
    ConfirmDiscount,
    Redeem,
}

/// New receivable state, the order when it changed alongside, and the entry appended.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub receivable: Receivable,
    pub order: Option<RecOrder>,
    pub event: HistoryEntry,
}

impl TransitionKind {
    pub fn transaction_name(&self) -> &'static str {
        match self {
            TransitionKind::Register => "RegisterUser",
            TransitionKind::Create => "CreateRecOrder",
            TransitionKind::Sign => "SignReceivable",
            TransitionKind::Accept => "AcceptReceivable",
            TransitionKind::Transfer => "TransferReceivable",
            TransitionKind::ApplyDiscount => "ApplyDiscount",
            TransitionKind::ConfirmDiscount => "DiscountConfirm",
            TransitionKind::Redeem => "Redeemed",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.transaction_name())
    }
}

fn expect_status(
    rec: &Receivable,
    allowed: &[ReceivableStatus],
    attempted: TransitionKind,
) -> Result<()> {
    let status = rec.status();
    if allowed.contains(&status) {
        Ok(())
    } else {
        Err(LedgerError::invalid(status, attempted))
    }
}

fn expect_pair(rec: &Receivable, order: &RecOrder) -> Result<()> {
    if rec.order_no != order.order_no {
        return Err(LedgerError::Validation(format!(
            "{} does not belong to order {}",
            rec.receivable_no, order.order_no
        )));
    }
    Ok(())
}

fn advance(
    rec: &Receivable,
    order: Option<RecOrder>,
    action: Action,
    actor: &str,
    now: TimeStamp<Utc>,
) -> Result<Outcome> {
    let mut receivable = rec.clone();
    if let Action::Transfer { to, .. } | Action::ConfirmDiscount { financial: to } = &action {
        receivable.owner = to.clone();
    }
    receivable.record(action, actor, now)?;
    let event = receivable
        .history()
        .last()
        .cloned()
        .ok_or_else(|| LedgerError::Validation("receivable history is empty".into()))?;

    Ok(Outcome {
        receivable,
        order,
        event,
    })
}

pub fn create_order(
    company: &User,
    supplier: &User,
    amount: u64,
    order_no: String,
    now: TimeStamp<Utc>,
) -> Result<RecOrder> {
    if amount == 0 {
        return Err(LedgerError::Validation("order amount must be positive".into()));
    }
    if company.id == supplier.id {
        return Err(LedgerError::Validation(format!(
            "{} cannot order from itself",
            company.id
        )));
    }
    if supplier.role != Role::Supplier {
        return Err(LedgerError::Validation(format!(
            "{} is a {} while a Supplier is needed",
            supplier.id, supplier.role
        )));
    }

    Ok(RecOrder {
        order_no,
        company: company.id.clone(),
        first_supplier: supplier.id.clone(),
        amount,
        receivable_no: None,
        status: OrderStatus::Created,
        created_at: now,
    })
}

/// Issues the receivable for `order`. The signed amount may sit below face value.
pub fn sign(
    order: &RecOrder,
    supplier: &str,
    amount: u64,
    receivable_no: String,
    term_days: i64,
    now: TimeStamp<Utc>,
) -> Result<(RecOrder, Receivable)> {
    if order.is_signed() || order.status != OrderStatus::Created {
        return Err(LedgerError::invalid(order.status, TransitionKind::Sign));
    }
    if amount == 0 || amount > order.amount {
        return Err(LedgerError::Validation(format!(
            "signed amount {amount} must be within 1..={}",
            order.amount
        )));
    }

    if term_days < 1 {
        return Err(LedgerError::Validation(format!(
            "receivable term must be at least one day, got {term_days}"
        )));
    }
    let expires_at = now.plus_days(term_days)?;
    let receivable = Receivable::new(
        receivable_no,
        order.order_no.clone(),
        supplier.to_string(),
        amount,
        now,
        expires_at,
    );
    let mut order = order.clone();
    order.receivable_no = Some(receivable.receivable_no.clone());

    Ok((order, receivable))
}

pub fn accept(rec: &Receivable, company: &str, now: TimeStamp<Utc>) -> Result<Outcome> {
    expect_status(rec, &[ReceivableStatus::Signed], TransitionKind::Accept)?;
    advance(rec, None, Action::Accept, company, now)
}

pub fn transfer(rec: &Receivable, from: &str, to: &User, now: TimeStamp<Utc>) -> Result<Outcome> {
    expect_status(
        rec,
        &[ReceivableStatus::Accepted, ReceivableStatus::Transferred],
        TransitionKind::Transfer,
    )?;
    if to.id == from {
        return Err(LedgerError::Validation(format!(
            "{from} already holds {}",
            rec.receivable_no
        )));
    }

    let action = Action::Transfer {
        from: from.to_string(),
        to: to.id.clone(),
    };
    advance(rec, None, action, from, now)
}

pub fn apply_discount(
    rec: &Receivable,
    order: &RecOrder,
    holder: &str,
    financial: &User,
    now: TimeStamp<Utc>,
) -> Result<Outcome> {
    expect_pair(rec, order)?;
    expect_status(rec, &[ReceivableStatus::Transferred], TransitionKind::ApplyDiscount)?;
    if financial.role != Role::Financial {
        return Err(LedgerError::Validation(format!(
            "{} is a {} while a Financial is needed",
            financial.id, financial.role
        )));
    }

    let mut order = order.clone();
    order.status = OrderStatus::DiscountRequested;
    let action = Action::ApplyDiscount {
        holder: holder.to_string(),
        financial: financial.id.clone(),
    };
    advance(rec, Some(order), action, holder, now)
}

/// The financial institution takes over the claim.
pub fn confirm_discount(
    rec: &Receivable,
    order: &RecOrder,
    financial: &str,
    now: TimeStamp<Utc>,
) -> Result<Outcome> {
    expect_pair(rec, order)?;
    expect_status(
        rec,
        &[ReceivableStatus::DiscountApplied],
        TransitionKind::ConfirmDiscount,
    )?;

    let mut order = order.clone();
    order.status = OrderStatus::DiscountConfirmed;
    let action = Action::ConfirmDiscount {
        financial: financial.to_string(),
    };
    advance(rec, Some(order), action, financial, now)
}

pub fn redeem(
    rec: &Receivable,
    order: &RecOrder,
    company: &str,
    now: TimeStamp<Utc>,
) -> Result<Outcome> {
    expect_pair(rec, order)?;
    expect_status(rec, &[ReceivableStatus::DiscountConfirmed], TransitionKind::Redeem)?;

    let mut order = order.clone();
    order.status = OrderStatus::Redeemed;
    advance(rec, Some(order), Action::Redeem, company, now)
}
