//! Decides who may drive each transition
use crate::entity::{RecOrder, Role, User};
use crate::error::{LedgerError, Result};
use crate::receivable::Receivable;
use crate::transition::TransitionKind;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

/// The entity a transition is about to mutate.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    NewOrder { company: &'a str },
    Order(&'a RecOrder),
    Receivable(&'a Receivable),
}

fn require(ok: bool, reason: impl FnOnce() -> String) -> Decision {
    if ok { Decision::Allow } else { Decision::Deny(reason()) }
}

/// `claimed` is the party the caller names as itself in the first argument.
pub fn authorize(
    transition: TransitionKind,
    caller: &User,
    claimed: &str,
    subject: Subject<'_>,
) -> Decision {
    if !caller.is_active() {
        return Decision::Deny(format!("account {} is {:?}", caller.id, caller.status));
    }
    if caller.id != claimed {
        return Decision::Deny(format!(
            "caller {} cannot act on behalf of {claimed}",
            caller.id
        ));
    }

    match (transition, subject) {
        (TransitionKind::Create, Subject::NewOrder { company }) => {
            if caller.id != company {
                Decision::Deny(format!("only {company} can create its own orders"))
            } else {
                require(caller.role == Role::Company, || {
                    format!("{} is a {} while a Company is needed", caller.id, caller.role)
                })
            }
        }
        (TransitionKind::Sign, Subject::Order(order)) => {
            require(caller.id == order.first_supplier, || {
                format!("only {} can sign order {}", order.first_supplier, order.order_no)
            })
        }
        (TransitionKind::Accept | TransitionKind::Redeem, Subject::Order(order)) => {
            require(caller.id == order.company, || {
                format!("only {} can {transition} for order {}", order.company, order.order_no)
            })
        }
        (TransitionKind::Transfer | TransitionKind::ApplyDiscount, Subject::Receivable(rec)) => {
            require(caller.id == rec.owner, || {
                format!("{} is held by {}", rec.receivable_no, rec.owner)
            })
        }
        (TransitionKind::ConfirmDiscount, Subject::Receivable(rec)) => {
            if caller.role != Role::Financial {
                return Decision::Deny(format!(
                    "{} is a {} while a Financial is needed",
                    caller.id, caller.role
                ));
            }
            // before any application there is nobody to match, the state check rejects it
            match rec.expected_financial() {
                Some(named) => require(caller.id == named, || {
                    format!("discount on {} was requested from {named}", rec.receivable_no)
                }),
                None => Decision::Allow,
            }
        }
        (transition, _) => Decision::Deny(format!("no rule authorizes {transition} on this entity")),
    }
}

/// Registration is reserved to the configured admin identity.
pub fn authorize_registration(caller: &str, admin: &str) -> Decision {
    require(caller == admin, || format!("{caller} is not the registrar"))
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self, transition: TransitionKind, caller: &str) -> Result<()> {
        match self {
            Decision::Allow => {
                debug!(%transition, caller, "authorized");
                Ok(())
            }
            Decision::Deny(reason) => {
                warn!(%transition, caller, %reason, "denied");
                Err(LedgerError::Unauthorized(reason))
            }
        }
    }
}
