//! Contract façade: the transaction surface the client invokes
use crate::config::ContractConfig;
use crate::entity::{RecOrder, Role, TimeStamp, User};
use crate::error::{LedgerError, Result};
use crate::guard::{self, Subject};
use crate::query::QueryEngine;
use crate::receivable::Receivable;
use crate::repository::{Session, SledStore, Store};
use crate::transition::{self, Outcome, TransitionKind};
use crate::utils;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// A parsed transaction: its name plus typed positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    InitLedger,
    RegisterUser {
        id: String,
        role: Role,
        enterprise: String,
    },
    CreateRecOrder {
        company: String,
        supplier: String,
        amount: u64,
    },
    SignReceivable {
        supplier: String,
        order_no: String,
        amount: u64,
    },
    AcceptReceivable {
        company: String,
        receivable_no: String,
    },
    TransferReceivable {
        from: String,
        to: String,
        receivable_no: String,
    },
    ApplyDiscount {
        holder: String,
        financial: String,
        receivable_no: String,
    },
    DiscountConfirm {
        financial: String,
        order_no: String,
    },
    Redeemed {
        company: String,
        order_no: String,
    },
    QueryAllUsers,
    QueryAllRecOrders,
    QueryAllReceivables,
    QueryUser(String),
    QueryRecOrder(String),
    QueryReceivable(String),
}

/// JSON encodable result of a transaction. `Empty` encodes as `null`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Response {
    Empty,
    User(User),
    Order(RecOrder),
    Receivable(Receivable),
    Users(Vec<User>),
    Orders(Vec<RecOrder>),
    Receivables(Vec<Receivable>),
}

fn arity(name: &str) -> Option<usize> {
    let n = match name {
        "InitLedger" | "QueryAllUsers" | "QueryAllRecOrders" | "QueryAllReceivables" => 0,
        "QueryUser" | "QueryRecOrder" | "QueryReceivable" => 1,
        "AcceptReceivable" | "DiscountConfirm" | "Redeemed" => 2,
        "RegisterUser" | "CreateRecOrder" | "SignReceivable" | "TransferReceivable"
        | "ApplyDiscount" => 3,
        _ => return None,
    };
    Some(n)
}

fn parse_amount(raw: &str) -> Result<u64> {
    let amount: i64 = raw
        .trim()
        .parse()
        .map_err(|_| LedgerError::Validation(format!("amount {raw:?} is not an integer")))?;
    if amount <= 0 {
        return Err(LedgerError::Validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(amount as u64)
}

impl Invocation {
    pub fn parse(name: &str, args: &[String]) -> Result<Self> {
        let expected = arity(name).ok_or_else(|| LedgerError::UnknownTransition(name.to_string()))?;
        if args.len() != expected {
            return Err(LedgerError::Validation(format!(
                "{name} takes {expected} arguments, got {}",
                args.len()
            )));
        }

        let invocation = match (name, args) {
            ("InitLedger", []) => Invocation::InitLedger,
            ("RegisterUser", [id, role, enterprise]) => Invocation::RegisterUser {
                id: id.clone(),
                role: role.parse().map_err(LedgerError::Validation)?,
                enterprise: enterprise.clone(),
            },
            ("CreateRecOrder", [company, supplier, amount]) => Invocation::CreateRecOrder {
                company: company.clone(),
                supplier: supplier.clone(),
                amount: parse_amount(amount)?,
            },
            ("SignReceivable", [supplier, order_no, amount]) => Invocation::SignReceivable {
                supplier: supplier.clone(),
                order_no: order_no.clone(),
                amount: parse_amount(amount)?,
            },
            ("AcceptReceivable", [company, receivable_no]) => Invocation::AcceptReceivable {
                company: company.clone(),
                receivable_no: receivable_no.clone(),
            },
            ("TransferReceivable", [from, to, receivable_no]) => Invocation::TransferReceivable {
                from: from.clone(),
                to: to.clone(),
                receivable_no: receivable_no.clone(),
            },
            ("ApplyDiscount", [holder, financial, receivable_no]) => Invocation::ApplyDiscount {
                holder: holder.clone(),
                financial: financial.clone(),
                receivable_no: receivable_no.clone(),
            },
            ("DiscountConfirm", [financial, order_no]) => Invocation::DiscountConfirm {
                financial: financial.clone(),
                order_no: order_no.clone(),
            },
            ("Redeemed", [company, order_no]) => Invocation::Redeemed {
                company: company.clone(),
                order_no: order_no.clone(),
            },
            ("QueryAllUsers", []) => Invocation::QueryAllUsers,
            ("QueryAllRecOrders", []) => Invocation::QueryAllRecOrders,
            ("QueryAllReceivables", []) => Invocation::QueryAllReceivables,
            ("QueryUser", [id]) => Invocation::QueryUser(id.clone()),
            ("QueryRecOrder", [id]) => Invocation::QueryRecOrder(id.clone()),
            ("QueryReceivable", [id]) => Invocation::QueryReceivable(id.clone()),
            _ => return Err(LedgerError::UnknownTransition(name.to_string())),
        };
        Ok(invocation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Invocation::InitLedger => "InitLedger",
            Invocation::RegisterUser { .. } => "RegisterUser",
            Invocation::CreateRecOrder { .. } => "CreateRecOrder",
            Invocation::SignReceivable { .. } => "SignReceivable",
            Invocation::AcceptReceivable { .. } => "AcceptReceivable",
            Invocation::TransferReceivable { .. } => "TransferReceivable",
            Invocation::ApplyDiscount { .. } => "ApplyDiscount",
            Invocation::DiscountConfirm { .. } => "DiscountConfirm",
            Invocation::Redeemed { .. } => "Redeemed",
            Invocation::QueryAllUsers => "QueryAllUsers",
            Invocation::QueryAllRecOrders => "QueryAllRecOrders",
            Invocation::QueryAllReceivables => "QueryAllReceivables",
            Invocation::QueryUser(_) => "QueryUser",
            Invocation::QueryRecOrder(_) => "QueryRecOrder",
            Invocation::QueryReceivable(_) => "QueryReceivable",
        }
    }

    pub fn is_query(&self) -> bool {
        self.name().starts_with("Query")
    }
}

impl Response {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn into_order(self) -> Option<RecOrder> {
        match self {
            Response::Order(order) => Some(order),
            _ => None,
        }
    }

    pub fn into_receivable(self) -> Option<Receivable> {
        match self {
            Response::Receivable(rec) => Some(rec),
            _ => None,
        }
    }
}

/// A transaction that passed every check but has not been committed yet.
pub struct Pending<'c> {
    session: Session<'c>,
    response: Response,
    transaction: &'static str,
    actor: String,
}

impl Pending<'_> {
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Fails with `Conflict` if anything this transaction read has since changed.
    pub fn commit(self) -> Result<Response> {
        self.session.commit()?;
        info!(transaction = self.transaction, actor = %self.actor, "transaction committed");
        Ok(self.response)
    }
}

pub struct Contract {
    store: Arc<dyn Store>,
    config: ContractConfig,
}

fn resolve_caller(session: &mut Session<'_>, actor: &str) -> Result<User> {
    session
        .find::<User>(actor)?
        .ok_or_else(|| LedgerError::Unauthorized(format!("{actor} is not a registered identity")))
}

fn receivable_of(
    session: &mut Session<'_>,
    order: &RecOrder,
    attempted: TransitionKind,
) -> Result<Receivable> {
    match order.receivable_no.as_deref() {
        Some(receivable_no) => session.get(receivable_no),
        None => Err(LedgerError::invalid(order.status, attempted)),
    }
}

fn stage(session: &mut Session<'_>, outcome: Outcome) -> Result<Response> {
    if let Some(order) = &outcome.order {
        session.put(order)?;
    }
    session.put(&outcome.receivable)?;
    debug!(
        receivable = %outcome.receivable.receivable_no,
        status = %outcome.event.action.status(),
        actor = %outcome.event.actor,
        "staged transition"
    );
    Ok(Response::Receivable(outcome.receivable))
}

impl Contract {
    pub fn new(store: Arc<dyn Store>, config: ContractConfig) -> Self {
        Self { store, config }
    }

    pub fn with_sled(instance: Arc<sled::Db>, config: ContractConfig) -> Self {
        Self::new(Arc::new(SledStore::new(instance)), config)
    }

    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(self.store.as_ref())
    }

    /// Seeds the configured accounts. Safe to call any number of times.
    pub fn init_ledger(&self) -> Result<()> {
        self.invoke("", Invocation::InitLedger).map(|_| ())
    }

    /// Runs one transaction to completion on behalf of the authenticated `actor`.
    pub fn invoke(&self, actor: &str, invocation: Invocation) -> Result<Response> {
        let span = info_span!("transaction", name = invocation.name(), actor);
        let _entered = span.enter();

        if invocation.is_query() {
            return self.run_query(invocation);
        }
        self.prepare(actor, invocation)?.commit()
    }

    /// Name and string arguments in, JSON out.
    pub fn invoke_json(&self, actor: &str, name: &str, args: &[String]) -> Result<String> {
        let invocation = Invocation::parse(name, args)?;
        self.invoke(actor, invocation)?.to_json()
    }

    fn run_query(&self, invocation: Invocation) -> Result<Response> {
        let query = self.query();
        let response = match invocation {
            Invocation::QueryAllUsers => Response::Users(query.all_users().collect::<Result<_>>()?),
            Invocation::QueryAllRecOrders => {
                Response::Orders(query.all_orders().collect::<Result<_>>()?)
            }
            Invocation::QueryAllReceivables => {
                Response::Receivables(query.all_receivables().collect::<Result<_>>()?)
            }
            Invocation::QueryUser(id) => Response::User(query.user(&id)?),
            Invocation::QueryRecOrder(order_no) => Response::Order(query.order(&order_no)?),
            Invocation::QueryReceivable(receivable_no) => {
                Response::Receivable(query.receivable(&receivable_no)?)
            }
            other => return Err(LedgerError::UnknownTransition(other.name().to_string())),
        };
        Ok(response)
    }

    /// Authorizes and applies `invocation` against a fresh session without committing.
    pub fn prepare(&self, actor: &str, invocation: Invocation) -> Result<Pending<'_>> {
        let transaction = invocation.name();
        let mut session = Session::new(self.store.as_ref());
        let now: TimeStamp<Utc> = TimeStamp::new();

        let response = match invocation {
            Invocation::InitLedger => {
                let mut seeded = 0;
                for seed in &self.config.seed_users {
                    if !session.exists::<User>(&seed.id)? {
                        session.put(&User::new(&seed.id, &seed.enterprise, seed.role))?;
                        seeded += 1;
                    }
                }
                debug!(seeded, "ledger bootstrap");
                Response::Empty
            }
            Invocation::RegisterUser {
                id,
                role,
                enterprise,
            } => {
                guard::authorize_registration(actor, &self.config.admin_id)
                    .into_result(TransitionKind::Register, actor)?;
                if session.exists::<User>(&id)? {
                    return Err(LedgerError::Validation(format!("{id} is already registered")));
                }
                let user = User::new(id, enterprise, role);
                session.put(&user)?;
                Response::User(user)
            }
            Invocation::CreateRecOrder {
                company,
                supplier,
                amount,
            } => {
                let caller = resolve_caller(&mut session, actor)?;
                guard::authorize(
                    TransitionKind::Create,
                    &caller,
                    &company,
                    Subject::NewOrder { company: &company },
                )
                .into_result(TransitionKind::Create, actor)?;

                let supplier = session.get::<User>(&supplier)?;
                let order_no = utils::new_order_no()?;
                if session.exists::<RecOrder>(&order_no)? {
                    return Err(LedgerError::Identifier(format!("{order_no} is already taken")));
                }
                let order = transition::create_order(&caller, &supplier, amount, order_no, now)?;
                session.put(&order)?;
                Response::Order(order)
            }
            Invocation::SignReceivable {
                supplier,
                order_no,
                amount,
            } => {
                let caller = resolve_caller(&mut session, actor)?;
                let order = session.get::<RecOrder>(&order_no)?;
                guard::authorize(TransitionKind::Sign, &caller, &supplier, Subject::Order(&order))
                    .into_result(TransitionKind::Sign, actor)?;
                if let Some(existing) = order.receivable_no.as_deref() {
                    let status = session.get::<Receivable>(existing)?.status();
                    return Err(LedgerError::invalid(status, TransitionKind::Sign));
                }

                let receivable_no = utils::new_receivable_no()?;
                if session.exists::<Receivable>(&receivable_no)? {
                    return Err(LedgerError::Identifier(format!(
                        "{receivable_no} is already taken"
                    )));
                }
                let (order, receivable) = transition::sign(
                    &order,
                    &supplier,
                    amount,
                    receivable_no,
                    self.config.receivable_term_days,
                    now,
                )?;
                session.put(&order)?;
                session.put(&receivable)?;
                Response::Receivable(receivable)
            }
            Invocation::AcceptReceivable {
                company,
                receivable_no,
            } => {
                let caller = resolve_caller(&mut session, actor)?;
                let rec = session.get::<Receivable>(&receivable_no)?;
                let order = session.get::<RecOrder>(&rec.order_no)?;
                guard::authorize(TransitionKind::Accept, &caller, &company, Subject::Order(&order))
                    .into_result(TransitionKind::Accept, actor)?;

                stage(&mut session, transition::accept(&rec, &company, now)?)?
            }
            Invocation::TransferReceivable {
                from,
                to,
                receivable_no,
            } => {
                let caller = resolve_caller(&mut session, actor)?;
                let rec = session.get::<Receivable>(&receivable_no)?;
                guard::authorize(
                    TransitionKind::Transfer,
                    &caller,
                    &from,
                    Subject::Receivable(&rec),
                )
                .into_result(TransitionKind::Transfer, actor)?;

                let to = session.get::<User>(&to)?;
                stage(&mut session, transition::transfer(&rec, &from, &to, now)?)?
            }
            Invocation::ApplyDiscount {
                holder,
                financial,
                receivable_no,
            } => {
                let caller = resolve_caller(&mut session, actor)?;
                let rec = session.get::<Receivable>(&receivable_no)?;
                guard::authorize(
                    TransitionKind::ApplyDiscount,
                    &caller,
                    &holder,
                    Subject::Receivable(&rec),
                )
                .into_result(TransitionKind::ApplyDiscount, actor)?;

                let order = session.get::<RecOrder>(&rec.order_no)?;
                let financial = session.get::<User>(&financial)?;
                let outcome = transition::apply_discount(&rec, &order, &holder, &financial, now)?;
                stage(&mut session, outcome)?
            }
            Invocation::DiscountConfirm {
                financial,
                order_no,
            } => {
                let caller = resolve_caller(&mut session, actor)?;
                let order = session.get::<RecOrder>(&order_no)?;
                let rec = receivable_of(&mut session, &order, TransitionKind::ConfirmDiscount)?;
                guard::authorize(
                    TransitionKind::ConfirmDiscount,
                    &caller,
                    &financial,
                    Subject::Receivable(&rec),
                )
                .into_result(TransitionKind::ConfirmDiscount, actor)?;

                let outcome = transition::confirm_discount(&rec, &order, &financial, now)?;
                stage(&mut session, outcome)?
            }
            Invocation::Redeemed { company, order_no } => {
                let caller = resolve_caller(&mut session, actor)?;
                let order = session.get::<RecOrder>(&order_no)?;
                guard::authorize(TransitionKind::Redeem, &caller, &company, Subject::Order(&order))
                    .into_result(TransitionKind::Redeem, actor)?;

                let rec = receivable_of(&mut session, &order, TransitionKind::Redeem)?;
                stage(&mut session, transition::redeem(&rec, &order, &company, now)?)?
            }
            query => self.run_query(query)?,
        };

        Ok(Pending {
            session,
            response,
            transaction,
            actor: actor.to_string(),
        })
    }
}
