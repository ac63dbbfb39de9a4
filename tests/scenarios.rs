use anyhow::Context;
use rec_order::config::ContractConfig;
use rec_order::entity::OrderStatus;
use rec_order::receivable::{Action, ReceivableStatus};
use rec_order::{Contract, Invocation, LedgerError};
use sled::open;
use std::sync::Arc;

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

// Sled uses file-based locking to prevent concurrent access, so every test
// opens its own database under a temp dir for simplified cleanup. The dir is
// returned so it outlives the contract.
fn seeded_contract(name: &str) -> anyhow::Result<(TempDir, Contract)> {
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let contract = Contract::with_sled(Arc::new(db), ContractConfig::default());
    contract.init_ledger()?;
    Ok((temp_dir, contract))
}

fn create_order(contract: &Contract, amount: u64) -> anyhow::Result<String> {
    let order = contract
        .invoke(
            "user1",
            Invocation::CreateRecOrder {
                company: "user1".into(),
                supplier: "user2".into(),
                amount,
            },
        )?
        .into_order()
        .context("expected an order")?;
    Ok(order.order_no)
}

fn sign(contract: &Contract, order_no: &str, amount: u64) -> anyhow::Result<String> {
    let rec = contract
        .invoke(
            "user2",
            Invocation::SignReceivable {
                supplier: "user2".into(),
                order_no: order_no.into(),
                amount,
            },
        )?
        .into_receivable()
        .context("expected a receivable")?;
    Ok(rec.receivable_no)
}

fn accept(contract: &Contract, receivable_no: &str) -> anyhow::Result<()> {
    contract.invoke(
        "user1",
        Invocation::AcceptReceivable {
            company: "user1".into(),
            receivable_no: receivable_no.into(),
        },
    )?;
    Ok(())
}

fn transfer_invocation(from: &str, to: &str, receivable_no: &str) -> Invocation {
    Invocation::TransferReceivable {
        from: from.into(),
        to: to.into(),
        receivable_no: receivable_no.into(),
    }
}

#[test]
fn full_factoring_workflow() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("full_factoring_workflow.db")?;

    let order = contract
        .invoke(
            "user1",
            Invocation::CreateRecOrder {
                company: "user1".into(),
                supplier: "user2".into(),
                amount: 500_000,
            },
        )?
        .into_order()
        .context("CreateRecOrder returned no order")?;
    assert_eq!(order.amount, 500_000);
    assert_eq!(order.status, OrderStatus::Created);

    let rec = contract
        .invoke(
            "user2",
            Invocation::SignReceivable {
                supplier: "user2".into(),
                order_no: order.order_no.clone(),
                amount: 499_999,
            },
        )?
        .into_receivable()
        .context("SignReceivable returned no receivable")?;
    assert_eq!(rec.order_no, order.order_no);
    assert_eq!(rec.owner, "user2");
    assert_eq!(rec.amount, 499_999);
    assert_eq!(rec.status(), ReceivableStatus::Signed);

    let rec = contract
        .invoke(
            "user1",
            Invocation::AcceptReceivable {
                company: "user1".into(),
                receivable_no: rec.receivable_no.clone(),
            },
        )?
        .into_receivable()
        .context("AcceptReceivable returned no receivable")?;
    assert_eq!(rec.status(), ReceivableStatus::Accepted);
    assert_eq!(rec.owner, "user2");

    let rec = contract
        .invoke("user2", transfer_invocation("user2", "user3", &rec.receivable_no))?
        .into_receivable()
        .context("TransferReceivable returned no receivable")?;
    assert_eq!(rec.status(), ReceivableStatus::Transferred);
    assert_eq!(rec.owner, "user3");

    let rec = contract
        .invoke(
            "user3",
            Invocation::ApplyDiscount {
                holder: "user3".into(),
                financial: "user4".into(),
                receivable_no: rec.receivable_no.clone(),
            },
        )?
        .into_receivable()
        .context("ApplyDiscount returned no receivable")?;
    assert_eq!(rec.status(), ReceivableStatus::DiscountApplied);
    assert_eq!(
        contract.query().order(&order.order_no)?.status,
        OrderStatus::DiscountRequested
    );

    let rec = contract
        .invoke(
            "user4",
            Invocation::DiscountConfirm {
                financial: "user4".into(),
                order_no: order.order_no.clone(),
            },
        )?
        .into_receivable()
        .context("DiscountConfirm returned no receivable")?;
    assert_eq!(rec.status(), ReceivableStatus::DiscountConfirmed);
    assert_eq!(rec.owner, "user4");

    let rec = contract
        .invoke(
            "user1",
            Invocation::Redeemed {
                company: "user1".into(),
                order_no: order.order_no.clone(),
            },
        )?
        .into_receivable()
        .context("Redeemed returned no receivable")?;
    assert_eq!(rec.status(), ReceivableStatus::Redeemed);
    assert_eq!(rec.amount, 499_999);
    assert_eq!(
        contract.query().order(&order.order_no)?.status,
        OrderStatus::Redeemed
    );
    let actions: Vec<(Action, &str)> = rec
        .history()
        .iter()
        .map(|entry| (entry.action.clone(), entry.actor.as_str()))
        .collect();
    assert_eq!(
        actions,
        vec![
            (Action::Sign { amount: 499_999 }, "user2"),
            (Action::Accept, "user1"),
            (
                Action::Transfer {
                    from: "user2".into(),
                    to: "user3".into(),
                },
                "user2",
            ),
            (
                Action::ApplyDiscount {
                    holder: "user3".into(),
                    financial: "user4".into(),
                },
                "user3",
            ),
            (
                Action::ConfirmDiscount {
                    financial: "user4".into(),
                },
                "user4",
            ),
            (Action::Redeem, "user1"),
        ]
    );
    assert!(rec.verify_history()?);

    // once redeemed, every path back into the lifecycle is closed
    let attempts = [
        (
            "user1",
            Invocation::AcceptReceivable {
                company: "user1".into(),
                receivable_no: rec.receivable_no.clone(),
            },
        ),
        ("user4", transfer_invocation("user4", "user3", &rec.receivable_no)),
        (
            "user4",
            Invocation::ApplyDiscount {
                holder: "user4".into(),
                financial: "user4".into(),
                receivable_no: rec.receivable_no.clone(),
            },
        ),
        (
            "user4",
            Invocation::DiscountConfirm {
                financial: "user4".into(),
                order_no: order.order_no.clone(),
            },
        ),
        (
            "user1",
            Invocation::Redeemed {
                company: "user1".into(),
                order_no: order.order_no.clone(),
            },
        ),
        (
            "user2",
            Invocation::SignReceivable {
                supplier: "user2".into(),
                order_no: order.order_no.clone(),
                amount: 1,
            },
        ),
    ];
    for (actor, invocation) in attempts {
        let name = invocation.name();
        let err = contract.invoke(actor, invocation).unwrap_err();
        assert!(
            matches!(err, LedgerError::InvalidTransition { .. }),
            "{name} after redemption gave {err}"
        );
        assert!(err.to_string().ends_with("status is Redeemed"), "{name}: {err}");
    }

    let stored = contract.query().receivable(&rec.receivable_no)?;
    assert_eq!(stored, rec);

    Ok(())
}

#[test]
fn committed_entities_read_back_unchanged() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("committed_entities_read_back.db")?;

    let order = contract
        .invoke(
            "user1",
            Invocation::CreateRecOrder {
                company: "user1".into(),
                supplier: "user2".into(),
                amount: 1_000_000,
            },
        )?
        .into_order()
        .context("expected an order")?;
    assert_eq!(contract.query().order(&order.order_no)?, order);

    let rec = contract
        .invoke(
            "user2",
            Invocation::SignReceivable {
                supplier: "user2".into(),
                order_no: order.order_no.clone(),
                amount: 1_000_000,
            },
        )?
        .into_receivable()
        .context("expected a receivable")?;
    assert_eq!(contract.query().receivable(&rec.receivable_no)?, rec);

    let linked = contract.query().order(&order.order_no)?;
    assert_eq!(linked.receivable_no.as_deref(), Some(rec.receivable_no.as_str()));
    assert_eq!(linked.amount, order.amount);

    Ok(())
}

#[test]
fn wrong_financial_cannot_confirm_discount() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("wrong_financial.db")?;
    contract.invoke(
        "admin",
        Invocation::RegisterUser {
            id: "user5".into(),
            role: rec_order::entity::Role::Financial,
            enterprise: "YY Bank".into(),
        },
    )?;

    let order_no = create_order(&contract, 500_000)?;
    let rec_no = sign(&contract, &order_no, 450_000)?;
    accept(&contract, &rec_no)?;
    contract.invoke("user2", transfer_invocation("user2", "user3", &rec_no))?;
    contract.invoke(
        "user3",
        Invocation::ApplyDiscount {
            holder: "user3".into(),
            financial: "user4".into(),
            receivable_no: rec_no.clone(),
        },
    )?;

    for intruder in ["user5", "user3", "user1"] {
        let err = contract
            .invoke(
                intruder,
                Invocation::DiscountConfirm {
                    financial: intruder.into(),
                    order_no: order_no.clone(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized(_)), "{intruder}: {err}");
    }

    let rec = contract.query().receivable(&rec_no)?;
    assert_eq!(rec.status(), ReceivableStatus::DiscountApplied);
    assert_eq!(rec.owner, "user3");

    Ok(())
}

#[test]
fn unauthorized_actor_is_denied_even_when_state_allows() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("unauthorized_actor.db")?;
    let order_no = create_order(&contract, 10_000)?;

    // user3 is a supplier, but not the one named on the order
    let err = contract
        .invoke(
            "user3",
            Invocation::SignReceivable {
                supplier: "user3".into(),
                order_no: order_no.clone(),
                amount: 10_000,
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(_)));

    // user2 may sign, but not while claiming to be user3
    let err = contract
        .invoke(
            "user2",
            Invocation::SignReceivable {
                supplier: "user3".into(),
                order_no: order_no.clone(),
                amount: 10_000,
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(_)));

    let rec_no = sign(&contract, &order_no, 10_000)?;
    let err = contract
        .invoke(
            "user2",
            Invocation::AcceptReceivable {
                company: "user2".into(),
                receivable_no: rec_no.clone(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Unauthorized(_)));
    assert_eq!(
        contract.query().receivable(&rec_no)?.status(),
        ReceivableStatus::Signed
    );

    Ok(())
}

#[test]
fn out_of_order_transition_leaves_state_unchanged() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("out_of_order.db")?;
    let order_no = create_order(&contract, 80_000)?;
    let rec_no = sign(&contract, &order_no, 75_000)?;
    let before = contract.query().receivable(&rec_no)?;

    // the holder can only discount after a transfer
    let err = contract
        .invoke(
            "user2",
            Invocation::ApplyDiscount {
                holder: "user2".into(),
                financial: "user4".into(),
                receivable_no: rec_no.clone(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));

    // repeating the rejected call rejects again, identically
    let again = contract
        .invoke(
            "user2",
            Invocation::ApplyDiscount {
                holder: "user2".into(),
                financial: "user4".into(),
                receivable_no: rec_no.clone(),
            },
        )
        .unwrap_err();
    assert_eq!(err.to_string(), again.to_string());

    assert_eq!(contract.query().receivable(&rec_no)?, before);
    assert_eq!(contract.query().order(&order_no)?.status, OrderStatus::Created);

    Ok(())
}

#[test]
fn second_signature_names_the_receivable_status() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("second_signature.db")?;
    let order_no = create_order(&contract, 20_000)?;
    let rec_no = sign(&contract, &order_no, 20_000)?;
    accept(&contract, &rec_no)?;

    let err = contract
        .invoke(
            "user2",
            Invocation::SignReceivable {
                supplier: "user2".into(),
                order_no: order_no.clone(),
                amount: 1,
            },
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "cannot SignReceivable while status is Accepted");
    assert_eq!(contract.query().all_receivables().count(), 1);

    Ok(())
}

#[test]
fn unusable_receivable_term_fails_signing_cleanly() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    for term_days in [-30, 200_000, i64::MAX] {
        let db = open(temp_dir.path().join(format!("term_{term_days}.db")))?;
        let config = ContractConfig {
            receivable_term_days: term_days,
            ..ContractConfig::default()
        };
        let contract = Contract::with_sled(Arc::new(db), config);
        contract.init_ledger()?;
        let order_no = create_order(&contract, 1_000)?;

        let err = contract
            .invoke(
                "user2",
                Invocation::SignReceivable {
                    supplier: "user2".into(),
                    order_no: order_no.clone(),
                    amount: 1_000,
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)), "{term_days}: {err}");
        assert!(!contract.query().order(&order_no)?.is_signed());
    }

    Ok(())
}

#[test]
fn racing_transfers_commit_exactly_once() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("racing_transfers.db")?;
    let order_no = create_order(&contract, 500_000)?;
    let rec_no = sign(&contract, &order_no, 500_000)?;
    accept(&contract, &rec_no)?;

    // both read the receivable at the same version before either commits
    let to_user3 = contract.prepare("user2", transfer_invocation("user2", "user3", &rec_no))?;
    let to_user4 = contract.prepare("user2", transfer_invocation("user2", "user4", &rec_no))?;

    to_user3.commit()?;
    let err = to_user4.commit().unwrap_err();
    assert!(matches!(err, LedgerError::Conflict { .. }));
    assert!(err.is_retryable());

    let rec = contract.query().receivable(&rec_no)?;
    assert_eq!(rec.owner, "user3");
    assert_eq!(rec.history().len(), 3);

    // a retry re-reads the new owner and is then refused on the merits
    let retry = contract
        .invoke("user2", transfer_invocation("user2", "user4", &rec_no))
        .unwrap_err();
    assert!(matches!(retry, LedgerError::Unauthorized(_)));

    Ok(())
}

#[test]
fn receivable_can_change_hands_repeatedly() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("repeat_transfer.db")?;
    let order_no = create_order(&contract, 30_000)?;
    let rec_no = sign(&contract, &order_no, 30_000)?;
    accept(&contract, &rec_no)?;

    contract.invoke("user2", transfer_invocation("user2", "user3", &rec_no))?;
    contract.invoke("user3", transfer_invocation("user3", "user2", &rec_no))?;
    contract.invoke("user2", transfer_invocation("user2", "user3", &rec_no))?;

    let missing = contract
        .invoke("user3", transfer_invocation("user3", "nobody", &rec_no))
        .unwrap_err();
    assert!(matches!(missing, LedgerError::NotFound { .. }));

    let rec = contract.query().receivable(&rec_no)?;
    assert_eq!(rec.owner, "user3");
    assert_eq!(rec.status(), ReceivableStatus::Transferred);
    assert!(rec.verify_history()?);

    Ok(())
}

#[test]
fn json_surface_matches_transaction_names() -> anyhow::Result<()> {
    let (_dir, contract) = seeded_contract("json_surface.db")?;
    let args = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    let order: serde_json::Value = serde_json::from_str(&contract.invoke_json(
        "user1",
        "CreateRecOrder",
        &args(&["user1", "user2", "500000"]),
    )?)?;
    assert_eq!(order["status"], "Created");
    assert_eq!(order["amount"], 500_000);
    let order_no = order["order_no"].as_str().context("order_no missing")?;

    let rec: serde_json::Value = serde_json::from_str(&contract.invoke_json(
        "user2",
        "SignReceivable",
        &args(&["user2", order_no, "499999"]),
    )?)?;
    assert_eq!(rec["status"], "Signed");
    assert_eq!(rec["owner"], "user2");

    let users: serde_json::Value =
        serde_json::from_str(&contract.invoke_json("user1", "QueryAllUsers", &[])?)?;
    assert_eq!(users.as_array().map(Vec::len), Some(4));

    let receivables: serde_json::Value =
        serde_json::from_str(&contract.invoke_json("user1", "QueryAllReceivables", &[])?)?;
    assert_eq!(receivables.as_array().map(Vec::len), Some(1));

    let unknown = contract.invoke_json("user1", "CancelRecOrder", &[]).unwrap_err();
    assert!(matches!(unknown, LedgerError::UnknownTransition(_)));

    Ok(())
}

#[test]
fn ledger_survives_reopen() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("reopen.db");

    let rec_no = {
        let contract =
            Contract::with_sled(Arc::new(open(&db_path)?), ContractConfig::default());
        contract.init_ledger()?;
        let order_no = create_order(&contract, 5_000)?;
        sign(&contract, &order_no, 4_000)?
    };

    let contract = Contract::with_sled(Arc::new(open(&db_path)?), ContractConfig::default());
    contract.init_ledger()?;
    let rec = contract.query().receivable(&rec_no)?;
    assert_eq!(rec.amount, 4_000);
    assert_eq!(contract.query().all_users().count(), 4);

    Ok(())
}
