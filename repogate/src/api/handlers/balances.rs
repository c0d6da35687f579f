//! HTTP handlers for wallet balances.

use tracing::instrument;

use crate::api::executor::RequestContext;
use crate::api::models::{
    balances::{BalanceMethod, ChangeBalance, GetBalance},
    pagination::{Page, Pagination},
    response::{Reply, ResponseCode},
};
use crate::api::validation::NoParams;
use crate::db::Session;
use crate::db::handlers::{FindOneOptions, FindOptions, Repository};
use crate::db::query::RawQuery;
use crate::errors::{Error, Result};
use crate::types::{Filter, Record};

/// Adds to an existing balance or opens a new one at `$1`. The guard leaves the row untouched
/// (and returns nothing) when the sum would overflow.
const CREDIT_SQL: &str = "INSERT INTO balances (address, amount) VALUES ($2, $1) \
     ON CONFLICT (address) DO UPDATE SET amount = balances.amount + EXCLUDED.amount \
     WHERE balances.amount <= $3 - EXCLUDED.amount";

/// Subtracts from an existing balance; matches nothing when the address has none or the
/// difference would overflow.
const DEBIT_SQL: &str = "UPDATE balances SET amount = amount - $1 WHERE address = $2 AND amount >= $3 + $1";

/// Apply one change in a single statement, so concurrent changes to the same address serialize
/// on its row instead of overwriting each other.
///
/// A credit opens the balance when the address has none. A debit needs an existing balance.
#[instrument(skip_all, fields(address = %change.address, method = ?change.method), err)]
pub async fn apply_change(balances: &Repository, session: &mut Session, change: &ChangeBalance) -> Result<()> {
    let changed = match change.method {
        BalanceMethod::Credit => {
            let raw = RawQuery::new(CREDIT_SQL)
                .bind(change.amount)
                .bind(change.address.as_str())
                .bind(i64::MAX);
            balances.insert(session, raw).await?
        }
        BalanceMethod::Debit => {
            let raw = RawQuery::new(DEBIT_SQL)
                .bind(change.amount)
                .bind(change.address.as_str())
                .bind(i64::MIN);
            balances.update(session, raw, &Record::new()).await?
        }
    };
    if !changed.is_empty() {
        return Ok(());
    }

    let filter = Filter::new().with("address", change.address.as_str());
    if balances.count(session, filter).await? > 0 {
        Err(Error::bad_request()
            .with_code(ResponseCode::TransactionLimitExceeded)
            .with_message(ResponseCode::TransactionLimitExceeded.detail()))
    } else {
        Err(Error::bad_request()
            .with_code(ResponseCode::InsufficientAmount)
            .with_message(ResponseCode::InsufficientAmount.detail())
            .with_details("Not found address"))
    }
}

/// Credit or debit an address
#[instrument(skip_all, fields(address = %ctx.body.address))]
pub async fn change_balance(mut ctx: RequestContext<NoParams, NoParams, ChangeBalance>) -> Result<Reply> {
    let balances = &ctx.state.repos.balances;
    apply_change(balances, &mut ctx.session, &ctx.body).await?;
    balances
        .invalidate(&Filter::new().with("address", ctx.body.address.as_str()))
        .await;

    Reply::data("success")
}

/// The balance of one address, served from the cache when it holds one
#[instrument(skip_all, fields(address = %ctx.query.address))]
pub async fn get_balance(mut ctx: RequestContext<GetBalance>) -> Result<Reply> {
    let options = FindOneOptions::builder()
        .projection(vec!["address".to_string(), "amount".to_string()])
        .from_cache(true)
        .cache_on_success(true)
        .build();
    let filter = Filter::new().with("address", ctx.query.address.as_str());

    match ctx.state.repos.balances.find_one(&mut ctx.session, filter, &options).await? {
        Some(balance) => Reply::data(balance),
        None => Err(Error::not_found().with_details("Not found address")),
    }
}

/// Every balance, one page at a time
#[instrument(skip_all)]
pub async fn list_balances(mut ctx: RequestContext<Pagination>) -> Result<Reply> {
    let balances = &ctx.state.repos.balances;
    let options = FindOptions::builder()
        .projection(vec!["address".to_string(), "amount".to_string(), "created_at".to_string()])
        .limit(ctx.query.limit())
        .skip(ctx.query.skip())
        .build();

    let items = balances.find(&mut ctx.session, Filter::new(), &options).await?;
    let total = balances.count(&mut ctx.session, Filter::new()).await?;

    Reply::data(Page { items, total })
}
