use rusqlite::{params, Connection};

use crate::domain::validation;
use crate::error::AppError;
use crate::models::MonthSummary;
use crate::store;

pub fn month_summary(conn: &Connection, month_year: &str) -> Result<MonthSummary, AppError> {
  let month_year = validation::parse_month_year(month_year)?;

  // Stored dates are IST-anchored RFC 3339, so the first seven chars are the local month.
  let (income_total, expense_total, transaction_count) = conn.query_row(
    "SELECT
        COALESCE(SUM(CASE WHEN type='income' THEN amount END), 0),
        COALESCE(SUM(CASE WHEN type='expense' THEN amount END), 0),
        COUNT(*)
     FROM transactions WHERE deleted = 0 AND substr(date, 1, 7) = ?1",
    params![month_year],
    |row| Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?, row.get::<_, i64>(2)?)),
  )?;

  let budget = store::get_budget(conn, &month_year)?.map(|budget| budget.amount);

  Ok(MonthSummary {
    month_year,
    income_total,
    expense_total,
    transaction_count,
    budget,
    budget_remaining: budget.map(|amount| amount - expense_total),
  })
}

#[cfg(test)]
mod tests {
  use crate::models::{TransactionInput, TxType};
  use crate::store::LocalStore;

  fn input(tx_type: TxType, amount: f64, date: &str) -> TransactionInput {
    TransactionInput {
      tx_type,
      amount,
      category: "Misc".to_string(),
      date: date.to_string(),
      notes: None,
    }
  }

  #[test]
  fn summary_uses_local_month_and_budget() {
    let store = LocalStore::in_memory().unwrap();
    store.add(input(TxType::Income, 1000.0, "2024-03-01")).unwrap();
    store.add(input(TxType::Expense, 120.0, "2024-03-10")).unwrap();
    // 20:00 UTC on the last day of February is already March 1st in IST.
    store.add(input(TxType::Expense, 30.0, "2024-02-29T20:00:00Z")).unwrap();
    store.add(input(TxType::Expense, 999.0, "2024-04-01")).unwrap();
    let deleted = store.add(input(TxType::Expense, 50.0, "2024-03-11")).unwrap();
    store.delete(&deleted.uuid).unwrap();
    store.set_budget("2024-03", 500.0).unwrap();

    let summary = store.month_summary("2024-03").unwrap();
    assert_eq!(summary.income_total, 1000.0);
    assert_eq!(summary.expense_total, 150.0);
    assert_eq!(summary.transaction_count, 3);
    assert_eq!(summary.budget, Some(500.0));
    assert_eq!(summary.budget_remaining, Some(350.0));
  }

  #[test]
  fn summary_without_budget() {
    let store = LocalStore::in_memory().unwrap();
    let summary = store.month_summary("2024-05").unwrap();
    assert_eq!(summary.transaction_count, 0);
    assert_eq!(summary.budget, None);
    assert_eq!(summary.budget_remaining, None);
  }
}
