use chrono::NaiveDate;

use crate::error::AppError;

pub fn ensure_amount_non_negative(amount: f64) -> Result<(), AppError> {
  if !amount.is_finite() || amount < 0.0 {
    Err(AppError::new("INVALID_AMOUNT", "Amount must be a non-negative number"))
  } else {
    Ok(())
  }
}

pub fn ensure_category(category: &str) -> Result<(), AppError> {
  if category.trim().is_empty() {
    Err(AppError::new("INVALID_CATEGORY", "Category must not be empty"))
  } else {
    Ok(())
  }
}

pub fn parse_month_year(month_year: &str) -> Result<String, AppError> {
  let value = month_year.trim();
  let valid = value.len() == 7
    && NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").is_ok();
  if valid {
    Ok(value.to_string())
  } else {
    Err(AppError::new("INVALID_MONTH", "Month must be YYYY-MM"))
  }
}
