use chrono::{DateTime, Datelike, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr,
};
use tracing::{debug, warn};

use crate::entities::sequence_counter::{self, Entity as SequenceCounterEntity};
use crate::errors::ServiceError;

/// Counter scope for human-readable order numbers.
pub const ORDER_NUMBER_SCOPE: &str = "order-number";
/// Counter scope for invoice numbers. Sub-ledger prefixes get their own
/// scope (`invoice-number:SNF`) so prefixed sequences never share a counter.
pub const INVOICE_NUMBER_SCOPE: &str = "invoice-number";

/// Width of the zero-padded numeric suffix, e.g. `2526-00001`.
const SEQUENCE_WIDTH: usize = 5;

/// Returns the fiscal-year bucket label for a point in time.
///
/// Fiscal years run April 1 to March 31 and are labelled by the two-digit
/// start and end years: June 2025 and February 2026 both fall in `2526`.
pub fn fiscal_year_bucket(at: DateTime<Utc>) -> String {
    let start_year = if at.month() >= 4 {
        at.year()
    } else {
        at.year() - 1
    };
    format!("{:02}{:02}", start_year % 100, (start_year + 1) % 100)
}

/// Formats an allocated value as a human-readable identifier,
/// `[PREFIX-]BUCKET-NNNNN`.
pub fn format_sequence(prefix: Option<&str>, bucket: &str, value: i64) -> String {
    match prefix {
        Some(p) => format!("{p}-{bucket}-{value:0width$}", width = SEQUENCE_WIDTH),
        None => format!("{bucket}-{value:0width$}", width = SEQUENCE_WIDTH),
    }
}

/// Scope key for an invoice sequence, folding in the optional sub-ledger
/// prefix so each prefix is an independent bucket space.
pub fn invoice_scope(prefix: Option<&str>) -> String {
    match prefix {
        Some(p) => format!("{INVOICE_NUMBER_SCOPE}:{p}"),
        None => INVOICE_NUMBER_SCOPE.to_string(),
    }
}

/// Allocates unique, monotonically increasing sequence values per
/// (scope, bucket) pair.
///
/// Each pair owns a dedicated counter row which is bumped with an in-place
/// `value = value + 1` update and read back inside the caller's transaction.
/// Under row-locking stores two concurrent allocations serialize on the
/// update; the retry loop covers the first-use seeding race, where two
/// callers both observe a missing row and one loses the unique-key insert.
#[derive(Debug, Clone, Copy)]
pub struct SequenceAllocator {
    retry_budget: u32,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self { retry_budget: 5 }
    }
}

impl SequenceAllocator {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retry_budget: retry_budget.max(1),
        }
    }

    /// Returns the next value in the bucket, starting at 1.
    ///
    /// Must be called inside the transaction that inserts the owning record
    /// so the counter bump and the insert commit or roll back together.
    pub async fn next<C: ConnectionTrait>(
        &self,
        conn: &C,
        scope: &str,
        bucket: &str,
    ) -> Result<i64, ServiceError> {
        let key = counter_key(scope, bucket);

        for attempt in 1..=self.retry_budget {
            let bumped = SequenceCounterEntity::update_many()
                .col_expr(
                    sequence_counter::Column::Value,
                    Expr::col(sequence_counter::Column::Value).add(1),
                )
                .col_expr(
                    sequence_counter::Column::UpdatedAt,
                    Expr::value(Utc::now()),
                )
                .filter(sequence_counter::Column::CounterKey.eq(key.as_str()))
                .exec(conn)
                .await?;

            if bumped.rows_affected > 0 {
                let row = SequenceCounterEntity::find_by_id(key.clone())
                    .one(conn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError(format!(
                            "sequence counter {key} disappeared after increment"
                        ))
                    })?;
                debug!(scope, bucket, value = row.value, "sequence allocated");
                return Ok(row.value);
            }

            // No counter row yet for this bucket: seed at 1. A concurrent
            // seeder may win the unique-key insert, in which case we loop
            // back to the increment path.
            let seed = sequence_counter::ActiveModel {
                counter_key: Set(key.clone()),
                scope: Set(scope.to_string()),
                bucket: Set(bucket.to_string()),
                value: Set(1),
                updated_at: Set(Utc::now()),
            };

            match seed.insert(conn).await {
                Ok(_) => {
                    debug!(scope, bucket, value = 1, "sequence bucket seeded");
                    return Ok(1);
                }
                Err(e) => {
                    if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                        warn!(
                            scope,
                            bucket, attempt, "lost sequence seeding race, retrying"
                        );
                        continue;
                    }
                    return Err(ServiceError::DatabaseError(e));
                }
            }
        }

        Err(ServiceError::SequenceConflict(format!(
            "{scope}:{bucket} after {} attempts",
            self.retry_budget
        )))
    }

    /// Allocates and formats the next order number for the bucket covering
    /// `at`, e.g. `2526-00042`.
    pub async fn next_order_number<C: ConnectionTrait>(
        &self,
        conn: &C,
        at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let bucket = fiscal_year_bucket(at);
        let value = self.next(conn, ORDER_NUMBER_SCOPE, &bucket).await?;
        Ok(format_sequence(None, &bucket, value))
    }

    /// Allocates and formats the next invoice number, optionally carrying a
    /// sub-ledger prefix, e.g. `SNF-2526-00007`.
    pub async fn next_invoice_number<C: ConnectionTrait>(
        &self,
        conn: &C,
        at: DateTime<Utc>,
        prefix: Option<&str>,
    ) -> Result<String, ServiceError> {
        let bucket = fiscal_year_bucket(at);
        let scope = invoice_scope(prefix);
        let value = self.next(conn, &scope, &bucket).await?;
        Ok(format_sequence(prefix, &bucket, value))
    }
}

fn counter_key(scope: &str, bucket: &str) -> String {
    format!("{scope}:{bucket}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fiscal_year_rolls_over_in_april() {
        let march = Utc.with_ymd_and_hms(2026, 3, 31, 23, 59, 59).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        assert_eq!(fiscal_year_bucket(march), "2526");
        assert_eq!(fiscal_year_bucket(april), "2627");
    }

    #[test]
    fn bucket_label_uses_two_digit_years() {
        let at = Utc.with_ymd_and_hms(2099, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(fiscal_year_bucket(at), "9900");
    }

    #[test]
    fn formats_with_fixed_width_suffix() {
        assert_eq!(format_sequence(None, "2526", 1), "2526-00001");
        assert_eq!(format_sequence(None, "2526", 12345), "2526-12345");
        assert_eq!(format_sequence(Some("SNF"), "2526", 7), "SNF-2526-00007");
    }

    #[test]
    fn invoice_scopes_are_independent_per_prefix() {
        assert_eq!(invoice_scope(None), "invoice-number");
        assert_eq!(invoice_scope(Some("SNF")), "invoice-number:SNF");
        assert_ne!(invoice_scope(Some("SNF")), invoice_scope(None));
    }
}
