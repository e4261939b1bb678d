//! Accrual authority reply types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use loyalty_common::{OrderStatus, Points};

/// Status of an order as reported by the accrual authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// Registered, calculation not started.
    Registered,
    /// Calculation refused; no points will be awarded.
    Invalid,
    /// Calculation in progress.
    Processing,
    /// Calculation finished; `accrual` holds the award.
    Processed,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered => OrderStatus::Registered,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Body of a `200 OK` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualReport {
    /// Order number as echoed by the authority.
    pub order: String,
    /// Calculation status.
    pub status: AccrualStatus,
    /// Points awarded; only present once processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl AccrualReport {
    /// A report with a non-final status.
    pub fn pending(order: impl Into<String>, status: AccrualStatus) -> Self {
        Self {
            order: order.into(),
            status,
            accrual: None,
        }
    }

    /// A processed report awarding `accrual`.
    pub fn processed(order: impl Into<String>, accrual: Decimal) -> Self {
        Self {
            order: order.into(),
            status: AccrualStatus::Processed,
            accrual: Some(accrual),
        }
    }

    /// A refused order.
    pub fn invalid(order: impl Into<String>) -> Self {
        Self::pending(order, AccrualStatus::Invalid)
    }

    /// The award in points. A processed report without an accrual awards zero.
    pub fn points(&self) -> Points {
        self.accrual.map(Points::new).unwrap_or(Points::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_processed() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"12345678903","status":"PROCESSED","accrual":729.98}"#)
                .unwrap();
        assert_eq!(report.status, AccrualStatus::Processed);
        assert_eq!(report.points(), Points::new(dec!(729.98)));
    }

    #[test]
    fn test_decode_without_accrual() {
        let report: AccrualReport =
            serde_json::from_str(r#"{"order":"12345678903","status":"PROCESSING"}"#).unwrap();
        assert_eq!(report.status, AccrualStatus::Processing);
        assert_eq!(report.accrual, None);
        assert_eq!(report.points(), Points::ZERO);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let result: Result<AccrualReport, _> =
            serde_json::from_str(r#"{"order":"1","status":"DONE"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_maps_to_order_status() {
        assert_eq!(OrderStatus::from(AccrualStatus::Registered), OrderStatus::Registered);
        assert_eq!(OrderStatus::from(AccrualStatus::Processed), OrderStatus::Processed);
    }
}
