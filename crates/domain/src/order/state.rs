//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Confirmed ──► Shipped ──► Delivered
///    │
///    └──► Cancelled
/// ```
///
/// Forward moves are one step at a time. `Delivered` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order placed, stock committed, awaiting confirmation.
    #[default]
    Pending,

    /// Order confirmed by the operator.
    Confirmed,

    /// Order handed to the carrier.
    Shipped,

    /// Order delivered (terminal state).
    Delivered,

    /// Order cancelled and its stock released (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns the immediate successor in the forward chain, if any.
    pub fn successor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Shipped),
            OrderStatus::Shipped => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if items can still be added, changed or removed.
    pub fn can_edit_items(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns true if stock for this order's items is currently committed.
    pub fn holds_stock(&self) -> bool {
        !matches!(self, OrderStatus::Cancelled)
    }

    /// Validates a forward move to `to`.
    pub fn validate_advance(&self, to: OrderStatus) -> Result<(), DomainError> {
        if self.successor() == Some(to) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition { from: *self, to })
        }
    }

    /// Validates a cancellation.
    pub fn validate_cancel(&self) -> Result<(), DomainError> {
        if self.can_cancel() {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: *self,
                to: OrderStatus::Cancelled,
            })
        }
    }

    /// Validates an edit to the order's items.
    pub fn validate_item_edit(&self) -> Result<(), DomainError> {
        if self.can_edit_items() {
            Ok(())
        } else {
            Err(DomainError::ItemsLocked { status: *self })
        }
    }

    /// Returns the status name as stored in the table store.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_forward_chain() {
        assert_eq!(OrderStatus::Pending.successor(), Some(OrderStatus::Confirmed));
        assert_eq!(OrderStatus::Confirmed.successor(), Some(OrderStatus::Shipped));
        assert_eq!(OrderStatus::Shipped.successor(), Some(OrderStatus::Delivered));
        assert_eq!(OrderStatus::Delivered.successor(), None);
        assert_eq!(OrderStatus::Cancelled.successor(), None);
    }

    #[test]
    fn test_advance_rejects_skips_and_backward_moves() {
        assert!(OrderStatus::Pending.validate_advance(OrderStatus::Confirmed).is_ok());
        assert!(OrderStatus::Pending.validate_advance(OrderStatus::Shipped).is_err());
        assert!(OrderStatus::Shipped.validate_advance(OrderStatus::Confirmed).is_err());
        assert!(OrderStatus::Confirmed.validate_advance(OrderStatus::Confirmed).is_err());
        assert!(OrderStatus::Pending.validate_advance(OrderStatus::Cancelled).is_err());
    }

    #[test]
    fn test_terminal_statuses_reject_everything() {
        for to in OrderStatus::ALL {
            assert!(OrderStatus::Delivered.validate_advance(to).is_err());
            assert!(OrderStatus::Cancelled.validate_advance(to).is_err());
        }
        assert!(OrderStatus::Delivered.validate_cancel().is_err());
        assert!(OrderStatus::Cancelled.validate_cancel().is_err());
    }

    #[test]
    fn test_only_pending_can_cancel() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(!OrderStatus::Confirmed.can_cancel());
        assert!(!OrderStatus::Shipped.can_cancel());
        assert!(!OrderStatus::Delivered.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn test_items_are_frozen_once_pending_is_left() {
        assert!(OrderStatus::Pending.validate_item_edit().is_ok());
        for status in &OrderStatus::ALL[1..] {
            assert_eq!(
                status.validate_item_edit(),
                Err(DomainError::ItemsLocked { status: *status })
            );
        }
    }

    #[test]
    fn test_invalid_transition_error_names_both_ends() {
        let err = OrderStatus::Shipped.validate_cancel().unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled
            }
        );
    }

    #[test]
    fn test_parse_and_display() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
        assert_eq!(OrderStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&OrderStatus::Shipped).unwrap();
        assert_eq!(json, "\"shipped\"");
        let deserialized: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, OrderStatus::Shipped);
    }
}
