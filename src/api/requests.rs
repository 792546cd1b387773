use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Request to take a payment (also used for the slow variant).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.amount <= Decimal::ZERO {
            errors.push(ValidationError::new("amount", "amount must be positive"));
        }
        if self.currency.len() != 3 {
            errors.push(ValidationError::new("currency", "currency must be a 3-letter ISO 4217 code"));
        }
        finish(errors)
    }
}

/// Request to refund a prior payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub transaction_id: String,
    pub amount: Decimal,
    pub reason: Option<String>,
}

impl RefundRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.transaction_id.trim().is_empty() {
            errors.push(ValidationError::new("transactionId", "transactionId cannot be empty"));
        }
        if self.amount <= Decimal::ZERO {
            errors.push(ValidationError::new("amount", "amount must be positive"));
        }
        finish(errors)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Request to place an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub items: Vec<OrderItem>,
    pub shipping_address: String,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.items.is_empty() {
            errors.push(ValidationError::new("items", "order must contain at least one item"));
        }
        for item in &self.items {
            if item.product_id.trim().is_empty() {
                errors.push(ValidationError::new("items.productId", "productId cannot be empty"));
            }
            if item.quantity == 0 {
                errors.push(ValidationError::new("items.quantity", "quantity must be at least 1"));
            }
            if item.unit_price < Decimal::ZERO {
                errors.push(ValidationError::new("items.unitPrice", "unitPrice cannot be negative"));
            }
        }
        if self.shipping_address.trim().is_empty() {
            errors.push(ValidationError::new("shippingAddress", "shippingAddress cannot be empty"));
        }
        finish(errors)
    }

    pub fn total(&self) -> Decimal {
        self.items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum()
    }
}

/// Request to subscribe to the newsletter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub email: String,
    pub name: Option<String>,
}

impl SubscribeRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let email = self.email.trim();
        if email.is_empty() || !email.contains('@') {
            errors.push(ValidationError::new("email", "email must be a valid address"));
        }
        finish(errors)
    }
}

/// Request to redeem a voucher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherRedeemRequest {
    pub voucher_code: String,
    pub user_id: String,
}

impl VoucherRedeemRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.voucher_code.trim().is_empty() {
            errors.push(ValidationError::new("voucherCode", "voucherCode cannot be empty"));
        }
        if self.user_id.trim().is_empty() {
            errors.push(ValidationError::new("userId", "userId cannot be empty"));
        }
        finish(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payment_validation() {
        let valid = PaymentRequest {
            amount: dec!(100.00),
            currency: "USD".to_string(),
            description: None,
        };
        assert!(valid.validate().is_ok());

        let invalid = PaymentRequest {
            amount: dec!(0),
            currency: "DOLLARS".to_string(),
            description: None,
        };
        assert_eq!(invalid.validate().unwrap_err().len(), 2);
    }

    #[test]
    fn test_order_total() {
        let order: OrderRequest = serde_json::from_value(serde_json::json!({
            "items": [
                {"productId": "p1", "name": "Widget", "quantity": 2, "unitPrice": "19.99"},
                {"productId": "p2", "name": "Gadget", "quantity": 1, "unitPrice": "5.01"}
            ],
            "shippingAddress": "1 Main St"
        }))
        .unwrap();

        assert!(order.validate().is_ok());
        assert_eq!(order.total(), dec!(44.99));
    }

    #[test]
    fn test_empty_order_is_invalid() {
        let order = OrderRequest {
            items: vec![],
            shipping_address: " ".to_string(),
        };
        let errors = order.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "items"));
        assert!(errors.iter().any(|e| e.field == "shippingAddress"));
    }

    #[test]
    fn test_voucher_serializes_camel_case() {
        let request = VoucherRedeemRequest {
            voucher_code: "SPRING10".to_string(),
            user_id: "u-1".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["voucherCode"], "SPRING10");
        assert_eq!(value["userId"], "u-1");
    }

    #[test]
    fn test_subscribe_requires_email() {
        let request = SubscribeRequest {
            email: "nobody".to_string(),
            name: None,
        };
        assert!(request.validate().is_err());
    }
}
